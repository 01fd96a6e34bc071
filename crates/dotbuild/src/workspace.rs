use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::Deserialize;

use crate::error::{Error, Result};

fn default_root_dir() -> String {
    ".".into()
}

fn default_dotbuild_dir() -> String {
    ".dotbuild".into()
}

fn default_engine_dir() -> String {
    "engine".into()
}

fn default_configs_dir() -> String {
    "configs".into()
}

fn default_override_file() -> String {
    "mozconfig".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    #[serde(default = "default_root_dir")]
    pub root_dir: String,
    #[serde(default = "default_dotbuild_dir")]
    pub dotbuild_dir: String,
    #[serde(default = "default_engine_dir")]
    pub engine_dir: String,
    #[serde(default = "default_configs_dir")]
    pub configs_dir: String,
    #[serde(default = "default_override_file")]
    pub override_file: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            dotbuild_dir: default_dotbuild_dir(),
            engine_dir: default_engine_dir(),
            configs_dir: default_configs_dir(),
            override_file: default_override_file(),
        }
    }
}

/// Absolute locations of everything the tool reads or writes.
#[derive(Debug, Clone)]
pub struct WorkspacePaths {
    pub root: PathBuf,
    pub dotbuild_dir: PathBuf,
    pub engines_dir: PathBuf,
    pub engine_dir: PathBuf,
    pub configs_dir: PathBuf,
    pub override_file: PathBuf,
    pub metadata_file: PathBuf,
    pub mozconfig: PathBuf,
}

impl WorkspacePaths {
    /// Final path component of the engine directory; the unpack step renames
    /// the archive's top-level directory to this.
    pub fn engine_dir_name(&self) -> String {
        self.engine_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(default_engine_dir)
    }
}

/// Resolve every workspace path against `base` (usually the directory the
/// project file lives in). Paths come back absolute; nothing is created.
pub fn load_paths(base: &Path, cfg: &WorkspaceConfig) -> Result<WorkspacePaths> {
    let root = resolve_user_path(base, &cfg.root_dir)?;
    let root = std::path::absolute(&root)
        .map_err(|e| Error::msg(format!("cannot resolve {}: {e}", root.display())))?;
    let dotbuild_dir = resolve_under(&root, &cfg.dotbuild_dir)?;
    let engine_dir = resolve_under(&root, &cfg.engine_dir)?;
    let configs_dir = resolve_under(&root, &cfg.configs_dir)?;
    let override_file = resolve_under(&root, &cfg.override_file)?;
    Ok(WorkspacePaths {
        engines_dir: dotbuild_dir.join("engines"),
        metadata_file: dotbuild_dir.join("metadata.json"),
        mozconfig: engine_dir.join("mozconfig"),
        root,
        dotbuild_dir,
        engine_dir,
        configs_dir,
        override_file,
    })
}

pub fn ensure_dir(p: &Path) -> Result<()> {
    fs::create_dir_all(p)
        .map_err(|e| Error::msg(format!("failed to create dir {}: {e}", p.display())))
}

/// Remove `dir` recursively, refusing anything that is not inside `root`.
pub fn safe_remove_dir_all(root: &Path, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }
    let root_can = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
    let dir_can = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
    if dir_can == root_can || !dir_can.starts_with(&root_can) {
        return Err(Error::msg(format!(
            "refusing to remove '{}' (not inside workspace root '{}')",
            dir_can.display(),
            root_can.display()
        )));
    }
    fs::remove_dir_all(&dir_can)
        .map_err(|e| Error::msg(format!("failed to remove dir {}: {e}", dir_can.display())))
}

fn resolve_user_path(base: &Path, p: &str) -> Result<PathBuf> {
    let p = p.trim();
    if p.is_empty() {
        return Err(Error::msg("empty workspace path"));
    }
    let pb = PathBuf::from(p);
    Ok(if pb.is_absolute() { pb } else { base.join(pb) })
}

fn resolve_under(root: &Path, rel: &str) -> Result<PathBuf> {
    let rel = rel.trim();
    if rel.is_empty() {
        return Err(Error::msg("empty relative path"));
    }
    let pb = PathBuf::from(rel);
    if pb.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(Error::msg(format!(
            "invalid workspace path '{}' (contains '..')",
            rel
        )));
    }
    Ok(if pb.is_absolute() { pb } else { root.join(pb) })
}
