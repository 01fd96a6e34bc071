//! Assembles `<engine>/mozconfig` from the project's fragment files.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::executor::ExecCtx;
use crate::project::{BuildConfig, ProjectConfig};
use crate::template::{TemplateOptions, render};
use crate::workspace::WorkspacePaths;

pub mod settings;

pub use settings::{BuildMode, InternalSettings, Platform};

pub const BANNER: &str =
    "# This file is automatically generated by dotbuild. Do not edit it by hand.";

const FALLBACK_BRANDING_DIR: &str = "browser/branding/unofficial";
const OPTION_MARKERS: &[&str] = &["ac_add_options", "mk_add_options", "export"];

/// OS and CPU architecture the configuration is generated for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub platform: Platform,
    pub arch: String,
}

impl Target {
    pub fn host() -> Self {
        Self {
            platform: Platform::host(),
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            platform: Platform::parse(os),
            arch: arch.trim().to_string(),
        }
    }

    fn is_i686(&self) -> bool {
        matches!(self.arch.as_str(), "i686" | "x86")
    }
}

/// The four sources of the merged file, in precedence order (later wins).
#[derive(Debug, Clone, Default)]
pub struct Fragments {
    pub common: String,
    pub os: String,
    pub user: String,
    pub internal: String,
}

impl Fragments {
    /// Banner, then each non-empty fragment, separated by one blank line.
    pub fn merge(&self) -> String {
        let parts = [
            BANNER,
            self.common.as_str(),
            self.os.as_str(),
            self.user.as_str(),
            self.internal.as_str(),
        ];
        let mut out = parts
            .iter()
            .map(|p| p.trim_end())
            .filter(|p| !p.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n");
        out.push('\n');
        out
    }
}

pub fn common_fragment_path(configs_dir: &Path) -> PathBuf {
    configs_dir.join("common").join("mozconfig")
}

pub fn os_fragment_path(configs_dir: &Path, target: &Target) -> PathBuf {
    let file = if target.is_i686() {
        "mozconfig-i686"
    } else {
        "mozconfig"
    };
    configs_dir.join(target.platform.config_dir()).join(file)
}

fn read_required(path: &Path, what: &str) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| Error::msg(format!("failed to read {what} {}: {e}", path.display())))
}

/// Read and render the file-backed fragments. The common and OS fragments
/// must exist; a missing user override is just empty.
pub fn load_fragments(
    ws: &WorkspacePaths,
    target: &Target,
    opts: &TemplateOptions,
) -> Result<Fragments> {
    let common = read_required(&common_fragment_path(&ws.configs_dir), "common mozconfig")?;
    let os = read_required(
        &os_fragment_path(&ws.configs_dir, target),
        "platform mozconfig",
    )?;
    let user = match fs::read_to_string(&ws.override_file) {
        Ok(s) => s,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => {
            return Err(Error::msg(format!(
                "failed to read override mozconfig {}: {e}",
                ws.override_file.display()
            )));
        }
    };
    Ok(Fragments {
        common: render(&common, opts),
        os: render(&os, opts),
        user: render(&user, opts),
        internal: String::new(),
    })
}

/// `git rev-parse HEAD` of the project. Without a changeset the build has no
/// provenance, so failure is fatal after telling the operator how to fix it.
pub fn resolve_changeset(ctx: &ExecCtx, root: &Path) -> Result<String> {
    let res = Command::new("git")
        .arg("-C")
        .arg(root)
        .arg("rev-parse")
        .arg("HEAD")
        .output()
        .map_err(|e| Error::msg(format!("failed to run git: {e}")))
        .and_then(|out| {
            let stdout = String::from_utf8_lossy(&out.stdout).trim().to_string();
            if out.status.success() && !stdout.is_empty() {
                Ok(stdout)
            } else {
                let stderr = String::from_utf8_lossy(&out.stderr);
                Err(Error::msg(format!(
                    "git rev-parse HEAD failed in {}: {}",
                    root.display(),
                    stderr.trim()
                )))
            }
        });

    if res.is_err() {
        ctx.warn("dotbuild expects the project to be tracked with git.");
        ctx.warn("Run `git init` in the project root and commit at least once.");
        ctx.warn("The changeset is embedded in the build for provenance and cannot be skipped.");
    }
    res
}

/// `browser/branding/<brand>` when the engine ships it, the unofficial
/// branding otherwise.
pub fn resolve_branding_dir(ctx: &ExecCtx, ws: &WorkspacePaths, brand: &str) -> String {
    let rel = format!("browser/branding/{brand}");
    if ws.engine_dir.join(&rel).is_dir() {
        return rel;
    }
    ctx.warn(&format!(
        "branding '{brand}' not found in {}; using {FALLBACK_BRANDING_DIR}",
        ws.engine_dir.display()
    ));
    FALLBACK_BRANDING_DIR.to_string()
}

pub fn template_options(build: &BuildConfig, branding_dir: &str, changeset: &str) -> TemplateOptions {
    TemplateOptions::new()
        .with("name", &build.name)
        .with("vendor", &build.vendor)
        .with("appId", &build.app_id)
        .with("brandingDir", branding_dir)
        .with("binName", &build.bin_name)
        .with("changeset", changeset)
}

/// Lines that set a build option or export a variable, without their marker.
pub fn option_lines(merged: &str) -> Vec<String> {
    merged
        .lines()
        .filter_map(|line| {
            let line = line.trim_start();
            let (first, rest) = line.split_once(char::is_whitespace)?;
            OPTION_MARKERS
                .contains(&first)
                .then(|| rest.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn write_replacing(path: &Path, contents: &str) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| Error::msg(format!("{} has no parent dir", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .map_err(|e| Error::msg(format!("failed to create temp file in {}: {e}", dir.display())))?;
    tmp.write_all(contents.as_bytes())
        .map_err(|e| Error::msg(format!("failed to write {}: {e}", path.display())))?;
    tmp.persist(path)
        .map_err(|e| Error::msg(format!("failed to replace {}: {}", path.display(), e.error)))?;
    Ok(())
}

/// Everything after the changeset lookup: load, render, merge, write, echo.
pub fn write_with_changeset(
    ctx: &ExecCtx,
    ws: &WorkspacePaths,
    cfg: &ProjectConfig,
    target: &Target,
    changeset: &str,
    update_host: Option<String>,
) -> Result<String> {
    if !ws.engine_dir.is_dir() {
        return Err(Error::msg(format!(
            "engine dir {} does not exist; run `dotbuild download` first",
            ws.engine_dir.display()
        )));
    }

    let branding_dir = resolve_branding_dir(ctx, ws, &cfg.build.brand);
    let opts = template_options(&cfg.build, &branding_dir, changeset);
    let mut fragments = load_fragments(ws, target, &opts)?;

    let mode = BuildMode::parse(&cfg.build.mode);
    if let BuildMode::Unknown(raw) = &mode {
        ctx.warn(&format!("unknown build mode '{raw}'; no debug/optimize options set"));
    }
    if let Platform::Unknown(raw) = &target.platform {
        ctx.warn(&format!("unknown platform '{raw}'"));
    }
    let internal = InternalSettings {
        brand: cfg.build.brand.clone(),
        branding_dir,
        update_host,
        jobs: cfg.build.effective_jobs(),
    };
    fragments.internal = settings::build_settings(&mode, &target.platform, &internal);

    let merged = fragments.merge();
    write_replacing(&ws.mozconfig, &merged)?;
    ctx.log(&format!("wrote {}", ws.mozconfig.display()));
    for line in option_lines(&merged) {
        ctx.log(&line);
    }
    Ok(merged)
}

/// Resolve the changeset and write the merged configuration.
pub fn write_mozconfig(
    ctx: &ExecCtx,
    ws: &WorkspacePaths,
    cfg: &ProjectConfig,
    target: &Target,
) -> Result<String> {
    let changeset = resolve_changeset(ctx, &ws.root)?;
    ctx.debug(&format!("changeset = {changeset}"));
    let update_host = std::env::var(settings::UPDATE_HOST_ENV).ok();
    write_with_changeset(ctx, ws, cfg, target, &changeset, update_host)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn i686_selects_the_alternate_fragment() {
        let configs = Path::new("/p/configs");
        assert_eq!(
            os_fragment_path(configs, &Target::new("windows", "i686")),
            configs.join("windows/mozconfig-i686")
        );
        assert_eq!(
            os_fragment_path(configs, &Target::new("linux", "x86_64")),
            configs.join("linux/mozconfig")
        );
        assert_eq!(
            os_fragment_path(configs, &Target::new("darwin", "aarch64")),
            configs.join("macos/mozconfig")
        );
    }

    #[test]
    fn merge_skips_empty_sections_without_extra_blank_lines() {
        let f = Fragments {
            common: "common=1\n".into(),
            os: "os=1\n".into(),
            user: String::new(),
            internal: "internal=1\n".into(),
        };
        assert_eq!(
            f.merge(),
            format!("{BANNER}\n\ncommon=1\n\nos=1\n\ninternal=1\n")
        );
    }

    #[test]
    fn option_lines_strip_markers() {
        let merged = "# comment\nac_add_options --disable-tests\nmk_add_options MOZ_PARALLEL_BUILD=4\nexport MOZ_APP_NAME=ember\nexported=1\nac_add_options\n";
        assert_eq!(
            option_lines(merged),
            vec!["--disable-tests", "MOZ_PARALLEL_BUILD=4", "MOZ_APP_NAME=ember"]
        );
    }
}
