use serde::Deserialize;

use crate::config::ConfigDoc;
use crate::error::Result;
use crate::workspace::WorkspaceConfig;

pub const DEFAULT_ARCHIVE_HOST: &str = "archive.mozilla.org";

fn default_brand() -> String {
    "unofficial".into()
}

fn default_mode() -> String {
    "dev".into()
}

fn default_archive_host() -> String {
    DEFAULT_ARCHIVE_HOST.into()
}

fn default_init_branch() -> String {
    "dotbuild".into()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    pub name: String,
    pub vendor: String,
    pub app_id: String,
    pub bin_name: String,
    #[serde(default = "default_brand")]
    pub brand: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    pub jobs: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            name: "Browser".into(),
            vendor: "Browser Project".into(),
            app_id: "org.example.browser".into(),
            bin_name: "browser".into(),
            brand: default_brand(),
            mode: default_mode(),
            jobs: 0,
        }
    }
}

impl BuildConfig {
    pub fn effective_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get().max(1)
        } else {
            self.jobs
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FirefoxConfig {
    pub version: Option<String>,
    #[serde(default = "default_archive_host")]
    pub archive_host: String,
    pub verify_checksum: bool,
}

impl Default for FirefoxConfig {
    fn default() -> Self {
        Self {
            version: None,
            archive_host: default_archive_host(),
            verify_checksum: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InitConfig {
    pub skip: bool,
    #[serde(default = "default_init_branch")]
    pub branch: String,
}

impl Default for InitConfig {
    fn default() -> Self {
        Self {
            skip: false,
            branch: default_init_branch(),
        }
    }
}

/// All typed sections of `dotbuild.toml`.
#[derive(Debug, Clone, Default)]
pub struct ProjectConfig {
    pub build: BuildConfig,
    pub firefox: FirefoxConfig,
    pub workspace: WorkspaceConfig,
    pub init: InitConfig,
}

impl ProjectConfig {
    pub fn from_doc(doc: &ConfigDoc) -> Result<Self> {
        Ok(Self {
            build: doc.section("build")?,
            firefox: doc.section("firefox")?,
            workspace: doc.section("workspace")?,
            init: doc.section("init")?,
        })
    }
}
