use std::fmt;

/// Placeholder update host; `.invalid` never resolves, so unconfigured builds
/// cannot reach a real update server.
pub const DEFAULT_UPDATE_HOST: &str = "updates.dotbuild.invalid";
pub const UPDATE_HOST_ENV: &str = "MOZ_APPUPDATE_HOST";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildMode {
    Dev,
    Debug,
    Release,
    Unknown(String),
}

impl BuildMode {
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "dev" => Self::Dev,
            "debug" => Self::Debug,
            "release" => Self::Release,
            other => Self::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for BuildMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dev => f.write_str("dev"),
            Self::Debug => f.write_str("debug"),
            Self::Release => f.write_str("release"),
            Self::Unknown(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Linux,
    Darwin,
    Windows,
    Unknown(String),
}

impl Platform {
    /// Accepts both Rust (`std::env::consts::OS`) and Node-style names.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "linux" => Self::Linux,
            "darwin" | "macos" => Self::Darwin,
            "win32" | "windows" => Self::Windows,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn host() -> Self {
        Self::parse(std::env::consts::OS)
    }

    /// Directory under the configs dir holding this platform's fragment.
    pub fn config_dir(&self) -> &str {
        match self {
            Self::Linux => "linux",
            Self::Darwin => "macos",
            Self::Windows => "windows",
            Self::Unknown(s) => s,
        }
    }

    fn optimize_flags(&self) -> Option<&'static str> {
        match self {
            Self::Linux => Some(r#"ac_add_options --enable-optimize="-O3 -march=haswell -mtune=haswell -w""#),
            Self::Darwin => Some(r#"ac_add_options --enable-optimize="-O3 -march=nehalem -mtune=haswell -w""#),
            Self::Windows => Some(
                r#"ac_add_options --enable-optimize="-O2 -Qvec -w -clang:-ftree-vectorize -clang:-msse3 -clang:-mssse3 -clang:-msse4.1 -clang:-mtune=haswell""#,
            ),
            Self::Unknown(_) => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.config_dir())
    }
}

/// Debug/optimize options for `mode`. Unrecognised modes and platforms turn
/// into a visible comment instead of an error.
pub fn mode_settings(mode: &BuildMode, platform: &Platform) -> String {
    match mode {
        BuildMode::Dev => "ac_add_options --disable-debug\n".to_string(),
        BuildMode::Debug => {
            "ac_add_options --enable-debug\nac_add_options --disable-optimize\n".to_string()
        }
        BuildMode::Release => {
            let mut out = String::from(
                "ac_add_options --disable-debug\nac_add_options --enable-optimize\nac_add_options --enable-rust-simd\n",
            );
            match platform.optimize_flags() {
                Some(flags) => out.push_str(flags),
                None => out.push_str(&format!("# unknown platform '{platform}'")),
            }
            out.push('\n');
            out
        }
        BuildMode::Unknown(raw) => format!("# unknown build mode '{raw}'\n"),
    }
}

/// Settings dotbuild always forces, whatever the mode.
#[derive(Debug, Clone)]
pub struct InternalSettings {
    /// Update channel name.
    pub brand: String,
    /// Engine-relative branding directory, after any fallback.
    pub branding_dir: String,
    pub update_host: Option<String>,
    pub jobs: usize,
}

impl InternalSettings {
    pub fn render(&self) -> String {
        let host = self
            .update_host
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_UPDATE_HOST);
        format!(
            "ac_add_options --disable-geckodriver\n\
             ac_add_options --disable-profiling\n\
             ac_add_options --disable-tests\n\
             ac_add_options --with-branding={branding_dir}\n\
             ac_add_options --enable-update-channel={brand}\n\
             export MOZ_APPUPDATE_HOST={host}\n\
             mk_add_options MOZ_PARALLEL_BUILD={jobs}\n",
            brand = self.brand,
            branding_dir = self.branding_dir,
            jobs = self.jobs.max(1),
        )
    }
}

/// Mode block followed by the forced block.
pub fn build_settings(mode: &BuildMode, platform: &Platform, internal: &InternalSettings) -> String {
    format!(
        "# Build mode: {mode}\n{}\n# Internal\n{}",
        mode_settings(mode, platform),
        internal.render()
    )
}
