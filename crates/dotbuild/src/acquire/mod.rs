//! Download, unpack and initialise a Firefox source release.
//!
//! ```text
//! not-started -> locating -> downloading -> downloaded -> unpacking
//!   -> unpacked -> initializing -> complete
//! ```
//! Any fatal step moves the machine to `failed`.

use std::ffi::OsStr;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;

use crate::error::{Error, Result};
use crate::executor::{ExecCtx, LogLevel, spawn_lines};
use crate::workspace::{WorkspacePaths, ensure_dir, safe_remove_dir_all};

pub mod fetch;
pub mod metadata;
pub mod progress;

pub use fetch::{Fetcher, HttpFetcher};
use metadata::EngineMetadata;
pub use progress::{ProgressReporter, ProgressText, ProgressView};

pub const SKIP_INIT_ENV: &str = "DOTBUILD_SKIP_INIT";

static BASE_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d+(?:\.\d+)*").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    NotStarted,
    Locating,
    Downloading,
    Downloaded,
    Unpacking,
    Unpacked,
    Initializing,
    Complete,
    Failed,
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not-started",
            Self::Locating => "locating",
            Self::Downloading => "downloading",
            Self::Downloaded => "downloaded",
            Self::Unpacking => "unpacking",
            Self::Unpacked => "unpacked",
            Self::Initializing => "initializing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        })
    }
}

pub fn archive_file_name(version: &str) -> String {
    format!("firefox-{version}.source.tar.xz")
}

pub fn release_dir_url(host: &str, version: &str) -> String {
    format!("https://{host}/pub/firefox/releases/{version}")
}

pub fn download_url(host: &str, version: &str) -> String {
    format!(
        "{}/source/{}",
        release_dir_url(host, version),
        archive_file_name(version)
    )
}

/// Leading dotted-numeric part: `116.0b3` -> `116.0`, `115.0esr` -> `115.0`.
pub fn base_version(version: &str) -> &str {
    BASE_VERSION
        .find(version)
        .map(|m| m.as_str())
        .unwrap_or(version)
}

pub fn looks_like_beta(version: &str) -> bool {
    version.contains('b')
}

/// `DOTBUILD_SKIP_INIT` set to anything non-empty.
pub fn skip_init_from_env() -> bool {
    skip_init_requested(std::env::var_os(SKIP_INIT_ENV).as_deref())
}

pub fn skip_init_requested(value: Option<&OsStr>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// Archive tool dialect. GNU tar renames with `--transform`; bsdtar (the
/// system tar on macOS and Windows) uses `-s`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarFlavor {
    Gnu,
    Bsd,
}

impl TarFlavor {
    pub fn host() -> Self {
        if cfg!(any(target_os = "macos", target_os = "windows", target_os = "freebsd")) {
            Self::Bsd
        } else {
            Self::Gnu
        }
    }
}

/// `tar -xvf <archive>` renaming the top-level `firefox-*` directory to
/// `rel_engine` while extracting. Run it from the project root.
pub fn unpack_command(flavor: TarFlavor, rel_engine: &Path, archive: &Path) -> Command {
    let rename = format!(",^firefox-[^/]*,{},", rel_engine.display());
    let mut cmd = Command::new("tar");
    match flavor {
        TarFlavor::Gnu => {
            cmd.arg(format!("--transform=s{rename}"))
                .arg("--show-transformed-names");
        }
        TarFlavor::Bsd => {
            cmd.arg("-s").arg(rename);
        }
    }
    cmd.arg("-xvf").arg(archive);
    cmd
}

/// `dotbuild init` for the freshly unpacked engine, reading the same project
/// file as the parent.
pub fn init_command(
    exe: &Path,
    config_file: Option<&Path>,
    engine_dir: &Path,
    version: &str,
    branch: &str,
) -> Command {
    let mut cmd = Command::new(exe);
    if let Some(config) = config_file {
        cmd.arg("--config").arg(config);
    }
    cmd.arg("init")
        .arg(engine_dir)
        .arg("--version")
        .arg(version)
        .arg("--branch")
        .arg(branch);
    cmd
}

#[derive(Debug, Clone)]
pub struct AcquireOptions {
    pub version: Option<String>,
    pub archive_host: String,
    pub verify_checksum: bool,
    pub skip_init: bool,
    pub init_branch: String,
    /// Project file handed to the `dotbuild init` child.
    pub config_file: Option<PathBuf>,
    pub show_progress: bool,
}

/// Resolved download target, produced by the locating step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub version: String,
    pub url: String,
    pub archive: PathBuf,
}

#[derive(Debug, Clone)]
pub struct Acquired {
    pub version: String,
    pub url: String,
    pub engine_dir: PathBuf,
}

pub struct Supervisor<'a, F: Fetcher> {
    ctx: &'a ExecCtx,
    ws: &'a WorkspacePaths,
    opts: AcquireOptions,
    fetcher: F,
    state: DownloadState,
    progress: ProgressText,
}

impl<'a, F: Fetcher> Supervisor<'a, F> {
    pub fn new(ctx: &'a ExecCtx, ws: &'a WorkspacePaths, opts: AcquireOptions, fetcher: F) -> Self {
        Self {
            ctx,
            ws,
            opts,
            fetcher,
            state: DownloadState::NotStarted,
            progress: ProgressText::default(),
        }
    }

    pub fn state(&self) -> DownloadState {
        self.state
    }

    pub fn progress(&self) -> ProgressView {
        self.progress.view()
    }

    fn enter(&mut self, next: DownloadState) {
        self.ctx
            .debug(&format!("acquire: {} -> {}", self.state, next));
        self.state = next;
    }

    /// Drive the machine to `complete`, or to `failed` on the first fatal error.
    /// A dry run ends after locating and leaves the state at `locating`.
    pub fn run(&mut self) -> Result<Acquired> {
        let reporter = ProgressReporter::start(self.progress.view(), self.opts.show_progress);
        let res = self.drive();
        reporter.stop();
        if res.is_err() {
            self.enter(DownloadState::Failed);
        }
        res
    }

    fn drive(&mut self) -> Result<Acquired> {
        self.enter(DownloadState::Locating);
        let located = self.locate()?;

        if self.ctx.dry_run {
            self.ctx.log(&format!(
                "DRY-RUN: would download {} to {}",
                located.url,
                located.archive.display()
            ));
            return Ok(Acquired {
                version: located.version,
                url: located.url,
                engine_dir: self.ws.engine_dir.clone(),
            });
        }

        self.enter(DownloadState::Downloading);
        self.download(&located)?;
        self.enter(DownloadState::Downloaded);

        self.enter(DownloadState::Unpacking);
        self.unpack(&located)?;
        self.enter(DownloadState::Unpacked);

        self.enter(DownloadState::Initializing);
        self.initialize(&located.version)?;

        self.finish(&located)?;
        self.enter(DownloadState::Complete);
        Ok(Acquired {
            version: located.version,
            url: located.url,
            engine_dir: self.ws.engine_dir.clone(),
        })
    }

    /// Resolve the URL and run the pre-checks. No network access happens here.
    pub fn locate(&self) -> Result<Located> {
        let version = self
            .opts
            .version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                Error::msg(
                    "no Firefox version given; pass one to `dotbuild download` or set [firefox].version",
                )
            })?
            .to_string();

        let existing = self.ws.root.join(format!("firefox-{}", base_version(&version)));
        if existing.exists() {
            return Err(Error::msg(format!(
                "workspace {} already exists and downloading {version} would overwrite it; remove it and run the download again",
                existing.display()
            )));
        }

        if looks_like_beta(&version) {
            self.ctx.warn(&format!(
                "version {version} looks like a beta; beta sources may be unstable"
            ));
        }

        let url = download_url(&self.opts.archive_host, &version);
        self.ctx.log(&format!("firefox {version}: {url}"));
        Ok(Located {
            archive: self.ws.engines_dir.join(archive_file_name(&version)),
            version,
            url,
        })
    }

    fn download(&mut self, located: &Located) -> Result<()> {
        ensure_dir(&self.ws.engines_dir)?;
        if located.archive.exists() {
            self.ctx.warn(&format!(
                "removing leftover archive {} from an earlier run",
                located.archive.display()
            ));
            fs::remove_file(&located.archive).map_err(|e| {
                Error::msg(format!(
                    "failed to remove {}: {e}",
                    located.archive.display()
                ))
            })?;
        }

        self.progress.set(format!("fetching {}", located.url));
        let bytes = self
            .fetcher
            .fetch(&located.url, &located.archive, &self.progress)?;
        self.ctx.log(&format!(
            "downloaded {} ({bytes} bytes)",
            located.archive.display()
        ));

        if self.opts.verify_checksum {
            let sums_url = format!(
                "{}/SHA256SUMS",
                release_dir_url(&self.opts.archive_host, &located.version)
            );
            let sums = self.fetcher.fetch_text(&sums_url)?;
            let entry = format!("source/{}", archive_file_name(&located.version));
            fetch::verify_sha256(&located.archive, &sums, &entry)?;
            self.ctx.log("checksum verified");
        }
        Ok(())
    }

    fn unpack(&mut self, located: &Located) -> Result<()> {
        let engine_dir = &self.ws.engine_dir;
        safe_remove_dir_all(&self.ws.root, engine_dir)?;
        ensure_dir(engine_dir)?;

        let rel_engine = engine_dir
            .strip_prefix(&self.ws.root)
            .unwrap_or(engine_dir.as_path());
        let mut cmd = unpack_command(TarFlavor::host(), rel_engine, &located.archive);
        cmd.current_dir(&self.ws.root);

        self.ctx.log(&format!(
            "unpacking {} into {}",
            located.archive.display(),
            engine_dir.display()
        ));
        let mut lines = spawn_lines(cmd)?;
        for line in lines.by_ref() {
            if let Some(text) = progress::tar_progress(&line) {
                self.progress.set(text);
            }
        }
        lines.finish()?;

        if is_empty_dir(engine_dir)? {
            return Err(Error::msg(format!(
                "{} did not contain a firefox-* top-level directory",
                located.archive.display()
            )));
        }
        Ok(())
    }

    fn initialize(&mut self, version: &str) -> Result<()> {
        if cfg!(windows) {
            self.bootstrap_windows_toolchains()?;
        }

        if self.opts.skip_init {
            self.ctx
                .log(&format!("skipping engine init ({SKIP_INIT_ENV} or [init].skip set)"));
            return Ok(());
        }

        let exe = std::env::current_exe()
            .map_err(|e| Error::msg(format!("cannot locate dotbuild executable: {e}")))?;
        let mut cmd = init_command(
            &exe,
            self.opts.config_file.as_deref(),
            &self.ws.engine_dir,
            version,
            &self.opts.init_branch,
        );
        cmd.current_dir(&self.ws.root);

        self.ctx.log("initializing engine repository...");
        let mut lines = spawn_lines(cmd)?;
        for line in lines.by_ref() {
            let line = progress::strip_log_level(&line);
            self.progress.set(line);
            self.ctx.emit(LogLevel::Debug, line);
        }
        lines.finish()
    }

    fn bootstrap_windows_toolchains(&self) -> Result<()> {
        let cache = dirs::home_dir().map(|h| h.join(".mozbuild").join("win"));
        if let Some(cache) = cache.as_ref().filter(|c| c.is_dir()) {
            self.ctx.log(&format!(
                "toolchain cache {} present; skipping bootstrap",
                cache.display()
            ));
            return Ok(());
        }
        self.ctx.log("bootstrapping Windows toolchains (this takes a while)...");
        let mut cmd = Command::new("python3");
        cmd.current_dir(&self.ws.engine_dir)
            .arg("mach")
            .arg("--no-interactive")
            .arg("bootstrap")
            .arg("--application-choice")
            .arg("browser");
        self.ctx.run_cmd(cmd)
    }

    fn finish(&mut self, located: &Located) -> Result<()> {
        metadata::write(
            &self.ws.metadata_file,
            &EngineMetadata {
                version: located.version.clone(),
                archive_url: located.url.clone(),
                engine_dir: self.ws.engine_dir_name(),
                downloaded_at: Utc::now(),
            },
        )?;
        fs::remove_file(&located.archive).map_err(|e| {
            Error::msg(format!(
                "failed to remove {}: {e}",
                located.archive.display()
            ))
        })?;
        self.ctx.log(&format!(
            "firefox {} ready in {}",
            located.version,
            self.ws.engine_dir.display()
        ));
        Ok(())
    }
}

fn is_empty_dir(dir: &Path) -> Result<bool> {
    let mut it = fs::read_dir(dir)
        .map_err(|e| Error::msg(format!("failed to read {}: {e}", dir.display())))?;
    Ok(it.next().is_none())
}
