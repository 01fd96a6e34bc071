use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dotbuild::acquire::{AcquireOptions, DownloadState, Fetcher, ProgressText, Supervisor};
use dotbuild::executor::{ExecCtx, LogLevel, MemorySink};
use dotbuild::workspace::{self, WorkspaceConfig, WorkspacePaths};

/// Serves a locally built archive instead of hitting the network.
struct FakeFetcher {
    calls: Arc<AtomicUsize>,
    version: String,
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, _url: &str, dest: &Path, progress: &ProgressText) -> dotbuild::Result<u64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        build_archive(dest, &self.version);
        progress.set("downloaded");
        Ok(fs::metadata(dest)?.len())
    }

    fn fetch_text(&self, url: &str) -> dotbuild::Result<String> {
        Err(dotbuild::Error::msg(format!("unexpected fetch of {url}")))
    }
}

fn build_archive(dest: &Path, version: &str) {
    let staging = tempfile::tempdir().unwrap();
    let top = staging.path().join(format!("firefox-{version}"));
    fs::create_dir_all(top.join("browser/branding/unofficial")).unwrap();
    fs::write(top.join("mach"), "#!/bin/sh\n").unwrap();
    fs::write(top.join("moz.configure"), "").unwrap();
    let status = std::process::Command::new("tar")
        .arg("-cf")
        .arg(dest)
        .arg("-C")
        .arg(staging.path())
        .arg(format!("firefox-{version}"))
        .status()
        .unwrap();
    assert!(status.success());
}

fn options(version: Option<&str>) -> AcquireOptions {
    AcquireOptions {
        version: version.map(str::to_string),
        archive_host: "archive.mozilla.org".into(),
        verify_checksum: false,
        skip_init: true,
        init_branch: "dotbuild".into(),
        config_file: None,
        show_progress: false,
    }
}

fn setup() -> (tempfile::TempDir, WorkspacePaths) {
    let dir = tempfile::tempdir().unwrap();
    let ws = workspace::load_paths(dir.path(), &WorkspaceConfig::default()).unwrap();
    (dir, ws)
}

fn fetcher(version: &str) -> (FakeFetcher, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    (
        FakeFetcher {
            calls: calls.clone(),
            version: version.into(),
        },
        calls,
    )
}

#[test]
fn existing_workspace_fails_before_any_network_access() {
    let (_dir, ws) = setup();
    fs::create_dir_all(ws.root.join("firefox-115.0")).unwrap();
    let ctx = ExecCtx::new(false, Arc::new(MemorySink::default()));
    let (f, calls) = fetcher("115.0");

    let mut sup = Supervisor::new(&ctx, &ws, options(Some("115.0")), f);
    let err = sup.run().unwrap_err().to_string();

    assert!(err.contains("would overwrite"), "unexpected err: {err}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sup.state(), DownloadState::Failed);
}

#[test]
fn beta_workspace_check_uses_the_base_version() {
    let (_dir, ws) = setup();
    fs::create_dir_all(ws.root.join("firefox-116.0")).unwrap();
    let ctx = ExecCtx::new(false, Arc::new(MemorySink::default()));
    let (f, _calls) = fetcher("116.0b3");

    let sup = Supervisor::new(&ctx, &ws, options(Some("116.0b3")), f);
    assert!(sup.locate().is_err());
}

#[test]
fn missing_version_fails() {
    let (_dir, ws) = setup();
    let ctx = ExecCtx::new(false, Arc::new(MemorySink::default()));
    let (f, calls) = fetcher("115.0");

    let mut sup = Supervisor::new(&ctx, &ws, options(None), f);
    let err = sup.run().unwrap_err().to_string();

    assert!(err.contains("no Firefox version"), "unexpected err: {err}");
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sup.state(), DownloadState::Failed);
}

#[test]
fn beta_warns_and_dry_run_stops_after_locating() {
    let (_dir, ws) = setup();
    let sink = Arc::new(MemorySink::default());
    let ctx = ExecCtx::new(true, sink.clone());
    let (f, calls) = fetcher("116.0b3");

    let mut sup = Supervisor::new(&ctx, &ws, options(Some("116.0b3")), f);
    let acquired = sup.run().expect("dry run");

    assert_eq!(
        acquired.url,
        "https://archive.mozilla.org/pub/firefox/releases/116.0b3/source/firefox-116.0b3.source.tar.xz"
    );
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sup.state(), DownloadState::Locating);
    assert!(!ws.engine_dir.exists());
    assert!(
        sink.lines(LogLevel::Warn)
            .iter()
            .any(|l| l.contains("beta"))
    );
}

#[cfg(any(target_os = "linux", target_os = "macos"))]
#[test]
fn downloads_and_unpacks_into_the_engine_dir() {
    let (_dir, ws) = setup();
    let sink = Arc::new(MemorySink::default());
    let ctx = ExecCtx::new(false, sink.clone());
    let (f, calls) = fetcher("115.0");

    // Leftover archive from an interrupted run is replaced.
    fs::create_dir_all(&ws.engines_dir).unwrap();
    let archive = ws.engines_dir.join("firefox-115.0.source.tar.xz");
    fs::write(&archive, "partial").unwrap();

    let mut sup = Supervisor::new(&ctx, &ws, options(Some("115.0")), f);
    let acquired = sup.run().expect("acquire");

    assert_eq!(sup.state(), DownloadState::Complete);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        acquired.url,
        "https://archive.mozilla.org/pub/firefox/releases/115.0/source/firefox-115.0.source.tar.xz"
    );
    assert_eq!(acquired.engine_dir, ws.engine_dir);
    assert!(ws.engine_dir.join("mach").is_file());
    assert!(ws.engine_dir.join("browser/branding/unofficial").is_dir());
    assert!(!ws.root.join("firefox-115.0").exists());
    assert!(!archive.exists());

    let meta = dotbuild::acquire::metadata::read(&ws.metadata_file)
        .unwrap()
        .expect("metadata written");
    assert_eq!(meta.version, "115.0");
    assert_eq!(meta.engine_dir, "engine");
    assert_eq!(meta.archive_url, acquired.url);

    // [init].skip short-circuits the init child without failing.
    assert!(!ws.engine_dir.join(".git").exists());
    assert!(
        sink.lines(LogLevel::Info)
            .iter()
            .any(|l| l.starts_with("skipping engine init"))
    );
}
