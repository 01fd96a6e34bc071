use std::io::{IsTerminal, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossterm::cursor::MoveToColumn;
use crossterm::style::Print;
use crossterm::terminal::{Clear, ClearType};

use crate::executor::format_elapsed_hms;

pub const TICK: Duration = Duration::from_millis(100);

/// The latest progress line of the running acquisition. Only the newest value
/// is kept.
#[derive(Debug, Clone, Default)]
pub struct ProgressText {
    inner: Arc<RwLock<String>>,
}

impl ProgressText {
    pub fn set(&self, text: impl Into<String>) {
        if let Ok(mut g) = self.inner.write() {
            *g = text.into();
        }
    }

    pub fn get(&self) -> String {
        self.inner.read().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn view(&self) -> ProgressView {
        ProgressView {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Read-only handle on a [`ProgressText`].
#[derive(Debug, Clone)]
pub struct ProgressView {
    inner: Arc<RwLock<String>>,
}

impl ProgressView {
    /// `None` when the writer holds the lock; the caller just skips a frame.
    pub fn try_current(&self) -> Option<String> {
        self.inner.try_read().ok().map(|g| g.clone())
    }
}

/// Turn one line of `tar -v` output into progress text: drop bsdtar's `x `
/// marker and the leading (engine) directory component.
pub fn tar_progress(line: &str) -> Option<String> {
    let line = line.trim();
    let line = line.strip_prefix("x ").unwrap_or(line);
    let (_, rest) = line.split_once('/')?;
    let rest = rest.trim_end_matches('/');
    (!rest.is_empty()).then(|| rest.to_string())
}

/// Drop the level label a child `dotbuild` puts in front of each log line.
pub fn strip_log_level(line: &str) -> &str {
    let trimmed = line.trim_start();
    match trimmed.split_once(' ') {
        Some((level, rest))
            if matches!(level, "TRACE" | "DEBUG" | "INFO" | "WARN" | "ERROR") =>
        {
            rest.trim_start()
        }
        _ => line,
    }
}

pub fn download_progress(received: u64, total: Option<u64>) -> String {
    const MIB: f64 = 1024.0 * 1024.0;
    let got = received as f64 / MIB;
    match total {
        Some(total) if total > 0 => format!(
            "downloaded {got:.1} MiB / {:.1} MiB ({}%)",
            total as f64 / MIB,
            received.saturating_mul(100) / total
        ),
        _ => format!("downloaded {got:.1} MiB"),
    }
}

pub fn status_line(elapsed: Duration, text: &str, width: Option<usize>) -> String {
    let line = format!("[{}] {}", format_elapsed_hms(elapsed.as_secs()), text);
    match width {
        Some(w) if line.chars().count() > w => line.chars().take(w).collect(),
        _ => line,
    }
}

/// Redraws `[elapsed] <progress>` on stderr every [`TICK`] until stopped.
pub struct ProgressReporter {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    /// Start ticking. With `enabled == false`, or when stderr is not a
    /// terminal, the timer runs but never draws.
    pub fn start(view: ProgressView, enabled: bool) -> Self {
        let draw = enabled && std::io::stderr().is_terminal();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            let started = Instant::now();
            while !flag.load(Ordering::Relaxed) {
                if draw && let Some(text) = view.try_current() {
                    redraw(&status_line(started.elapsed(), &text, terminal_width()));
                }
                std::thread::sleep(TICK);
            }
            if draw {
                redraw("");
            }
        });
        Self {
            stop,
            handle: Some(handle),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn terminal_width() -> Option<usize> {
    crossterm::terminal::size()
        .ok()
        .map(|(cols, _)| usize::from(cols).saturating_sub(1))
        .filter(|w| *w > 0)
}

fn redraw(line: &str) {
    let mut err = std::io::stderr();
    let _ = crossterm::execute!(err, MoveToColumn(0), Clear(ClearType::CurrentLine), Print(line));
    let _ = err.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tar_lines_lose_their_top_directory() {
        assert_eq!(
            tar_progress("engine/browser/app/moz.build").as_deref(),
            Some("browser/app/moz.build")
        );
        assert_eq!(
            tar_progress("x engine/dom/base/").as_deref(),
            Some("dom/base")
        );
        assert_eq!(tar_progress("engine/"), None);
        assert_eq!(tar_progress("README"), None);
    }

    #[test]
    fn child_log_levels_are_dropped() {
        assert_eq!(
            strip_log_level(" INFO initializing git repository in engine"),
            "initializing git repository in engine"
        );
        assert_eq!(strip_log_level("WARN  slow disk"), "slow disk");
        assert_eq!(strip_log_level("INFORMATION only"), "INFORMATION only");
        assert_eq!(strip_log_level("Receiving objects: 10%"), "Receiving objects: 10%");
    }

    #[test]
    fn download_progress_with_and_without_length() {
        assert_eq!(
            download_progress(1024 * 1024, Some(4 * 1024 * 1024)),
            "downloaded 1.0 MiB / 4.0 MiB (25%)"
        );
        assert_eq!(download_progress(512 * 1024, None), "downloaded 0.5 MiB");
    }

    #[test]
    fn status_line_has_elapsed_label_and_fits_width() {
        let line = status_line(Duration::from_secs(61), "dom/base/Element.cpp", None);
        assert_eq!(line, "[00:01:01] dom/base/Element.cpp");
        let short = status_line(Duration::from_secs(61), "dom/base/Element.cpp", Some(12));
        assert_eq!(short, "[00:01:01] d");
    }

    #[test]
    fn view_sees_latest_text_only() {
        let text = ProgressText::default();
        let view = text.view();
        text.set("first");
        text.set("second");
        assert_eq!(view.try_current().as_deref(), Some("second"));
    }

    #[test]
    fn reporter_stops_promptly() {
        let text = ProgressText::default();
        let reporter = ProgressReporter::start(text.view(), false);
        text.set("working");
        let start = Instant::now();
        reporter.stop();
        assert!(start.elapsed() < Duration::from_secs(2));
    }
}
