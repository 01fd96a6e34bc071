use std::fmt;
use std::process::Command;
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};

mod lines;

pub use lines::{LineStream, clean_line, spawn_lines};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecEvent {
    Log { level: LogLevel, line: String },
    StepStarted { id: String },
    StepFinished { id: String, ok: bool, elapsed_ms: u128 },
}

pub trait ExecSink: Send + Sync {
    fn emit(&self, ev: ExecEvent);
}

/// Forwards events to `tracing`; the subscriber decides what is shown.
#[derive(Debug, Default)]
pub struct TracingSink;

impl ExecSink for TracingSink {
    fn emit(&self, ev: ExecEvent) {
        match ev {
            ExecEvent::Log { level, line } => match level {
                LogLevel::Debug => tracing::debug!("{line}"),
                LogLevel::Info => tracing::info!("{line}"),
                LogLevel::Warn => tracing::warn!("{line}"),
            },
            ExecEvent::StepStarted { id } => tracing::info!(step = %id, "started"),
            ExecEvent::StepFinished { id, ok, elapsed_ms } => {
                let elapsed_ms = u64::try_from(elapsed_ms).unwrap_or(u64::MAX);
                if ok {
                    tracing::info!(step = %id, elapsed_ms, "done");
                } else {
                    tracing::error!(step = %id, elapsed_ms, "failed");
                }
            }
        }
    }
}

/// Keeps every event; used by tests and anything that wants to inspect output.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<ExecEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<ExecEvent> {
        self.events.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn lines(&self, level: LogLevel) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|ev| match ev {
                ExecEvent::Log { level: l, line } if l == level => Some(line),
                _ => None,
            })
            .collect()
    }
}

impl ExecSink for MemorySink {
    fn emit(&self, ev: ExecEvent) {
        if let Ok(mut g) = self.events.lock() {
            g.push(ev);
        }
    }
}

#[derive(Clone)]
pub struct ExecCtx {
    pub dry_run: bool,
    pub sink: Arc<dyn ExecSink>,
}

impl ExecCtx {
    pub fn new(dry_run: bool, sink: Arc<dyn ExecSink>) -> Self {
        Self { dry_run, sink }
    }

    pub fn emit(&self, level: LogLevel, msg: &str) {
        self.sink.emit(ExecEvent::Log {
            level,
            line: msg.to_string(),
        });
    }

    pub fn log(&self, msg: &str) {
        self.emit(LogLevel::Info, msg);
    }

    pub fn debug(&self, msg: &str) {
        self.emit(LogLevel::Debug, msg);
    }

    pub fn warn(&self, msg: &str) {
        self.emit(LogLevel::Warn, msg);
    }

    /// Run `cmd`, logging each output line at Info.
    pub fn run_cmd(&self, cmd: Command) -> Result<()> {
        self.run_cmd_at(LogLevel::Info, cmd)
    }

    pub fn run_cmd_at(&self, level: LogLevel, cmd: Command) -> Result<()> {
        if self.dry_run {
            self.log(&format!("DRY-RUN: {:?}", cmd));
            return Ok(());
        }
        let mut lines = spawn_lines(cmd)?;
        for line in lines.by_ref() {
            self.emit(level, &line);
        }
        lines.finish()
    }

    /// Run `f` as a named step, reporting start/finish around it.
    pub fn step<T>(&self, id: &str, f: impl FnOnce(&Self) -> Result<T>) -> Result<T> {
        self.sink.emit(ExecEvent::StepStarted { id: id.to_string() });
        let start = std::time::Instant::now();
        let res = f(self);
        self.sink.emit(ExecEvent::StepFinished {
            id: id.to_string(),
            ok: res.is_ok(),
            elapsed_ms: start.elapsed().as_millis(),
        });
        res.map_err(|e| Error::msg(format!("{id}: {e}")))
    }
}

pub fn format_elapsed_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elapsed_is_zero_padded() {
        assert_eq!(format_elapsed_hms(0), "00:00:00");
        assert_eq!(format_elapsed_hms(3725), "01:02:05");
    }

    #[test]
    fn step_reports_failure_with_its_id() {
        let sink = Arc::new(MemorySink::default());
        let ctx = ExecCtx::new(false, sink.clone());
        let err = ctx
            .step("engine.unpack", |_| -> Result<()> { Err(Error::msg("boom")) })
            .unwrap_err()
            .to_string();
        assert_eq!(err, "engine.unpack: boom");
        assert!(sink.events().iter().any(|ev| matches!(
            ev,
            ExecEvent::StepFinished { id, ok: false, .. } if id == "engine.unpack"
        )));
    }

    #[test]
    fn dry_run_logs_instead_of_spawning() {
        let sink = Arc::new(MemorySink::default());
        let ctx = ExecCtx::new(true, sink.clone());
        ctx.run_cmd(Command::new("definitely-not-a-real-binary"))
            .expect("dry run");
        let info = sink.lines(LogLevel::Info);
        assert!(info[0].starts_with("DRY-RUN:"), "got {info:?}");
    }
}
