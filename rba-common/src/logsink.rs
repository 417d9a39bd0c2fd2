//! Log sink abstraction for acquisition output.
//!
//! The core never writes to a logger directly: it speaks to a [`BuildLog`]
//! sink, and every line passes through the job's [`SecretRegistry`] before
//! emission. The tracing-backed sink is what the agent wires up in
//! production; the recording sink backs assertions in tests.

use crate::secrets::SecretRegistry;
use std::sync::Mutex;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Sink for acquisition output. Implementations must serialize writes;
/// acquisitions from concurrent jobs share the process-wide sinks.
pub trait BuildLog: Send + Sync {
    /// Command/tool output line.
    fn output(&self, line: &str);
    fn debug(&self, line: &str);
    fn warning(&self, line: &str);
    fn error(&self, line: &str);
    /// Echo of an external command about to run.
    fn command(&self, line: &str);
    /// Coarse progress for the hosting UI.
    fn progress(&self, percent: u8, message: &str);
    /// Register a secret to mask in all subsequent output.
    fn set_secret(&self, value: &str);
}

/// Production sink: masks through the job's secret registry, then emits
/// `tracing` events. The subscriber serializes writes.
#[derive(Debug, Clone)]
pub struct TracingLog {
    secrets: SecretRegistry,
}

impl TracingLog {
    pub fn new(secrets: SecretRegistry) -> Self {
        Self { secrets }
    }

    pub fn secrets(&self) -> &SecretRegistry {
        &self.secrets
    }
}

impl BuildLog for TracingLog {
    fn output(&self, line: &str) {
        tracing::info!("{}", self.secrets.mask(line));
    }

    fn debug(&self, line: &str) {
        tracing::debug!("{}", self.secrets.mask(line));
    }

    fn warning(&self, line: &str) {
        tracing::warn!("{}", self.secrets.mask(line));
    }

    fn error(&self, line: &str) {
        tracing::error!("{}", self.secrets.mask(line));
    }

    fn command(&self, line: &str) {
        tracing::info!(kind = "command", "{}", self.secrets.mask(line));
    }

    fn progress(&self, percent: u8, message: &str) {
        tracing::info!(percent, "{}", self.secrets.mask(message));
    }

    fn set_secret(&self, value: &str) {
        self.secrets.add(value);
    }
}

/// Captured log line kinds, for assertions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Output,
    Debug,
    Warning,
    Error,
    Command,
    Progress,
}

/// Test sink that records every (masked) line it receives.
#[derive(Debug, Default)]
pub struct RecordingLog {
    secrets: SecretRegistry,
    lines: Mutex<Vec<(LogKind, String)>>,
}

impl RecordingLog {
    pub fn new(secrets: SecretRegistry) -> Self {
        Self {
            secrets,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub fn lines(&self) -> Vec<(LogKind, String)> {
        self.lines.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn lines_of(&self, kind: LogKind) -> Vec<String> {
        self.lines()
            .into_iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, line)| line)
            .collect()
    }

    fn push(&self, kind: LogKind, line: &str) {
        self.lines
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((kind, self.secrets.mask(line)));
    }
}

impl BuildLog for RecordingLog {
    fn output(&self, line: &str) {
        self.push(LogKind::Output, line);
    }

    fn debug(&self, line: &str) {
        self.push(LogKind::Debug, line);
    }

    fn warning(&self, line: &str) {
        self.push(LogKind::Warning, line);
    }

    fn error(&self, line: &str) {
        self.push(LogKind::Error, line);
    }

    fn command(&self, line: &str) {
        self.push(LogKind::Command, line);
    }

    fn progress(&self, percent: u8, message: &str) {
        self.push(LogKind::Progress, &format!("{percent}% {message}"));
    }

    fn set_secret(&self, value: &str) {
        self.secrets.add(value);
    }
}

/// Initialize the process-wide tracing subscriber.
///
/// `level` is the default filter; `RUST_LOG` still takes precedence when
/// set.
pub fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_log_masks_secrets() {
        let secrets = SecretRegistry::new();
        secrets.add("sekret");
        let log = RecordingLog::new(secrets);
        log.output("token is sekret end");
        assert_eq!(log.lines_of(LogKind::Output), vec!["token is *** end"]);
    }

    #[test]
    fn test_set_secret_applies_to_later_lines() {
        let log = RecordingLog::new(SecretRegistry::new());
        log.set_secret("hushhush");
        log.error("failed with hushhush");
        assert_eq!(log.lines_of(LogKind::Error), vec!["failed with ***"]);
    }

    #[test]
    fn test_progress_records_percent() {
        let log = RecordingLog::new(SecretRegistry::new());
        log.progress(80, "checking out");
        assert_eq!(log.lines_of(LogKind::Progress), vec!["80% checking out"]);
    }
}
