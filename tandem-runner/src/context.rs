//! Execution context for a single action
//!
//! Contains the state an action needs while it runs:
//! - Identity of the run and action (for tracing)
//! - Log buffer collecting diagnostic output
//! - Cancellation signal raised by the controller
//!
//! The controller keeps a handle to the context so the captured diagnostics
//! survive even when the action task itself is aborted.

use std::sync::{Arc, Mutex};
use tandem_core::domain::log::{LogEntry, LogLevel};
use tokio::sync::watch;
use uuid::Uuid;

/// Execution context shared between an action and its controller
pub struct ActionContext {
    pub run_id: Uuid,
    pub action: String,
    log_buffer: Mutex<Vec<LogEntry>>,
    cancel: watch::Sender<bool>,
}

impl ActionContext {
    /// Creates a new action context
    pub fn new(run_id: Uuid, action: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            run_id,
            action: action.into(),
            log_buffer: Mutex::new(Vec::new()),
            cancel: watch::Sender::new(false),
        })
    }

    /// Asks the action to stop; actions observe it through `cancelled`
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Resolves once `cancel` has been called
    pub async fn cancelled(&self) {
        let mut rx = self.cancel.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Adds a log entry to the buffer
    pub fn add_log(&self, entry: LogEntry) {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.push(entry);
    }

    pub fn log_debug(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Debug, message));
    }

    pub fn log_info(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Info, message));
    }

    pub fn log_warning(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Warning, message));
    }

    pub fn log_error(&self, message: impl Into<String>) {
        self.add_log(LogEntry::new(LogLevel::Error, message));
    }

    /// Logs captured process output line by line
    pub fn log_output(&self, output: &str, level: LogLevel) {
        for line in output.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
            self.add_log(LogEntry::new(level, line));
        }
    }

    /// Drains all log entries from the buffer
    pub fn drain_logs(&self) -> Vec<LogEntry> {
        let mut buffer = self.log_buffer.lock().unwrap();
        buffer.drain(..).collect()
    }
}
