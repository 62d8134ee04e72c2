//! Bounded in-memory log shared by every daemon component

use chrono::{DateTime, Utc};
use forgepm_core::{LogEntry, LogLevel, LOG_BUFFER_CAPACITY};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Ring of the most recent log entries
///
/// Entries are mirrored to `tracing` so the daemon's own log carries them
/// too. Once full, the oldest entry is dropped.
pub struct LogSink {
    entries: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(LOG_BUFFER_CAPACITY)
    }
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(LOG_BUFFER_CAPACITY))),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&self, level: LogLevel, instance: Option<&str>, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            instance: instance.map(str::to_string),
            message: message.into(),
        };

        let scope = entry.instance.as_deref().unwrap_or("-");
        match level {
            LogLevel::Info => tracing::info!(instance = scope, "{}", entry.message),
            LogLevel::Warn => tracing::warn!(instance = scope, "{}", entry.message),
            LogLevel::Error => tracing::error!(instance = scope, "{}", entry.message),
        }

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    pub fn info(&self, instance: Option<&str>, message: impl Into<String>) {
        self.push(LogLevel::Info, instance, message);
    }

    pub fn warn(&self, instance: Option<&str>, message: impl Into<String>) {
        self.push(LogLevel::Warn, instance, message);
    }

    pub fn error(&self, instance: Option<&str>, message: impl Into<String>) {
        self.push(LogLevel::Error, instance, message);
    }

    /// Last `n` entries, optionally only those tagged with `instance`
    pub fn tail(&self, n: usize, instance: Option<&str>) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        let mut out: Vec<LogEntry> = entries
            .iter()
            .rev()
            .filter(|e| instance.map_or(true, |id| e.instance.as_deref() == Some(id)))
            .take(n)
            .cloned()
            .collect();
        out.reverse();
        out
    }

    /// Entries newer than `since`
    pub fn since(&self, since: DateTime<Utc>) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.timestamp > since)
            .cloned()
            .collect()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
