//! Project log sink
//!
//! Every structured [`LogRecord`] produced during a session (packager output,
//! device logs, tunnel status) goes through a [`LogSink`]. Records are mirrored
//! to `tracing` and broadcast to any subscriber, e.g. the headless runner.

use tokio::sync::broadcast;

use crate::events::{LogEventType, LogRecord, LogTag};
use crate::types::LogLevel;

/// Default number of records buffered for slow subscribers
pub const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle for emitting project log records
#[derive(Debug, Clone)]
pub struct LogSink {
    tx: broadcast::Sender<LogRecord>,
}

impl LogSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to records emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<LogRecord> {
        self.tx.subscribe()
    }

    /// Emit a record. Never fails: with no subscribers the record is only traced.
    pub fn emit(&self, record: LogRecord) {
        match record.level {
            LogLevel::Debug => tracing::debug!(tag = record.tag.name(), "{}", record.message),
            LogLevel::Info => tracing::info!(tag = record.tag.name(), "{}", record.message),
            LogLevel::Warn => tracing::warn!(tag = record.tag.name(), "{}", record.message),
            LogLevel::Error => tracing::error!(tag = record.tag.name(), "{}", record.message),
        }
        let _ = self.tx.send(record);
    }

    pub fn log(&self, level: LogLevel, tag: LogTag, message: impl Into<String>) {
        self.emit(LogRecord::new(level, tag, message));
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, LogTag::Expo, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, LogTag::Expo, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, LogTag::Expo, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, LogTag::Expo, message);
    }

    /// Emit an `expo`-tagged info record marking a lifecycle milestone
    pub fn milestone(&self, event_type: LogEventType, message: impl Into<String>) {
        self.emit(LogRecord::new(LogLevel::Info, LogTag::Expo, message).with_event(event_type));
    }
}

impl Default for LogSink {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_records() {
        let sink = LogSink::default();
        let mut rx = sink.subscribe();

        sink.warn("tunnel reconnecting");
        let record = rx.recv().await.unwrap();
        assert_eq!(record.level, LogLevel::Warn);
        assert_eq!(record.tag, LogTag::Expo);
        assert_eq!(record.message, "tunnel reconnecting");
    }

    #[test]
    fn test_emit_without_subscribers_does_not_panic() {
        let sink = LogSink::new(4);
        for i in 0..10 {
            sink.info(format!("line {i}"));
        }
    }

    #[tokio::test]
    async fn test_milestone_carries_event_type() {
        let sink = LogSink::default();
        let mut rx = sink.subscribe();
        sink.milestone(LogEventType::PackagerReady, "Packager ready.");
        let record = rx.recv().await.unwrap();
        assert_eq!(record.event_type, Some(LogEventType::PackagerReady));
    }
}
