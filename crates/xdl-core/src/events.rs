//! Domain event definitions

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::types::LogLevel;

// ─────────────────────────────────────────────────────────
// Subprocess Events
// ─────────────────────────────────────────────────────────

/// Raw events produced by a supervised subprocess
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    /// A line written to stdout
    Stdout(String),
    /// A line written to stderr
    Stderr(String),
    /// The process exited; `code` is `None` when killed by a signal
    Exited { code: Option<i32> },
}

// ─────────────────────────────────────────────────────────
// Tunnel Events
// ─────────────────────────────────────────────────────────

/// Connection status reported by the tunnel client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelStatus {
    Online,
    Reconnecting,
    Closed,
}

// ─────────────────────────────────────────────────────────
// Project Log Records
// ─────────────────────────────────────────────────────────

/// Where a project log record came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "tag", rename_all = "lowercase")]
pub enum LogTag {
    /// Messages produced by xdl itself
    Expo,
    /// Output from the bundler subprocess
    Packager,
    /// Logs pushed by a device through `POST /logs`
    Device {
        #[serde(rename = "deviceId")]
        device_id: String,
        #[serde(rename = "deviceName")]
        device_name: String,
        #[serde(rename = "groupDepth", skip_serializing_if = "Option::is_none")]
        group_depth: Option<u32>,
        #[serde(rename = "shouldHide")]
        should_hide: bool,
        #[serde(rename = "includesStack")]
        includes_stack: bool,
    },
}

impl LogTag {
    pub fn name(&self) -> &'static str {
        match self {
            LogTag::Expo => "expo",
            LogTag::Packager => "packager",
            LogTag::Device { .. } => "device",
        }
    }
}

/// Notable lifecycle milestones attached to a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEventType {
    PackagerReady,
    TunnelReady,
    ManifestServerReady,
}

/// A structured log record for a project session
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: LogLevel,
    #[serde(flatten)]
    pub tag: LogTag,
    pub message: String,
    #[serde(rename = "eventType", skip_serializing_if = "Option::is_none")]
    pub event_type: Option<LogEventType>,
}

impl LogRecord {
    /// Create a new record with the current timestamp
    pub fn new(level: LogLevel, tag: LogTag, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            tag,
            message: message.into(),
            event_type: None,
        }
    }

    pub fn with_event(mut self, event_type: LogEventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Format for single-line display
    pub fn display_line(&self) -> String {
        format!(
            "{} {} [{}] {}",
            self.timestamp.format("%H:%M:%S"),
            self.level.prefix(),
            self.tag.name(),
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_record_serializes_flat() {
        let record = LogRecord::new(
            LogLevel::Warn,
            LogTag::Device {
                device_id: "abc".to_string(),
                device_name: "Pixel".to_string(),
                group_depth: Some(1),
                should_hide: false,
                includes_stack: true,
            },
            "careful",
        );
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["tag"], "device");
        assert_eq!(value["deviceId"], "abc");
        assert_eq!(value["deviceName"], "Pixel");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["includesStack"], true);
        assert!(value.get("eventType").is_none());
    }

    #[test]
    fn test_display_line_contains_tag() {
        let record = LogRecord::new(LogLevel::Info, LogTag::Packager, "Bundling");
        let line = record.display_line();
        assert!(line.contains("[packager]"));
        assert!(line.contains("INF"));
        assert!(line.ends_with("Bundling"));
    }

    #[test]
    fn test_event_type_serialization() {
        let record =
            LogRecord::new(LogLevel::Info, LogTag::Expo, "Tunnel ready.").with_event(LogEventType::TunnelReady);
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["eventType"], "TUNNEL_READY");
    }
}
