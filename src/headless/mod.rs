//! Headless mode - NDJSON event output
//!
//! `xdl start` writes one JSON object per line to stdout so that scripts and
//! editors can follow a session without parsing human-oriented text.
//!
//! # Example Output
//!
//! ```json
//! {"event":"log","level":"info","tag":"expo","message":"Manifest server listening on 19000","eventType":"MANIFEST_SERVER_READY","timestamp":1704700001000}
//! {"event":"started","root":"/work/app","expo_server_port":19000,"packager_port":19001,"manifest_url":"exp://192.168.1.5:19000","tunnel_url":null,"timestamp":1704700002000}
//! {"event":"stopped","reason":"interrupted","timestamp":1704700009000}
//! ```

pub mod runner;

use std::io::{self, Write};
use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use tracing::error;
use xdl_app::StartedSession;
use xdl_core::{LogEventType, LogLevel, LogRecord};

pub use runner::run_headless;

/// Events emitted in headless mode
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HeadlessEvent {
    /// Manifest server and packager are up
    Started {
        root: String,
        expo_server_port: u16,
        packager_port: u16,
        manifest_url: Option<String>,
        tunnel_url: Option<String>,
        timestamp: i64,
    },

    /// A project log record
    Log {
        level: LogLevel,
        tag: &'static str,
        message: String,
        #[serde(rename = "eventType", skip_serializing_if = "Option::is_none")]
        event_type: Option<LogEventType>,
        timestamp: i64,
    },

    /// Session torn down
    Stopped {
        reason: Option<String>,
        timestamp: i64,
    },

    /// Error occurred
    Error {
        message: String,
        fatal: bool,
        timestamp: i64,
    },
}

impl HeadlessEvent {
    /// Emit this event to stdout as one JSON line
    pub fn emit(&self) {
        let json = match serde_json::to_string(self) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize headless event: {}", e);
                return;
            }
        };

        let mut stdout = io::stdout().lock();
        if let Err(e) = writeln!(stdout, "{}", json) {
            error!("Failed to write headless event to stdout: {}", e);
            return;
        }
        if let Err(e) = stdout.flush() {
            error!("Failed to flush headless stdout: {}", e);
        }
    }

    fn now() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub fn started(root: &Path, started: &StartedSession) -> Self {
        Self::Started {
            root: root.display().to_string(),
            expo_server_port: started.expo_server_port,
            packager_port: started.packager_port,
            manifest_url: started.manifest_url.clone(),
            tunnel_url: started.tunnels.as_ref().map(|t| t.expo_server_url.clone()),
            timestamp: Self::now(),
        }
    }

    pub fn log(record: &LogRecord) -> Self {
        Self::Log {
            level: record.level,
            tag: record.tag.name(),
            message: record.message.clone(),
            event_type: record.event_type,
            timestamp: record.timestamp.timestamp_millis(),
        }
    }

    pub fn stopped(reason: Option<String>) -> Self {
        Self::Stopped {
            reason,
            timestamp: Self::now(),
        }
    }

    /// A failure; `fatal` tells consumers a retry will not help
    pub fn error(err: &xdl_core::Error) -> Self {
        Self::Error {
            message: err.to_string(),
            fatal: err.is_fatal(),
            timestamp: Self::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xdl_app::TunnelUrls;
    use xdl_core::LogTag;

    fn to_value(event: &HeadlessEvent) -> serde_json::Value {
        let json = serde_json::to_string(event).expect("serialization failed");
        serde_json::from_str(&json).expect("invalid JSON")
    }

    #[test]
    fn test_started_serialization() {
        let started = StartedSession {
            expo_server_port: 19000,
            packager_port: 19001,
            tunnels: Some(TunnelUrls {
                expo_server_url: "https://abc.jane.app.exp.direct".to_string(),
                packager_url: "https://packager.abc.jane.app.exp.direct".to_string(),
            }),
            manifest_url: Some("exp://abc.jane.app.exp.direct:80".to_string()),
        };
        let value = to_value(&HeadlessEvent::started(Path::new("/work/app"), &started));

        assert_eq!(value["event"], "started");
        assert_eq!(value["root"], "/work/app");
        assert_eq!(value["expo_server_port"], 19000);
        assert_eq!(value["packager_port"], 19001);
        assert_eq!(value["tunnel_url"], "https://abc.jane.app.exp.direct");
        assert!(value["timestamp"].is_number());
    }

    #[test]
    fn test_log_serialization() {
        let mut record = LogRecord::new(LogLevel::Warn, LogTag::Packager, "Loading dependency graph");
        record.event_type = Some(LogEventType::PackagerReady);
        let value = to_value(&HeadlessEvent::log(&record));

        assert_eq!(value["event"], "log");
        assert_eq!(value["level"], "warn");
        assert_eq!(value["tag"], "packager");
        assert_eq!(value["message"], "Loading dependency graph");
        assert_eq!(value["eventType"], "PACKAGER_READY");
    }

    #[test]
    fn test_log_without_event_type_omits_field() {
        let record = LogRecord::new(LogLevel::Info, LogTag::Expo, "hello");
        let value = to_value(&HeadlessEvent::log(&record));
        assert!(value.get("eventType").is_none());
    }

    #[test]
    fn test_stopped_and_error_serialization() {
        let value = to_value(&HeadlessEvent::stopped(Some("interrupted".to_string())));
        assert_eq!(value["event"], "stopped");
        assert_eq!(value["reason"], "interrupted");

        let value = to_value(&HeadlessEvent::error(&xdl_core::Error::NodeNotFound));
        assert_eq!(value["event"], "error");
        assert_eq!(value["fatal"], true);
    }

    #[test]
    fn test_transient_error_is_not_fatal() {
        let err = xdl_core::Error::network("connection refused");
        let value = to_value(&HeadlessEvent::error(&err));
        assert_eq!(value["fatal"], false);
        assert_eq!(value["message"], err.to_string());
    }
}
