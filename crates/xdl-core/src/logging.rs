//! File logging for the `xdl` binary
//!
//! stdout carries NDJSON events in headless mode, so tracing output only ever
//! goes to a rolling file. Where that file lives, how it rotates and the
//! fallback filter come from the `[logging]` section of `xdl.toml`; `XDL_LOG`
//! overrides the filter.
//!
//! ```bash
//! XDL_LOG=debug xdl start
//! XDL_LOG=xdl_process=trace xdl start
//! ```

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::Result;

/// Environment variable holding a tracing filter directive
pub const LOG_ENV: &str = "XDL_LOG";

const DEFAULT_FILTER: &str = "xdl=info,xdl_core=info,xdl_process=info,xdl_app=info,warn";

/// How often a new log file is started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(rotation: LogRotation) -> Self {
        match rotation {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

/// `[logging]` settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogOptions {
    /// Log directory; the platform data dir when unset
    #[serde(default)]
    pub dir: Option<PathBuf>,

    #[serde(default = "default_file_name")]
    pub file_name: String,

    #[serde(default)]
    pub rotation: LogRotation,

    /// Filter used when `XDL_LOG` is unset or invalid
    #[serde(default = "default_filter")]
    pub filter: String,
}

impl Default for LogOptions {
    fn default() -> Self {
        Self {
            dir: None,
            file_name: default_file_name(),
            rotation: LogRotation::default(),
            filter: default_filter(),
        }
    }
}

fn default_file_name() -> String {
    "xdl.log".to_string()
}

fn default_filter() -> String {
    DEFAULT_FILTER.to_string()
}

impl LogOptions {
    pub fn directory(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("xdl")
                .join("logs")
        })
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_env(LOG_ENV)
            .or_else(|_| EnvFilter::try_new(&self.filter))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }

    /// Create the log directory and a rolling appender inside it
    pub fn appender(&self) -> Result<RollingFileAppender> {
        let dir = self.directory();
        std::fs::create_dir_all(&dir)?;
        Ok(RollingFileAppender::new(
            self.rotation.into(),
            dir,
            &self.file_name,
        ))
    }
}

/// Install the global subscriber. Returns the log directory.
pub fn init(options: &LogOptions) -> Result<PathBuf> {
    let file_appender = options.appender()?;

    tracing_subscriber::registry()
        .with(options.env_filter())
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_ansi(false)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .with_timer(fmt::time::ChronoLocal::new(
                    "%Y-%m-%d %H:%M:%S%.3f".to_string(),
                )),
        )
        .init();

    let log_dir = options.directory();
    tracing::info!("xdl {} logging to {}", env!("CARGO_PKG_VERSION"), log_dir.display());
    Ok(log_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_configured_dir_is_created_and_written() {
        let temp = tempfile::tempdir().unwrap();
        let options = LogOptions {
            dir: Some(temp.path().join("nested/logs")),
            file_name: "session.log".into(),
            rotation: LogRotation::Never,
            ..Default::default()
        };

        let mut appender = options.appender().unwrap();
        appender.write_all(b"hello\n").unwrap();
        appender.flush().unwrap();

        let written =
            std::fs::read_to_string(temp.path().join("nested/logs/session.log")).unwrap();
        assert_eq!(written, "hello\n");
    }

    #[test]
    fn test_default_dir_is_under_data_dir() {
        let options = LogOptions::default();
        assert!(options.directory().ends_with("xdl/logs"));
        assert_eq!(options.file_name, "xdl.log");
        assert_eq!(options.rotation, LogRotation::Daily);
    }

    #[test]
    fn test_rotation_names() {
        let options: LogOptions =
            serde_json::from_value(serde_json::json!({"rotation": "hourly"})).unwrap();
        assert_eq!(options.rotation, LogRotation::Hourly);
        assert_eq!(options.filter, DEFAULT_FILTER);
        assert!(serde_json::from_value::<LogOptions>(serde_json::json!({"rotation": "weekly"}))
            .is_err());
    }
}
