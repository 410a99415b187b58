//! # xdl-core - Core Domain Types
//!
//! Foundation crate for xdl. Provides domain types, error handling, log
//! records, and project configuration loading.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (serde, chrono, thiserror, semver, tracing).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`HostType`], [`LanType`], [`UrlType`] - URL construction options
//! - [`SessionStatus`] - Session status inferred from persisted ports
//! - [`LogLevel`] - Log severity (Debug, Info, Warn, Error)
//!
//! ### Events (`events`)
//! - [`ProcessEvent`] - Subprocess stdout/stderr/exit events
//! - [`LogRecord`], [`LogTag`] - Structured project log records
//! - [`TunnelStatus`] - Tunnel connection status
//!
//! ### Log Sink (`log_sink`)
//! - [`LogSink`] - Broadcast handle that mirrors project logs to `tracing`
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum with `fatal` vs `recoverable` classification
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//! - [`ResultExt`] - Extension trait for adding error context
//!
//! ### Project Config (`project`)
//! - [`read_config()`] - Load `app.json`/`exp.json` and `package.json`
//! - [`read_exprc()`] - Load `.exprc` overrides
//! - [`gte_sdk_version()`] - SDK version gating
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use xdl_core::prelude::*;
//! ```

pub mod error;
pub mod events;
pub mod log_sink;
pub mod logging;
pub mod project;
pub mod types;

/// Prelude for common imports used throughout all xdl crates
pub mod prelude {
    pub use super::error::{Error, Result, ResultExt};
    pub use tracing::{debug, error, info, instrument, trace, warn};
}

pub use error::{Error, Result, ResultExt};
pub use events::{LogEventType, LogRecord, LogTag, ProcessEvent, TunnelStatus};
pub use log_sink::LogSink;
pub use project::{
    determine_entry_point, gte_sdk_version, guess_main_module_path, read_config, read_exprc,
    ConfigSource, DetachConfig, ExpConfig, ExpRc, PackageJson, ProjectConfig,
};
pub use types::{HostType, LanType, LogLevel, SessionStatus, UrlType};
