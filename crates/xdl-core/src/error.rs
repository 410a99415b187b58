//! Application error types with rich context

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Application error types organized by layer/domain
#[derive(Debug, Error)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Common/Infrastructure Errors
    // ─────────────────────────────────────────────────────────────
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Invalid option `{field}`: {message}")]
    InvalidOptions { field: String, message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {message}")]
    ConfigInvalid { message: String },

    #[error("No app.json or exp.json found in: {path}")]
    NoProject { path: PathBuf },

    #[error("Hostname cannot be inferred.")]
    HostnameNotInferred,

    // ─────────────────────────────────────────────────────────────
    // Process Lifecycle Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Node.js not found. Ensure 'node' is in your PATH.")]
    NodeNotFound,

    #[error("Failed to spawn {program}: {reason}")]
    ProcessSpawn { program: String, reason: String },

    #[error("Packager process exited unexpectedly with code: {code:?}")]
    PackagerExited { code: Option<i32> },

    #[error("Connecting to the packager at {url} timed out after {waited_ms}ms")]
    PackagerTimeout { url: String, waited_ms: u64 },

    #[error("Process error: {message}")]
    Process { message: String },

    #[error("No packager found for project at {root}.")]
    NoPackagerPort { root: PathBuf },

    #[error("No manifest server found for project at {root}.")]
    NoManifestServerPort { root: PathBuf },

    // ─────────────────────────────────────────────────────────────
    // Tunnel Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Tunnel error: {message}")]
    Tunnel {
        message: String,
        /// Raw error payload reported by the tunnel provider, if any.
        payload: Option<serde_json::Value>,
    },

    #[error("Starting tunnels timed out")]
    TunnelsTimedOut,

    // ─────────────────────────────────────────────────────────────
    // Network / API Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Could not reach server: {message}")]
    Network { message: String },

    #[error("Server error ({code}): {message}")]
    Api { code: String, message: String },

    #[error("Malformed server response: {message}")]
    MalformedResponse { message: String },

    #[error("Not logged in")]
    NotLoggedIn,

    // ─────────────────────────────────────────────────────────────
    // Channel/Communication Errors
    // ─────────────────────────────────────────────────────────────
    #[error("Channel send error: {message}")]
    ChannelSend { message: String },

    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

// ─────────────────────────────────────────────────────────────────
// Convenience Constructors
// ─────────────────────────────────────────────────────────────────

impl Error {
    pub fn invalid_option(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidOptions {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn config_invalid(message: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            message: message.into(),
        }
    }

    pub fn process(message: impl Into<String>) -> Self {
        Self::Process {
            message: message.into(),
        }
    }

    pub fn process_spawn(program: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ProcessSpawn {
            program: program.into(),
            reason: reason.into(),
        }
    }

    pub fn tunnel(message: impl Into<String>) -> Self {
        Self::Tunnel {
            message: message.into(),
            payload: None,
        }
    }

    pub fn tunnel_with_payload(message: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::Tunnel {
            message: message.into(),
            payload: Some(payload),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::MalformedResponse {
            message: message.into(),
        }
    }

    pub fn channel_send(message: impl Into<String>) -> Self {
        Self::ChannelSend {
            message: message.into(),
        }
    }

    /// Check if this is a recoverable error
    ///
    /// Recoverable errors are transient: the caller may retry the same operation.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network { .. }
                | Error::Tunnel { .. }
                | Error::TunnelsTimedOut
                | Error::PackagerTimeout { .. }
                | Error::ChannelSend { .. }
        )
    }

    /// Check if this error should abort the session start
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::NodeNotFound
                | Error::NoProject { .. }
                | Error::ProcessSpawn { .. }
                | Error::InvalidOptions { .. }
                | Error::ConfigInvalid { .. }
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Context Extensions
// ─────────────────────────────────────────────────────────────────

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Log the error under `context` and pass it on unchanged
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let err = e.into();
            tracing::error!("{}: {:?}", context.into(), err);
            err
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = Error::invalid_option("hostType", "expected one of localhost, lan, tunnel");
        assert_eq!(
            err.to_string(),
            "Invalid option `hostType`: expected one of localhost, lan, tunnel"
        );

        let err = Error::NodeNotFound;
        assert!(err.to_string().contains("Node.js not found"));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_fatal() {
        assert!(Error::NodeNotFound.is_fatal());
        assert!(Error::NoProject {
            path: PathBuf::from("/test")
        }
        .is_fatal());
        assert!(Error::invalid_option("urlType", "bad").is_fatal());
        assert!(!Error::network("connection refused").is_fatal());
    }

    #[test]
    fn test_context_converts_and_keeps_error() {
        let io: std::result::Result<(), std::io::Error> = Err(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "denied",
        ));
        let err = io.context("Failed to write settings").unwrap_err();
        assert!(matches!(err, Error::Io(_)));

        let err = Err::<(), _>(Error::NodeNotFound)
            .context("Failed to start packager")
            .unwrap_err();
        assert!(matches!(err, Error::NodeNotFound));
    }

    #[test]
    fn test_error_is_recoverable() {
        assert!(Error::network("connection refused").is_recoverable());
        assert!(Error::tunnel("failed").is_recoverable());
        assert!(Error::TunnelsTimedOut.is_recoverable());
        assert!(!Error::api("INVALID", "bad request").is_recoverable());
        assert!(!Error::NodeNotFound.is_recoverable());
    }

    #[test]
    fn test_network_and_api_errors_are_distinguishable() {
        let unreachable = Error::network("dns failure");
        let erroring = Error::api("INTERNAL", "boom");
        assert!(unreachable.to_string().starts_with("Could not reach server"));
        assert!(erroring.to_string().starts_with("Server error"));
    }

    #[test]
    fn test_tunnel_error_keeps_payload() {
        let payload = serde_json::json!({"error_code": 103, "msg": "already bound"});
        let err = Error::tunnel_with_payload("failed to start tunnel", payload.clone());
        match err {
            Error::Tunnel {
                payload: Some(p), ..
            } => assert_eq!(p, payload),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_packager_timeout_message() {
        let err = Error::PackagerTimeout {
            url: "http://localhost:19001/status".to_string(),
            waited_ms: 30_000,
        };
        assert!(err.to_string().contains("http://localhost:19001/status"));
        assert!(err.to_string().contains("30000ms"));
    }
}
