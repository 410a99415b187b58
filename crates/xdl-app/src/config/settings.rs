//! xdl configuration (`~/.expo/xdl.toml`)
//!
//! Every section is optional. A missing file gives defaults; a corrupt one
//! gives defaults with a warning. Environment overrides are applied on top by
//! [`XdlConfig::apply_env`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use xdl_core::logging::LogOptions;
use xdl_core::prelude::*;
use xdl_process::output::{DEFAULT_DEBUG_PATTERNS, DEFAULT_SUPPRESS_PATTERNS};
use xdl_process::readiness::DEFAULT_STATUS_MARKER;
use xdl_process::OutputPatterns;

use super::user::user_settings_dir;

const CONFIG_FILENAME: &str = "xdl.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct XdlConfig {
    /// Never touch the network (no tunnels, signing or heartbeat)
    #[serde(default)]
    pub offline: bool,

    /// Reported as `developer.tool` in manifests
    #[serde(default = "default_developer_tool")]
    pub developer_tool: String,

    #[serde(default)]
    pub api: ApiSettings,

    #[serde(default)]
    pub packager: PackagerSettings,

    #[serde(default)]
    pub tunnel: TunnelSettings,

    #[serde(default)]
    pub session: SessionSettings,

    #[serde(default)]
    pub logging: LogOptions,
}

impl Default for XdlConfig {
    fn default() -> Self {
        Self {
            offline: false,
            developer_tool: default_developer_tool(),
            api: ApiSettings::default(),
            packager: PackagerSettings::default(),
            tunnel: TunnelSettings::default(),
            session: SessionSettings::default(),
            logging: LogOptions::default(),
        }
    }
}

fn default_developer_tool() -> String {
    "xdl".to_string()
}

/// Remote API location
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ApiSettings {
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            scheme: default_scheme(),
            host: default_host(),
            port: None,
        }
    }
}

fn default_scheme() -> String {
    "https".to_string()
}

fn default_host() -> String {
    "exp.host".to_string()
}

impl ApiSettings {
    /// Base URL of the v2 API, always ending in `/`
    pub fn base_url(&self) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}/--/api/v2/", self.scheme, self.host, port),
            None => format!("{}://{}/--/api/v2/", self.scheme, self.host),
        }
    }
}

/// Packager supervision
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PackagerSettings {
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    #[serde(default = "default_status_marker")]
    pub status_marker: String,
    #[serde(default = "default_suppress_patterns")]
    pub suppress_patterns: Vec<String>,
    #[serde(default = "default_debug_patterns")]
    pub debug_patterns: Vec<String>,
    #[serde(default)]
    pub max_workers: Option<u32>,
}

impl Default for PackagerSettings {
    fn default() -> Self {
        Self {
            ready_timeout_secs: default_ready_timeout(),
            status_marker: default_status_marker(),
            suppress_patterns: default_suppress_patterns(),
            debug_patterns: default_debug_patterns(),
            max_workers: None,
        }
    }
}

fn default_ready_timeout() -> u64 {
    30
}

fn default_status_marker() -> String {
    DEFAULT_STATUS_MARKER.to_string()
}

fn default_suppress_patterns() -> Vec<String> {
    DEFAULT_SUPPRESS_PATTERNS.iter().map(|s| s.to_string()).collect()
}

fn default_debug_patterns() -> Vec<String> {
    DEFAULT_DEBUG_PATTERNS.iter().map(|s| s.to_string()).collect()
}

impl PackagerSettings {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn output_patterns(&self) -> OutputPatterns {
        OutputPatterns {
            suppress: self.suppress_patterns.clone(),
            debug: self.debug_patterns.clone(),
        }
    }
}

/// Tunnel provider
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TunnelSettings {
    #[serde(default = "default_domain")]
    pub domain: String,
    #[serde(default)]
    pub authtoken: Option<String>,
    #[serde(default = "default_tunnel_timeout")]
    pub timeout_secs: u64,
    /// Explicit ngrok binary; looked up on PATH when unset
    #[serde(default)]
    pub ngrok_path: Option<PathBuf>,
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            domain: default_domain(),
            authtoken: None,
            timeout_secs: default_tunnel_timeout(),
            ngrok_path: None,
        }
    }
}

fn default_domain() -> String {
    "exp.direct".to_string()
}

fn default_tunnel_timeout() -> u64 {
    10
}

impl TunnelSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Session orchestration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SessionSettings {
    #[serde(default = "default_heartbeat")]
    pub heartbeat_secs: u64,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat(),
            stop_timeout_ms: default_stop_timeout(),
        }
    }
}

fn default_heartbeat() -> u64 {
    20
}

fn default_stop_timeout() -> u64 {
    2000
}

impl SessionSettings {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl XdlConfig {
    /// Default config file location
    pub fn default_path() -> PathBuf {
        user_settings_dir().join(CONFIG_FILENAME)
    }

    /// Load from `path`, falling back to defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            debug!("No config file at {:?}, using defaults", path);
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => {
                    debug!("Loaded config from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse {:?}: {}", path, e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    /// Load from the default location and apply environment overrides
    pub fn load_default() -> Self {
        let mut config = Self::load(&Self::default_path());
        config.apply_env();
        config
    }

    /// Apply `EXPO_OFFLINE`, `EXPO_STAGING` and `EXPO_LOCAL`
    pub fn apply_env(&mut self) {
        if env_flag("EXPO_OFFLINE") {
            self.offline = true;
        }
        if env_flag("EXPO_LOCAL") {
            self.api = ApiSettings {
                scheme: "http".to_string(),
                host: "localhost".to_string(),
                port: Some(3000),
            };
        } else if env_flag("EXPO_STAGING") {
            self.api.host = "staging.exp.host".to_string();
        }
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| !v.is_empty() && v != "0" && !v.eq_ignore_ascii_case("false"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use xdl_core::logging::LogRotation;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = XdlConfig::default();
        assert!(!config.offline);
        assert_eq!(config.api.base_url(), "https://exp.host/--/api/v2/");
        assert_eq!(config.packager.ready_timeout(), Duration::from_secs(30));
        assert_eq!(config.session.heartbeat_interval(), Duration::from_secs(20));
        assert_eq!(config.session.stop_timeout(), Duration::from_millis(2000));
        assert_eq!(config.tunnel.timeout(), Duration::from_secs(10));
        assert_eq!(config.packager.output_patterns(), OutputPatterns::default());
    }

    #[test]
    fn test_partial_file() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("xdl.toml");
        std::fs::write(
            &path,
            r#"
offline = true

[tunnel]
authtoken = "abc"

[session]
heartbeat_secs = 5

[logging]
dir = "/var/log/xdl"
rotation = "never"
"#,
        )
        .unwrap();

        let config = XdlConfig::load(&path);
        assert!(config.offline);
        assert_eq!(config.tunnel.authtoken.as_deref(), Some("abc"));
        assert_eq!(config.tunnel.domain, "exp.direct");
        assert_eq!(config.session.heartbeat_secs, 5);
        assert_eq!(config.session.stop_timeout_ms, 2000);
        assert_eq!(config.logging.directory(), PathBuf::from("/var/log/xdl"));
        assert_eq!(config.logging.rotation, LogRotation::Never);
        assert_eq!(config.logging.file_name, "xdl.log");
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let temp = tempdir().unwrap();
        let path = temp.path().join("xdl.toml");
        std::fs::write(&path, "offline = [").unwrap();
        assert_eq!(XdlConfig::load(&path), XdlConfig::default());
    }


    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("EXPO_OFFLINE", "1");
        std::env::set_var("EXPO_STAGING", "true");
        let mut config = XdlConfig::default();
        config.apply_env();
        assert!(config.offline);
        assert_eq!(config.api.base_url(), "https://staging.exp.host/--/api/v2/");

        std::env::set_var("EXPO_LOCAL", "1");
        let mut config = XdlConfig::default();
        config.apply_env();
        assert_eq!(config.api.base_url(), "http://localhost:3000/--/api/v2/");

        std::env::remove_var("EXPO_OFFLINE");
        std::env::remove_var("EXPO_STAGING");
        std::env::remove_var("EXPO_LOCAL");
    }
}
