//! Core domain type definitions

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// How URLs should resolve network-wise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostType {
    Localhost,
    Lan,
    #[default]
    Tunnel,
}

impl HostType {
    pub const ALLOWED: &'static [&'static str] = &["localhost", "lan", "tunnel"];

    pub fn as_str(&self) -> &'static str {
        match self {
            HostType::Localhost => "localhost",
            HostType::Lan => "lan",
            HostType::Tunnel => "tunnel",
        }
    }
}

/// How a LAN hostname is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanType {
    #[default]
    Ip,
    Hostname,
}

impl LanType {
    pub const ALLOWED: &'static [&'static str] = &["ip", "hostname"];

    pub fn as_str(&self) -> &'static str {
        match self {
            LanType::Ip => "ip",
            LanType::Hostname => "hostname",
        }
    }
}

/// Selects the URL scheme (or wrapper) of a constructed URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum UrlType {
    #[default]
    #[serde(rename = "exp")]
    Exp,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "redirect")]
    Redirect,
    #[serde(rename = "no-protocol")]
    NoProtocol,
}

impl UrlType {
    pub const ALLOWED: &'static [&'static str] = &["exp", "http", "redirect", "no-protocol"];

    pub fn as_str(&self) -> &'static str {
        match self {
            UrlType::Exp => "exp",
            UrlType::Http => "http",
            UrlType::Redirect => "redirect",
            UrlType::NoProtocol => "no-protocol",
        }
    }
}

macro_rules! impl_enum_str {
    ($ty:ty, $field:literal, $( $s:literal => $v:expr ),+ $(,)?) => {
        impl FromStr for $ty {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $( $s => Ok($v), )+
                    other => Err(Error::invalid_option(
                        $field,
                        format!(
                            "\"{}\" must be one of [{}]",
                            other,
                            <$ty>::ALLOWED.join(", ")
                        ),
                    )),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

impl_enum_str!(HostType, "hostType",
    "localhost" => HostType::Localhost,
    "lan" => HostType::Lan,
    "tunnel" => HostType::Tunnel,
);

impl_enum_str!(LanType, "lanType",
    "ip" => LanType::Ip,
    "hostname" => LanType::Hostname,
);

impl_enum_str!(UrlType, "urlType",
    "exp" => UrlType::Exp,
    "http" => UrlType::Http,
    "redirect" => UrlType::Redirect,
    "no-protocol" => UrlType::NoProtocol,
);

/// Overall project session status, inferred from persisted packager info
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Both the packager and the manifest server have a bound port
    Running,
    /// Exactly one of the two servers has a bound port
    Ill,
    /// Neither server has a bound port
    Exited,
}

impl SessionStatus {
    pub fn from_ports(packager_port: Option<u16>, expo_server_port: Option<u16>) -> Self {
        match (packager_port.is_some(), expo_server_port.is_some()) {
            (true, true) => SessionStatus::Running,
            (false, false) => SessionStatus::Exited,
            _ => SessionStatus::Ill,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionStatus::Running => "running",
            SessionStatus::Ill => "ill",
            SessionStatus::Exited => "exited",
        };
        f.write_str(s)
    }
}

/// Log severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    #[serde(alias = "warning")]
    Warn,
    Error,
}

impl LogLevel {
    /// Get display prefix for log level
    pub fn prefix(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Error => "ERR",
        }
    }

    /// Parse a level reported by a device, defaulting to `Info`
    pub fn from_device(level: &str) -> Self {
        match level.to_ascii_lowercase().as_str() {
            "debug" | "trace" => LogLevel::Debug,
            "warn" | "warning" => LogLevel::Warn,
            "error" | "fatal" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}
