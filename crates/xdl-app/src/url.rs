//! URL construction
//!
//! [`UrlContext`] snapshots everything a URL depends on (project settings,
//! packager info, app config, environment) so that [`construct_url`] is a pure
//! function. [`UrlBuilder`] reads the snapshot from disk.

use std::net::UdpSocket;
use std::path::{Path, PathBuf};

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;
use url::Url;
use xdl_core::prelude::*;
use xdl_core::{gte_sdk_version, guess_main_module_path, read_config, ExpConfig};
use xdl_core::{HostType, LanType, UrlType};

use crate::config::{read_packager_info, read_settings, PackagerInfo, ProjectSettings};

/// Characters left alone by JavaScript's `encodeURIComponent`
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Characters left alone by JavaScript's `encodeURI`
const URI: &AsciiSet = &URI_COMPONENT
    .remove(b';')
    .remove(b',')
    .remove(b'/')
    .remove(b'?')
    .remove(b':')
    .remove(b'@')
    .remove(b'&')
    .remove(b'=')
    .remove(b'+')
    .remove(b'$')
    .remove(b'#');

const REDIRECT_BASE: &str = "https://exp.host/--/to-exp/";
const ASSET_PLUGIN_PATH: &str = "node_modules/expo/tools/hashAssetFiles";
const ASSET_PLUGIN_MIN_SDK: &str = "11.0.0";
const PROJECT_SCHEME_MIN_SDK: &str = "27.0.0";

pub fn encode_uri_component(input: &str) -> String {
    utf8_percent_encode(input, URI_COMPONENT).to_string()
}

pub fn encode_uri(input: &str) -> String {
    utf8_percent_encode(input, URI).to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Options
// ─────────────────────────────────────────────────────────────────────────────

/// Per-call overrides of the persisted [`ProjectSettings`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlOptions {
    pub url_type: Option<UrlType>,
    pub host_type: Option<HostType>,
    pub lan_type: Option<LanType>,
    pub dev: Option<bool>,
    pub strict: Option<bool>,
    pub minify: Option<bool>,
    pub url_randomness: Option<String>,
}

impl UrlOptions {
    pub fn url_type(url_type: UrlType) -> Self {
        Self {
            url_type: Some(url_type),
            ..Default::default()
        }
    }

    /// Validate a JSON options object.
    ///
    /// `null` is the empty option set. Unknown keys and out-of-range values are
    /// rejected with [`Error::InvalidOptions`].
    pub fn from_json(value: &Value) -> Result<Self> {
        let map = match value {
            Value::Null => return Ok(Self::default()),
            Value::Object(map) => map,
            _ => return Err(Error::invalid_option("options", "must be an object")),
        };

        let mut opts = Self::default();
        for (key, value) in map {
            match key.as_str() {
                "urlType" => opts.url_type = Some(enum_field(key, value)?),
                "hostType" => opts.host_type = Some(enum_field(key, value)?),
                "lanType" => opts.lan_type = Some(enum_field(key, value)?),
                "dev" => opts.dev = Some(bool_field(key, value)?),
                "strict" => opts.strict = Some(bool_field(key, value)?),
                "minify" => opts.minify = Some(bool_field(key, value)?),
                "urlRandomness" => {
                    opts.url_randomness = match value {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        _ => return Err(Error::invalid_option(key, "must be a string or null")),
                    }
                }
                _ => return Err(Error::invalid_option(key, "is not an allowed option")),
            }
        }
        Ok(opts)
    }

    /// Overlay these options on `settings`; options win
    pub fn apply_to(&self, settings: &ProjectSettings) -> ProjectSettings {
        ProjectSettings {
            host_type: self.host_type.unwrap_or(settings.host_type),
            lan_type: self.lan_type.unwrap_or(settings.lan_type),
            dev: self.dev.unwrap_or(settings.dev),
            strict: self.strict.unwrap_or(settings.strict),
            minify: self.minify.unwrap_or(settings.minify),
            url_type: self.url_type.unwrap_or(settings.url_type),
            url_randomness: self
                .url_randomness
                .clone()
                .or_else(|| settings.url_randomness.clone()),
        }
    }
}

fn enum_field<T: std::str::FromStr<Err = Error>>(key: &str, value: &Value) -> Result<T> {
    match value {
        Value::String(s) => s.parse(),
        _ => Err(Error::invalid_option(key, "must be a string")),
    }
}

fn bool_field(key: &str, value: &Value) -> Result<bool> {
    value
        .as_bool()
        .ok_or_else(|| Error::invalid_option(key, "must be a boolean"))
}

/// Flags for bundle query strings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleQuery {
    pub dev: bool,
    pub strict: Option<bool>,
    pub minify: Option<bool>,
}

impl Default for BundleQuery {
    /// Production flags used for extension URLs
    fn default() -> Self {
        Self {
            dev: false,
            strict: None,
            minify: Some(true),
        }
    }
}

impl From<&ProjectSettings> for BundleQuery {
    fn from(settings: &ProjectSettings) -> Self {
        Self {
            dev: settings.dev,
            strict: Some(settings.strict),
            minify: Some(settings.minify),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Environment
// ─────────────────────────────────────────────────────────────────────────────

/// Environment inputs to URL construction
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlEnv {
    /// `EXPO_PACKAGER_PROXY_URL`
    pub packager_proxy_url: Option<String>,
    /// `EXPO_MANIFEST_PROXY_URL`
    pub manifest_proxy_url: Option<String>,
    /// `EXPO_PACKAGER_HOSTNAME`
    pub packager_hostname: Option<String>,
    /// `REACT_NATIVE_PACKAGER_HOSTNAME`
    pub react_native_packager_hostname: Option<String>,
    pub lan_ip: Option<String>,
    pub os_hostname: Option<String>,
}

impl UrlEnv {
    /// Snapshot the process environment and network identity
    pub fn capture() -> Self {
        Self {
            packager_proxy_url: env_var("EXPO_PACKAGER_PROXY_URL"),
            manifest_proxy_url: env_var("EXPO_MANIFEST_PROXY_URL"),
            packager_hostname: env_var("EXPO_PACKAGER_HOSTNAME"),
            react_native_packager_hostname: env_var("REACT_NATIVE_PACKAGER_HOSTNAME"),
            lan_ip: lan_ip(),
            os_hostname: os_hostname(),
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// The machine's outbound LAN address.
///
/// Connecting a UDP socket sends nothing; it only selects the route.
pub fn lan_ip() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        return None;
    }
    Some(ip.to_string())
}

pub fn os_hostname() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

// ─────────────────────────────────────────────────────────────────────────────
// Construction
// ─────────────────────────────────────────────────────────────────────────────

/// Every input to URL construction for one project
#[derive(Debug, Clone)]
pub struct UrlContext {
    pub root: PathBuf,
    pub settings: ProjectSettings,
    pub packager_info: PackagerInfo,
    pub exp: ExpConfig,
    pub env: UrlEnv,
    pub offline: bool,
}

/// Build the packager (`is_packager`) or manifest server URL.
///
/// `request_host` is the hostname the client used to reach us, if any.
pub fn construct_url(
    ctx: &UrlContext,
    opts: &UrlOptions,
    is_packager: bool,
    request_host: Option<&str>,
) -> Result<String> {
    let settings = opts.apply_to(&ctx.settings);
    let mut protocol = protocol_for(&settings, &ctx.exp);

    let local_port = if is_packager {
        ctx.packager_info.packager_port
    } else {
        ctx.packager_info.expo_server_port
    };
    let proxy = if is_packager {
        ctx.env.packager_proxy_url.as_deref()
    } else {
        ctx.env.manifest_proxy_url.as_deref()
    };

    let (hostname, port): (Option<String>, Option<u16>) = if let Some(proxy) = proxy {
        let proxy = Url::parse(proxy)?;
        let mut port = proxy.port();
        if proxy.scheme() == "https" {
            if protocol.as_deref() == Some("http") {
                protocol = Some("https".to_string());
            }
            port = port.or(Some(443));
        }
        (proxy.host_str().map(str::to_string), port)
    } else if settings.host_type == HostType::Localhost || request_host == Some("localhost") {
        (Some("localhost".to_string()), local_port)
    } else if settings.host_type == HostType::Lan || ctx.offline {
        let hostname = ctx
            .env
            .packager_hostname
            .clone()
            .or_else(|| ctx.env.react_native_packager_hostname.clone())
            .or_else(|| match settings.lan_type {
                LanType::Ip => request_host
                    .map(str::to_string)
                    .or_else(|| ctx.env.lan_ip.clone()),
                LanType::Hostname => ctx.env.os_hostname.clone(),
            });
        (hostname, local_port)
    } else {
        let tunnel_url = if is_packager {
            ctx.packager_info.packager_ngrok_url.as_deref()
        } else {
            ctx.packager_info.expo_server_ngrok_url.as_deref()
        };
        match tunnel_url.and_then(|u| Url::parse(u).ok()) {
            Some(tunnel) => (tunnel.host_str().map(str::to_string), tunnel.port()),
            None => {
                warn!("Tunnel URL not found, falling back to localhost");
                (Some("localhost".to_string()), local_port)
            }
        }
    };

    let hostname = hostname.ok_or(Error::HostnameNotInferred)?;
    let mut url = String::new();
    if let Some(protocol) = &protocol {
        url.push_str(protocol);
        url.push_str("://");
    }
    url.push_str(&hostname);
    url.push(':');
    url.push_str(&port.unwrap_or(80).to_string());

    if settings.url_type == UrlType::Redirect {
        return Ok(format!("{REDIRECT_BASE}{}", encode_uri_component(&url)));
    }
    Ok(url)
}

fn protocol_for(settings: &ProjectSettings, exp: &ExpConfig) -> Option<String> {
    match settings.url_type {
        UrlType::Http => Some("http".to_string()),
        UrlType::NoProtocol => None,
        UrlType::Exp | UrlType::Redirect => {
            if let Some(detach) = &exp.detach {
                if let Some(scheme) = exp
                    .scheme
                    .as_ref()
                    .filter(|_| gte_sdk_version(exp, PROJECT_SCHEME_MIN_SDK))
                {
                    return Some(scheme.clone());
                }
                if let Some(scheme) = &detach.scheme {
                    return Some(scheme.clone());
                }
            }
            Some("exp".to_string())
        }
    }
}

/// Query string for bundle and extension URLs
pub fn bundle_query(root: &Path, exp: &ExpConfig, query: &BundleQuery) -> String {
    let mut params = format!("dev={}", query.dev);
    if let Some(strict) = query.strict {
        params.push_str(&format!("&strict={strict}"));
    }
    if let Some(minify) = query.minify {
        params.push_str(&format!("&minify={minify}"));
    }
    params.push_str("&hot=false");
    if gte_sdk_version(exp, ASSET_PLUGIN_MIN_SDK) {
        let plugin = root.join(ASSET_PLUGIN_PATH);
        params.push_str("&assetPlugin=");
        params.push_str(&encode_uri_component(&plugin.to_string_lossy()));
    } else {
        params.push_str("&includeAssetFileHashes=true");
    }
    params
}

impl UrlContext {
    pub fn manifest_url(&self, opts: &UrlOptions, request_host: Option<&str>) -> Result<String> {
        construct_url(self, opts, false, request_host)
    }

    pub fn bundle_url(&self, opts: &UrlOptions, request_host: Option<&str>) -> Result<String> {
        construct_url(self, opts, true, request_host)
    }

    /// Manifest URL without its scheme
    pub fn host_uri(&self, request_host: Option<&str>) -> Result<String> {
        let url = self.manifest_url(&UrlOptions::default(), request_host)?;
        Ok(match url.split_once("://") {
            Some((_, rest)) => rest.to_string(),
            None => url,
        })
    }

    pub fn debugger_host(&self, request_host: Option<&str>) -> Result<String> {
        self.bundle_url(&UrlOptions::url_type(UrlType::NoProtocol), request_host)
    }

    /// Where devices `POST` their logs
    pub fn log_url(&self, request_host: Option<&str>) -> Result<String> {
        let base = self.manifest_url(&UrlOptions::url_type(UrlType::Http), request_host)?;
        Ok(format!("{base}/logs"))
    }

    /// `http://localhost:{packagerPort}/{mainModule}.{ext}?{query}`
    pub fn url_with_extension(
        &self,
        entry_point: &str,
        ext: &str,
        request_host: Option<&str>,
        query: Option<BundleQuery>,
    ) -> Result<String> {
        let opts = UrlOptions {
            host_type: Some(HostType::Localhost),
            url_type: Some(UrlType::Http),
            ..Default::default()
        };
        let base = self.bundle_url(&opts, request_host)?;
        let main_module = guess_main_module_path(entry_point);
        let params = self.bundle_query(&query.unwrap_or_default());
        Ok(format!("{base}/{main_module}.{ext}?{params}"))
    }

    pub fn bundle_query(&self, query: &BundleQuery) -> String {
        bundle_query(&self.root, &self.exp, query)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Reads a fresh [`UrlContext`] from disk for each URL
#[derive(Debug, Clone)]
pub struct UrlBuilder {
    root: PathBuf,
    env: UrlEnv,
    offline: bool,
}

impl UrlBuilder {
    pub fn new(root: impl Into<PathBuf>, offline: bool) -> Self {
        Self {
            root: root.into(),
            env: UrlEnv::capture(),
            offline,
        }
    }

    pub fn with_env(mut self, env: UrlEnv) -> Self {
        self.env = env;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn context(&self) -> Result<UrlContext> {
        let config = read_config(&self.root)?;
        Ok(UrlContext {
            root: self.root.clone(),
            settings: read_settings(&self.root),
            packager_info: read_packager_info(&self.root),
            exp: config.exp,
            env: self.env.clone(),
            offline: self.offline,
        })
    }

    pub fn manifest_url(&self, opts: &UrlOptions, request_host: Option<&str>) -> Result<String> {
        self.context()?.manifest_url(opts, request_host)
    }

    pub fn bundle_url(&self, opts: &UrlOptions, request_host: Option<&str>) -> Result<String> {
        self.context()?.bundle_url(opts, request_host)
    }

    pub fn host_uri(&self, request_host: Option<&str>) -> Result<String> {
        self.context()?.host_uri(request_host)
    }

    pub fn debugger_host(&self, request_host: Option<&str>) -> Result<String> {
        self.context()?.debugger_host(request_host)
    }

    pub fn log_url(&self, request_host: Option<&str>) -> Result<String> {
        self.context()?.log_url(request_host)
    }

    pub fn url_with_extension(
        &self,
        entry_point: &str,
        ext: &str,
        request_host: Option<&str>,
        query: Option<BundleQuery>,
    ) -> Result<String> {
        self.context()?
            .url_with_extension(entry_point, ext, request_host, query)
    }
}
