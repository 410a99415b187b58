//! Project configuration loading
//!
//! Reads the app config (`app.json` with an `expo` key, or a legacy `exp.json`),
//! the optional `package.json`, and the optional `.exprc` override file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::{Error, Result};

const APP_JSON: &str = "app.json";
const EXP_JSON: &str = "exp.json";
const PACKAGE_JSON: &str = "package.json";
const EXPRC: &str = ".exprc";

/// Which file the app config was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    AppJson,
    ExpJson,
}

impl ConfigSource {
    pub fn file_name(&self) -> &'static str {
        match self {
            ConfigSource::AppJson => APP_JSON,
            ConfigSource::ExpJson => EXP_JSON,
        }
    }
}

/// Legacy `detach` section of a standalone app config
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetachConfig {
    #[serde(default)]
    pub scheme: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExpFields {
    name: Option<String>,
    slug: Option<String>,
    description: Option<String>,
    primary_color: Option<String>,
    sdk_version: Option<String>,
    scheme: Option<String>,
    detach: Option<DetachConfig>,
    entry_point: Option<String>,
    rn_cli_path: Option<String>,
    packager_opts: Option<Map<String, Value>>,
}

/// The `expo` section of the app config.
///
/// Keeps the raw JSON object, which is what gets served in the manifest, next
/// to typed accessors for the fields xdl itself interprets.
#[derive(Debug, Clone, Default)]
pub struct ExpConfig {
    pub raw: Map<String, Value>,
    pub name: Option<String>,
    pub slug: Option<String>,
    pub description: Option<String>,
    pub primary_color: Option<String>,
    pub sdk_version: Option<String>,
    pub scheme: Option<String>,
    pub detach: Option<DetachConfig>,
    pub entry_point: Option<String>,
    pub rn_cli_path: Option<String>,
    pub packager_opts: Option<Map<String, Value>>,
}

impl ExpConfig {
    pub fn from_value(value: Value) -> Result<Self> {
        let Value::Object(raw) = value else {
            return Err(Error::config_invalid("app config must be a JSON object"));
        };
        let fields: ExpFields = serde_json::from_value(Value::Object(raw.clone()))
            .map_err(|e| Error::config_invalid(format!("invalid app config: {e}")))?;

        Ok(Self {
            raw,
            name: fields.name,
            slug: fields.slug,
            description: fields.description,
            primary_color: fields.primary_color,
            sdk_version: fields.sdk_version,
            scheme: fields.scheme,
            detach: fields.detach,
            entry_point: fields.entry_point,
            rn_cli_path: fields.rn_cli_path,
            packager_opts: fields.packager_opts,
        })
    }

    /// Whether the project is a detached/standalone app
    pub fn is_detached(&self) -> bool {
        self.detach.is_some()
    }
}

/// The subset of `package.json` xdl reads
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PackageJson {
    #[serde(default)]
    pub main: Option<String>,
    #[serde(default)]
    pub dependencies: Map<String, Value>,
}

/// Project-local overrides from `.exprc`
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpRc {
    #[serde(default)]
    pub manifest_port: Option<u16>,
    #[serde(default)]
    pub manifest_tunnel_randomness: Option<String>,
}

/// Fully loaded project configuration
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub root: PathBuf,
    pub source: ConfigSource,
    pub exp: ExpConfig,
    pub pkg: PackageJson,
}

/// Read the app config for the project at `root`.
pub fn read_config(root: &Path) -> Result<ProjectConfig> {
    let app_json = root.join(APP_JSON);
    let exp_json = root.join(EXP_JSON);

    let (source, exp) = if app_json.exists() {
        let value: Value = serde_json::from_str(&fs::read_to_string(&app_json)?)?;
        let expo = value
            .get("expo")
            .cloned()
            .ok_or_else(|| Error::config_invalid("app.json must include an \"expo\" object"))?;
        (ConfigSource::AppJson, ExpConfig::from_value(expo)?)
    } else if exp_json.exists() {
        let value: Value = serde_json::from_str(&fs::read_to_string(&exp_json)?)?;
        (ConfigSource::ExpJson, ExpConfig::from_value(value)?)
    } else {
        return Err(Error::NoProject {
            path: root.to_path_buf(),
        });
    };

    let pkg = read_package_json(root);
    debug!("Loaded {} for {}", source.file_name(), root.display());

    Ok(ProjectConfig {
        root: root.to_path_buf(),
        source,
        exp,
        pkg,
    })
}

fn read_package_json(root: &Path) -> PackageJson {
    let path = root.join(PACKAGE_JSON);
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Failed to parse {:?}: {}", path, e);
            PackageJson::default()
        }),
        Err(_) => PackageJson::default(),
    }
}

/// Read `.exprc`, returning defaults when it is missing or invalid
pub fn read_exprc(root: &Path) -> ExpRc {
    let path = root.join(EXPRC);
    if !path.exists() {
        return ExpRc::default();
    }
    match fs::read_to_string(&path) {
        Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Failed to parse {:?}: {}", path, e);
            ExpRc::default()
        }),
        Err(e) => {
            warn!("Failed to read {:?}: {}", path, e);
            ExpRc::default()
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SDK Version Gating
// ─────────────────────────────────────────────────────────────────────────────

/// Whether the project's `sdkVersion` is at least `version`.
///
/// No `sdkVersion` is treated as older than everything; `UNVERSIONED` as newer.
pub fn gte_sdk_version(exp: &ExpConfig, version: &str) -> bool {
    let Some(sdk) = exp.sdk_version.as_deref() else {
        return false;
    };
    if sdk == "UNVERSIONED" {
        return true;
    }
    match (semver::Version::parse(sdk), semver::Version::parse(version)) {
        (Ok(sdk), Ok(target)) => sdk >= target,
        _ => {
            warn!("Unparseable sdkVersion {:?}", sdk);
            false
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Entry Point
// ─────────────────────────────────────────────────────────────────────────────

/// Determine the JS entry point for `platform`
pub fn determine_entry_point(config: &ProjectConfig, platform: &str) -> String {
    if let Some(entry) = &config.exp.entry_point {
        return entry.clone();
    }
    if let Some(main) = &config.pkg.main {
        return main.clone();
    }
    let platform_entry = format!("index.{platform}.js");
    if config.root.join(&platform_entry).exists() {
        return platform_entry;
    }
    "index.js".to_string()
}

/// Module path the packager serves for an entry point (`.js` stripped)
pub fn guess_main_module_path(entry_point: &str) -> String {
    entry_point
        .strip_suffix(".js")
        .unwrap_or(entry_point)
        .to_string()
}
