//! Typed packager options and CLI argument building

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use xdl_core::prelude::*;

/// List-valued keys whose user values are appended to the base values
/// instead of replacing them.
pub const UNION_MERGED_KEYS: &[&str] = &["assetExts"];

/// Asset extensions the packager always has to serve
pub const BASE_ASSET_EXTS: &[&str] = &["ttf"];

/// Options passed to the packager's `start` command
#[derive(Debug, Clone, PartialEq)]
pub struct PackagerOptions {
    pub port: u16,
    pub asset_exts: Vec<String>,
    pub non_persistent: bool,
    pub max_workers: Option<u32>,
    pub custom_log_reporter_path: Option<String>,
    pub config: Option<PathBuf>,
    pub reset_cache: bool,
    pub verbose: bool,
    /// Any other user-supplied `packagerOpts`, passed through in order
    pub extra: Vec<(String, Value)>,
}

impl PackagerOptions {
    /// Base options before the project's `packagerOpts` are applied
    pub fn new(port: u16) -> Self {
        Self {
            port,
            asset_exts: BASE_ASSET_EXTS.iter().map(|s| s.to_string()).collect(),
            non_persistent: false,
            max_workers: None,
            custom_log_reporter_path: None,
            config: None,
            reset_cache: false,
            verbose: false,
            extra: Vec::new(),
        }
    }

    /// Apply the project's `packagerOpts` on top of these options.
    ///
    /// `config` is resolved against `root`; keys in [`UNION_MERGED_KEYS`] are
    /// union-merged with base values first; everything else overrides.
    pub fn merge_user(&mut self, user: &Map<String, Value>, root: &Path) -> Result<()> {
        for (key, value) in user {
            match key.as_str() {
                "port" => {
                    self.port = value
                        .as_u64()
                        .and_then(|p| u16::try_from(p).ok())
                        .ok_or_else(|| {
                            Error::invalid_option("packagerOpts.port", "must be a port number")
                        })?;
                }
                "assetExts" => {
                    let exts = string_list(key, value)?;
                    merge_list(key, &mut self.asset_exts, exts);
                }
                "nonPersistent" => self.non_persistent = is_truthy(value),
                "maxWorkers" => {
                    self.max_workers = value.as_u64().and_then(|n| u32::try_from(n).ok());
                }
                "customLogReporterPath" => {
                    self.custom_log_reporter_path = value.as_str().map(str::to_string);
                }
                "config" => {
                    self.config = value.as_str().map(|c| root.join(c));
                }
                "resetCache" => self.reset_cache = is_truthy(value),
                "verbose" => self.verbose = is_truthy(value),
                _ => match self.extra.iter_mut().find(|(k, _)| k == key) {
                    Some(slot) => slot.1 = value.clone(),
                    None => self.extra.push((key.clone(), value.clone())),
                },
            }
        }
        Ok(())
    }

    /// Build the CLI arguments following the packager script path
    pub fn to_args(&self) -> Vec<String> {
        let mut args = vec!["start".to_string()];
        push_value(&mut args, "port", &Value::from(self.port));
        push_list(&mut args, "assetExts", &self.asset_exts);
        push_flag(&mut args, "nonPersistent", self.non_persistent);
        if let Some(n) = self.max_workers {
            push_value(&mut args, "maxWorkers", &Value::from(n));
        }
        if let Some(path) = &self.custom_log_reporter_path {
            push_value(&mut args, "customLogReporterPath", &Value::from(path.as_str()));
        }
        if let Some(config) = &self.config {
            push_value(
                &mut args,
                "config",
                &Value::from(config.to_string_lossy().as_ref()),
            );
        }
        for (key, value) in &self.extra {
            push_value(&mut args, key, value);
        }
        if self.verbose {
            args.push("--verbose".to_string());
        }
        if self.reset_cache {
            args.push("--reset-cache".to_string());
        }
        args
    }
}

fn merge_list(key: &str, base: &mut Vec<String>, user: Vec<String>) {
    if UNION_MERGED_KEYS.contains(&key) {
        for item in user {
            if !base.contains(&item) {
                base.push(item);
            }
        }
    } else {
        *base = user;
    }
}

fn string_list(key: &str, value: &Value) -> Result<Vec<String>> {
    let field = format!("packagerOpts.{key}");
    let items = value
        .as_array()
        .ok_or_else(|| Error::invalid_option(&field, "must be an array of strings"))?;
    items
        .iter()
        .map(|v| {
            v.as_str()
                .map(str::to_string)
                .ok_or_else(|| Error::invalid_option(&field, "must be an array of strings"))
        })
        .collect()
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn push_flag(args: &mut Vec<String>, key: &str, on: bool) {
    if on {
        args.push(format!("--{key}"));
    }
}

fn push_list(args: &mut Vec<String>, key: &str, items: &[String]) {
    if !items.is_empty() {
        args.push(format!("--{key}"));
        args.push(items.join(","));
    }
}

/// Booleans become bare flags, lists are comma-joined, falsy values are omitted
fn push_value(args: &mut Vec<String>, key: &str, value: &Value) {
    if !is_truthy(value) {
        return;
    }
    match value {
        Value::Bool(_) => args.push(format!("--{key}")),
        Value::String(s) => {
            args.push(format!("--{key}"));
            args.push(s.clone());
        }
        Value::Array(items) => {
            let joined = items
                .iter()
                .map(|v| match v {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(",");
            args.push(format!("--{key}"));
            args.push(joined);
        }
        other => {
            args.push(format!("--{key}"));
            args.push(other.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_base_args() {
        let opts = PackagerOptions::new(19001);
        assert_eq!(
            opts.to_args(),
            vec!["start", "--port", "19001", "--assetExts", "ttf"]
        );
    }

    #[test]
    fn test_asset_exts_union_keeps_base_first() {
        let mut opts = PackagerOptions::new(19001);
        opts.merge_user(
            &user(json!({"assetExts": ["db", "ttf", "obj"]})),
            Path::new("/app"),
        )
        .unwrap();
        assert_eq!(opts.asset_exts, vec!["ttf", "db", "obj"]);
    }

    #[test]
    fn test_config_resolved_against_root() {
        let mut opts = PackagerOptions::new(19001);
        opts.merge_user(
            &user(json!({"config": "rn-cli.config.js"})),
            Path::new("/app"),
        )
        .unwrap();
        assert_eq!(opts.config, Some(PathBuf::from("/app/rn-cli.config.js")));
        let args = opts.to_args();
        let idx = args.iter().position(|a| a == "--config").unwrap();
        assert_eq!(args[idx + 1], "/app/rn-cli.config.js");
    }

    #[test]
    fn test_extra_values_flags_and_falsy() {
        let mut opts = PackagerOptions::new(19001);
        opts.non_persistent = true;
        opts.merge_user(
            &user(json!({
                "sourceExts": ["ts", "tsx"],
                "skipflow": true,
                "disabled": false,
                "empty": "",
                "projectRoots": "/a"
            })),
            Path::new("/app"),
        )
        .unwrap();

        let args = opts.to_args();
        assert!(args.contains(&"--nonPersistent".to_string()));
        assert!(args.contains(&"--skipflow".to_string()));
        assert!(!args.contains(&"--disabled".to_string()));
        assert!(!args.contains(&"--empty".to_string()));

        let idx = args.iter().position(|a| a == "--sourceExts").unwrap();
        assert_eq!(args[idx + 1], "ts,tsx");
        let idx = args.iter().position(|a| a == "--projectRoots").unwrap();
        assert_eq!(args[idx + 1], "/a");
    }

    #[test]
    fn test_verbose_and_reset_cache_trail() {
        let mut opts = PackagerOptions::new(19001);
        opts.verbose = true;
        opts.reset_cache = true;
        let args = opts.to_args();
        assert_eq!(&args[args.len() - 2..], ["--verbose", "--reset-cache"]);
    }

    #[test]
    fn test_bad_asset_exts_rejected() {
        let mut opts = PackagerOptions::new(19001);
        let err = opts
            .merge_user(&user(json!({"assetExts": "png"})), Path::new("/app"))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidOptions { field, .. } if field == "packagerOpts.assetExts"));
    }
}
