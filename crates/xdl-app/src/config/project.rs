//! Per-project state under `<root>/.expo/`
//!
//! - `settings.json`: URL preferences ([`ProjectSettings`])
//! - `packager-info.json`: ports, pids and tunnel URLs of the running session
//!   ([`PackagerInfo`])

use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xdl_core::prelude::*;
use xdl_core::{HostType, LanType, SessionStatus, UrlType};

use super::store::JsonFileStore;

/// Project state directory name
pub const EXPO_DIR: &str = ".expo";
const SETTINGS_FILENAME: &str = "settings.json";
const PACKAGER_INFO_FILENAME: &str = "packager-info.json";

const RANDOMNESS_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

// ─────────────────────────────────────────────────────────────────────────────
// Project Settings
// ─────────────────────────────────────────────────────────────────────────────

/// URL preferences persisted per project
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectSettings {
    #[serde(default)]
    pub host_type: HostType,
    #[serde(default)]
    pub lan_type: LanType,
    #[serde(default = "default_true")]
    pub dev: bool,
    #[serde(default)]
    pub strict: bool,
    #[serde(default)]
    pub minify: bool,
    #[serde(default)]
    pub url_type: UrlType,
    #[serde(default)]
    pub url_randomness: Option<String>,
}

fn default_true() -> bool {
    true
}

impl Default for ProjectSettings {
    fn default() -> Self {
        Self {
            host_type: HostType::Tunnel,
            lan_type: LanType::Ip,
            dev: true,
            strict: false,
            minify: false,
            url_type: UrlType::Exp,
            url_randomness: None,
        }
    }
}

fn settings_store(root: &Path) -> JsonFileStore {
    JsonFileStore::new(root.join(EXPO_DIR).join(SETTINGS_FILENAME))
}

/// Read project settings, creating the file with defaults on first read
pub fn read_settings(root: &Path) -> ProjectSettings {
    let store = settings_store(root);
    if !store.path().exists() {
        if let Err(e) = store.merge_from(&ProjectSettings::default()) {
            warn!("Failed to create {:?}: {}", store.path(), e);
        }
    }
    store.read(ProjectSettings::default())
}

/// Merge a partial settings object into `settings.json`
pub fn set_settings(root: &Path, partial: Map<String, Value>) -> Result<ProjectSettings> {
    let merged = settings_store(root).merge(partial)?;
    serde_json::from_value(Value::Object(merged))
        .map_err(|e| Error::config_invalid(format!("invalid project settings: {e}")))
}

/// Generate a fresh `xx-xxx` randomness token over `[a-z0-9]`
pub fn random_identifier() -> String {
    let mut rng = rand::thread_rng();
    let mut pick = |n: usize| -> String {
        (0..n)
            .map(|_| RANDOMNESS_CHARS[rng.gen_range(0..RANDOMNESS_CHARS.len())] as char)
            .collect()
    };
    let head = pick(2);
    let tail = pick(3);
    format!("{head}-{tail}")
}

/// The project's URL randomness, generated and persisted on first use
pub fn get_randomness(root: &Path) -> Result<String> {
    if let Some(existing) = read_settings(root).url_randomness {
        return Ok(existing);
    }
    reset_randomness(root)
}

/// Replace the project's URL randomness with a fresh token
pub fn reset_randomness(root: &Path) -> Result<String> {
    let token = random_identifier();
    let mut partial = Map::new();
    partial.insert("urlRandomness".into(), Value::from(token.clone()));
    set_settings(root, partial)?;
    debug!("New URL randomness for {}: {}", root.display(), token);
    Ok(token)
}

// ─────────────────────────────────────────────────────────────────────────────
// Packager Info
// ─────────────────────────────────────────────────────────────────────────────

/// Runtime state of the project's session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagerInfo {
    #[serde(default)]
    pub packager_port: Option<u16>,
    #[serde(default)]
    pub expo_server_port: Option<u16>,
    #[serde(default)]
    pub packager_pid: Option<u32>,
    #[serde(default)]
    pub packager_ngrok_url: Option<String>,
    #[serde(default)]
    pub expo_server_ngrok_url: Option<String>,
    #[serde(default)]
    pub ngrok_pid: Option<u32>,
}

impl PackagerInfo {
    pub fn status(&self) -> SessionStatus {
        SessionStatus::from_ports(self.packager_port, self.expo_server_port)
    }
}

/// Partial update of [`PackagerInfo`].
///
/// `None` leaves a field untouched; `Some(None)` writes `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackagerInfoUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packager_port: Option<Option<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expo_server_port: Option<Option<u16>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packager_pid: Option<Option<u32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub packager_ngrok_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expo_server_ngrok_url: Option<Option<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ngrok_pid: Option<Option<u32>>,
}

impl PackagerInfoUpdate {
    /// Null every field
    pub fn clear_all() -> Self {
        Self {
            packager_port: Some(None),
            expo_server_port: Some(None),
            packager_pid: Some(None),
            packager_ngrok_url: Some(None),
            expo_server_ngrok_url: Some(None),
            ngrok_pid: Some(None),
        }
    }

    /// Null the packager's port and pid
    pub fn clear_packager() -> Self {
        Self {
            packager_port: Some(None),
            packager_pid: Some(None),
            ..Default::default()
        }
    }

    /// Null the tunnel URLs and agent pid
    pub fn clear_tunnels() -> Self {
        Self {
            packager_ngrok_url: Some(None),
            expo_server_ngrok_url: Some(None),
            ngrok_pid: Some(None),
            ..Default::default()
        }
    }
}

fn packager_info_store(root: &Path) -> JsonFileStore {
    JsonFileStore::new(root.join(EXPO_DIR).join(PACKAGER_INFO_FILENAME))
}

pub fn read_packager_info(root: &Path) -> PackagerInfo {
    packager_info_store(root).read(PackagerInfo::default())
}

pub fn set_packager_info(root: &Path, update: &PackagerInfoUpdate) -> Result<PackagerInfo> {
    let merged = packager_info_store(root).merge_from(update)?;
    serde_json::from_value(Value::Object(merged))
        .map_err(|e| Error::config_invalid(format!("invalid packager info: {e}")))
}

/// Session status inferred from the persisted ports
pub fn session_status(root: &Path) -> SessionStatus {
    read_packager_info(root).status()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[test]
    fn test_first_read_creates_defaults() {
        let temp = tempdir().unwrap();
        let settings = read_settings(temp.path());
        assert_eq!(settings, ProjectSettings::default());
        assert_eq!(settings.host_type, HostType::Tunnel);
        assert!(settings.dev);

        let raw: Value = serde_json::from_str(
            &std::fs::read_to_string(temp.path().join(".expo/settings.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(raw["hostType"], "tunnel");
        assert_eq!(raw["urlType"], "exp");
        assert_eq!(raw["urlRandomness"], Value::Null);
    }

    #[test]
    fn test_set_settings_merges() {
        let temp = tempdir().unwrap();
        read_settings(temp.path());
        let updated = set_settings(
            temp.path(),
            json!({"hostType": "lan"}).as_object().cloned().unwrap(),
        )
        .unwrap();
        assert_eq!(updated.host_type, HostType::Lan);
        assert_eq!(updated.url_type, UrlType::Exp);
        assert_eq!(read_settings(temp.path()).host_type, HostType::Lan);
    }

    #[test]
    fn test_randomness_format_and_persistence() {
        let re_ok = |s: &str| {
            let (head, tail) = s.split_once('-').unwrap();
            head.len() == 2
                && tail.len() == 3
                && s.chars()
                    .all(|c| c == '-' || c.is_ascii_lowercase() || c.is_ascii_digit())
        };
        for _ in 0..50 {
            assert!(re_ok(&random_identifier()));
        }

        let temp = tempdir().unwrap();
        let first = get_randomness(temp.path()).unwrap();
        assert!(re_ok(&first));
        assert_eq!(get_randomness(temp.path()).unwrap(), first);

        let reset = reset_randomness(temp.path()).unwrap();
        assert_eq!(get_randomness(temp.path()).unwrap(), reset);
    }

    #[test]
    fn test_packager_info_update_writes_nulls() {
        let temp = tempdir().unwrap();
        set_packager_info(
            temp.path(),
            &PackagerInfoUpdate {
                packager_port: Some(Some(19001)),
                packager_pid: Some(Some(4242)),
                expo_server_port: Some(Some(19000)),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(session_status(temp.path()), SessionStatus::Running);

        let info = set_packager_info(temp.path(), &PackagerInfoUpdate::clear_packager()).unwrap();
        assert_eq!(info.packager_port, None);
        assert_eq!(info.packager_pid, None);
        assert_eq!(info.expo_server_port, Some(19000));
        assert_eq!(session_status(temp.path()), SessionStatus::Ill);

        set_packager_info(temp.path(), &PackagerInfoUpdate::clear_all()).unwrap();
        assert_eq!(session_status(temp.path()), SessionStatus::Exited);
    }

    #[test]
    fn test_update_serialization_skips_untouched() {
        let update = PackagerInfoUpdate {
            ngrok_pid: Some(None),
            packager_ngrok_url: Some(Some("https://x".into())),
            ..Default::default()
        };
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"ngrokPid": null, "packagerNgrokUrl": "https://x"})
        );
    }
}
