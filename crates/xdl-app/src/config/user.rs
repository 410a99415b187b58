//! User-level settings (`~/.expo/state.json`)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use xdl_core::prelude::*;

use super::store::JsonFileStore;

const STATE_FILENAME: &str = "state.json";

/// A logged-in user's session as persisted under `auth`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserAuthSession {
    pub username: String,
    pub user_id: String,
    pub session_secret: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Resolve the user settings directory.
///
/// `$EXPO_HOME_DIRECTORY` wins; otherwise `~/.expo`, or `~/.expo-staging`
/// when `EXPO_STAGING` is set.
pub fn user_settings_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("EXPO_HOME_DIRECTORY").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    if std::env::var_os("EXPO_STAGING").is_some() {
        home.join(".expo-staging")
    } else {
        home.join(".expo")
    }
}

/// Accessor for `state.json`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserSettings {
    dir: PathBuf,
    store: JsonFileStore,
}

impl UserSettings {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let store = JsonFileStore::new(dir.join(STATE_FILENAME));
        Self { dir, store }
    }

    /// Settings in the directory resolved from the environment
    pub fn from_env() -> Self {
        Self::new(user_settings_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn all(&self) -> Map<String, Value> {
        self.store.read(Map::new())
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.all().remove(key).filter(|v| !v.is_null())
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let mut partial = Map::new();
        partial.insert(key.to_string(), value);
        self.store.merge(partial).map(|_| ())
    }

    pub fn auth(&self) -> Option<UserAuthSession> {
        let value = self.get("auth")?;
        match serde_json::from_value(value) {
            Ok(auth) => Some(auth),
            Err(e) => {
                warn!("Ignoring malformed auth in {:?}: {}", self.store.path(), e);
                None
            }
        }
    }

    pub fn set_auth(&self, auth: Option<&UserAuthSession>) -> Result<()> {
        let value = match auth {
            Some(auth) => serde_json::to_value(auth)?,
            None => Value::Null,
        };
        self.set("auth", value)
    }

    /// The stable host identifier, generated (UUID v4) and persisted on first use
    pub fn client_id(&self) -> Result<String> {
        if let Some(Value::String(id)) = self.get("clientId") {
            return Ok(id);
        }
        let id = uuid::Uuid::new_v4().to_string();
        self.set("clientId", Value::from(id.clone()))?;
        debug!("Generated clientId {}", id);
        Ok(id)
    }
}
