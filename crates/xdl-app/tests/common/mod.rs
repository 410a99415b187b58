//! Shared fixtures for xdl-app integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::TempDir;
use xdl_app::{ApiClient, UserAuthSession, UserManager, UserSettings};

/// A project directory named `My App` inside a temp dir
pub struct Fixture {
    _temp: TempDir,
    pub root: PathBuf,
    pub home: PathBuf,
}

impl Fixture {
    pub fn new(exp: Value) -> Self {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().join("My App");
        let home = temp.path().join("home");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(root.join("app.json"), json!({ "expo": exp }).to_string()).unwrap();
        Self {
            _temp: temp,
            root,
            home,
        }
    }

    pub fn app() -> Self {
        Self::new(json!({"name": "My App", "slug": "my-app", "sdkVersion": "30.0.0"}))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Offline manager so no profile refresh reaches the network
    pub fn users(&self, logged_in: bool) -> Arc<UserManager> {
        let settings = UserSettings::new(&self.home);
        if logged_in {
            settings
                .set_auth(Some(&UserAuthSession {
                    username: "Jane_Doe".to_string(),
                    user_id: "u-1".to_string(),
                    session_secret: "secret".to_string(),
                    access_token: None,
                    id_token: None,
                }))
                .unwrap();
        }
        Arc::new(UserManager::new(
            settings,
            ApiClient::new("http://127.0.0.1:9/"),
            true,
        ))
    }
}
