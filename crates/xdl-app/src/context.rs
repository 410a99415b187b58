//! Per-instance services shared by a session's components

use std::sync::Arc;

use xdl_core::LogSink;
use xdl_process::ToolAvailability;

use crate::api::ApiClient;
use crate::config::{UserSettings, XdlConfig};
use crate::url::UrlEnv;
use crate::user::UserManager;
use crate::validator::{default_validator, ProjectValidator};

/// Everything a [`ProjectSession`](crate::ProjectSession) borrows from its host.
///
/// One context per embedding; nothing here is global.
#[derive(Clone)]
pub struct XdlContext {
    pub config: XdlConfig,
    pub users: Arc<UserManager>,
    pub sink: LogSink,
    pub tools: ToolAvailability,
    pub validator: Arc<dyn ProjectValidator>,
    pub url_env: UrlEnv,
}

impl XdlContext {
    /// Build from configuration, the environment and the installed tools
    pub fn new(config: XdlConfig) -> Self {
        let users = UserManager::new(
            UserSettings::from_env(),
            ApiClient::from_settings(&config.api),
            config.offline,
        );
        Self::with_users(config, Arc::new(users))
    }

    pub fn with_users(config: XdlConfig, users: Arc<UserManager>) -> Self {
        Self {
            config,
            users,
            sink: LogSink::default(),
            tools: ToolAvailability::check(),
            validator: default_validator(),
            url_env: UrlEnv::capture(),
        }
    }
}
