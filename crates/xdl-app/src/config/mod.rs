//! Persistent state and configuration for xdl
//!
//! Supports:
//! - `<root>/.expo/settings.json` - URL preferences per project
//! - `<root>/.expo/packager-info.json` - Running session ports, pids and tunnel URLs
//! - `~/.expo/state.json` - User auth session and client id
//! - `~/.expo/xdl.toml` - xdl configuration

pub mod project;
pub mod settings;
pub mod store;
pub mod user;

pub use project::{
    get_randomness, random_identifier, read_packager_info, read_settings, reset_randomness,
    session_status, set_packager_info, set_settings, PackagerInfo, PackagerInfoUpdate,
    ProjectSettings, EXPO_DIR,
};
pub use settings::{ApiSettings, PackagerSettings, SessionSettings, TunnelSettings, XdlConfig};
pub use store::JsonFileStore;
pub use user::{user_settings_dir, UserAuthSession, UserSettings};
