//! # xdl-app - Project Session Orchestration
//!
//! Brings up and tears down a project's development session: manifest
//! server, packager, public tunnels and the keep-alive heartbeat, with all
//! shared state persisted under the project's `.expo/` directory.
//!
//! ## Public API
//!
//! ### Session (`session`)
//! - [`ProjectSession`] - Start/stop/status of one project's session
//! - [`StartOptions`], [`StartedSession`] - Start inputs and results
//! - [`stop_project()`] - Stop a session owned by another process
//!
//! ### Configuration (`config`)
//! - [`XdlConfig`] - `xdl.toml` with env overrides
//! - [`ProjectSettings`], [`PackagerInfo`] - Per-project persisted state
//! - [`UserSettings`] - `~/.expo/state.json`
//!
//! ### URLs (`url`)
//! - [`UrlBuilder`], [`UrlOptions`] - Manifest, bundle and log URLs
//!
//! ### Services
//! - [`ManifestServer`] - HTTP manifest server (`manifest`)
//! - [`ProjectPackager`] - Packager launch and persisted state (`packager`)
//! - [`TunnelManager`], [`TunnelProvider`] - Public tunnels (`tunnel`)
//! - [`ApiClient`] - Remote API (`api`)
//! - [`UserManager`] - Login state with single-flight refresh (`user`)
//! - [`ProjectValidator`] - Pluggable project config checks (`validator`)
//! - [`XdlContext`] - Per-embedding service bundle (`context`)

pub mod api;
pub mod config;
pub mod context;
pub mod manifest;
pub mod packager;
pub mod session;
pub mod tunnel;
pub mod url;
pub mod user;
pub mod validator;

pub use api::{ApiClient, LoginResult, UserInfo};
pub use config::{
    read_packager_info, read_settings, session_status, set_packager_info, set_settings,
    PackagerInfo, PackagerInfoUpdate, ProjectSettings, UserAuthSession, UserSettings, XdlConfig,
};
pub use context::XdlContext;
pub use manifest::{ManifestServer, ManifestServerDeps};
pub use packager::{PackagerStartOptions, ProjectPackager};
pub use session::{stop_project, ProjectSession, StartOptions, StartedSession};
pub use tunnel::{
    domainify, NgrokProvider, RetryPolicy, TunnelManager, TunnelOptions, TunnelProvider,
    TunnelSpec, TunnelUrls,
};
pub use url::{construct_url, BundleQuery, UrlBuilder, UrlContext, UrlEnv, UrlOptions};
pub use user::UserManager;
pub use validator::{BasicValidator, ProjectValidator, ValidationIssue};
