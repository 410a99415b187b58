//! Subcommand implementations

use std::path::Path;

use color_eyre::eyre::{Result, WrapErr};
use serde_json::{json, Map};
use xdl_app::{
    session_status, set_settings, stop_project, StartOptions, UrlBuilder, UrlOptions, XdlConfig,
    XdlContext,
};
use xdl_core::{HostType, SessionStatus};

use crate::headless::run_headless;

pub async fn start(
    mut config: XdlConfig,
    root: &Path,
    host: Option<&str>,
    offline: bool,
    non_persistent: bool,
) -> Result<()> {
    if let Some(host) = host {
        let host: HostType = host.parse()?;
        let mut partial = Map::new();
        partial.insert("hostType".to_string(), json!(host.as_str()));
        set_settings(root, partial).wrap_err("Failed to save host type")?;
    }

    config.offline |= offline;
    let opts = StartOptions {
        non_persistent,
        offline: config.offline,
        ..Default::default()
    };
    run_headless(root, XdlContext::new(config), opts).await?;
    Ok(())
}

pub async fn stop(root: &Path) {
    stop_project(root).await;
}

pub fn status(root: &Path) -> SessionStatus {
    session_status(root)
}

pub fn url(config: &XdlConfig, root: &Path, packager: bool) -> Result<String> {
    let builder = UrlBuilder::new(root, config.offline);
    let opts = UrlOptions::default();
    let url = if packager {
        builder.bundle_url(&opts, None)
    } else {
        builder.manifest_url(&opts, None)
    };
    url.wrap_err("Failed to construct URL")
}
