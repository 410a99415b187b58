//! Project session orchestration
//!
//! A [`ProjectSession`] brings up a project's development session in order:
//!
//! ```text
//! start: manifest server → packager → tunnels (unless offline) → heartbeat
//! stop:  heartbeat off → manifest server → packager → tunnels   (bounded)
//! ```
//!
//! A stop that overruns its bound falls back to killing the recorded pids.
//! Either way every `packager-info.json` field ends up null.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use xdl_core::prelude::*;
use xdl_core::{read_config, LogSink, SessionStatus};
use xdl_process::pid;

use crate::config::{read_packager_info, session_status, set_packager_info, PackagerInfoUpdate};
use crate::context::XdlContext;
use crate::manifest::{ManifestServer, ManifestServerDeps};
use crate::packager::{PackagerStartOptions, ProjectPackager};
use crate::tunnel::{NgrokProvider, TunnelManager, TunnelOptions, TunnelProvider, TunnelUrls};
use crate::url::{UrlBuilder, UrlOptions};
use crate::user::UserManager;

const SHUTDOWN_REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// Options for [`ProjectSession::start`]
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    pub reset_cache: bool,
    pub non_persistent: bool,
    pub max_workers: Option<u32>,
    /// Run without tunnels, signing or heartbeat even if the config allows them
    pub offline: bool,
    /// Replaces the `node` packager command
    pub packager_command: Option<xdl_process::CommandSpec>,
}

/// What a successful start brought up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartedSession {
    pub expo_server_port: u16,
    pub packager_port: u16,
    pub tunnels: Option<TunnelUrls>,
    pub manifest_url: Option<String>,
}

/// A project's development session
pub struct ProjectSession<P = NgrokProvider> {
    root: PathBuf,
    ctx: XdlContext,
    packager: ProjectPackager,
    manifest: Option<ManifestServer>,
    tunnels: Option<TunnelManager<P>>,
    keep_alive: watch::Sender<bool>,
    heartbeat: Option<JoinHandle<()>>,
    stop_delay: Option<Duration>,
    offline: bool,
}

impl ProjectSession<NgrokProvider> {
    /// Session using the ngrok agent for tunnels, when one is installed
    pub fn new(root: impl Into<PathBuf>, ctx: XdlContext) -> Self {
        let root = root.into();
        let ngrok = ctx
            .config
            .tunnel
            .ngrok_path
            .clone()
            .or_else(|| ctx.tools.ngrok.clone());
        let provider = ngrok.map(|path| {
            Arc::new(NgrokProvider::new(
                path,
                ctx.config.tunnel.authtoken.clone(),
                root.clone(),
            ))
        });
        Self::with_provider(root, ctx, provider)
    }
}

impl<P> ProjectSession<P>
where
    P: TunnelProvider + Sync + 'static,
{
    /// Session with an explicit tunnel provider; `None` disables tunnels
    pub fn with_provider(root: impl Into<PathBuf>, ctx: XdlContext, provider: Option<Arc<P>>) -> Self {
        let root = root.into();
        let packager = ProjectPackager::new(
            root.clone(),
            ctx.sink.clone(),
            ctx.config.packager.clone(),
            ctx.tools.node.clone(),
            ctx.tools.watchman.clone(),
        );
        let tunnels = provider.map(|provider| {
            let options = TunnelOptions {
                domain: ctx.config.tunnel.domain.clone(),
                timeout: ctx.config.tunnel.timeout(),
                adb: ctx.tools.adb.clone(),
                ..Default::default()
            };
            TunnelManager::new(
                root.clone(),
                provider,
                ctx.users.clone(),
                ctx.sink.clone(),
                options,
            )
        });
        let (keep_alive, _) = watch::channel(false);
        let offline = ctx.config.offline;

        Self {
            root,
            ctx,
            packager,
            manifest: None,
            tunnels,
            keep_alive,
            heartbeat: None,
            stop_delay: None,
            offline,
        }
    }

    /// Delay inserted before the graceful stop sequence
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sink(&self) -> &LogSink {
        &self.ctx.sink
    }

    pub fn is_offline(&self) -> bool {
        self.offline
    }

    /// Resolves when a client asked the manifest server to shut down
    pub fn shutdown_requested(&self) -> Option<impl std::future::Future<Output = ()> + Send + 'static> {
        self.manifest.as_ref().map(ManifestServer::shutdown_requested)
    }

    pub fn url_builder(&self) -> UrlBuilder {
        UrlBuilder::new(self.root.clone(), self.offline).with_env(self.ctx.url_env.clone())
    }

    /// Start the session. Tunnel failures are logged, not returned.
    pub async fn start(&mut self, opts: StartOptions) -> Result<StartedSession> {
        read_config(&self.root).context("Failed to read project config")?;
        self.offline = self.ctx.config.offline || opts.offline;
        let sink = self.ctx.sink.clone();

        let deps = ManifestServerDeps {
            root: self.root.clone(),
            sink: sink.clone(),
            users: self.ctx.users.clone(),
            validator: self.ctx.validator.clone(),
            url_env: self.ctx.url_env.clone(),
            offline: self.offline,
            developer_tool: self.ctx.config.developer_tool.clone(),
        };
        let mut manifest = ManifestServer::start(deps)
            .await
            .context("Failed to start manifest server")?;
        let expo_server_port = manifest.port();

        let packager_opts = PackagerStartOptions {
            reset_cache: opts.reset_cache,
            non_persistent: opts.non_persistent,
            max_workers: opts.max_workers,
            command: opts.packager_command,
        };
        let packager_port = match self.packager.start(&packager_opts).await {
            Ok(port) => port,
            Err(e) => {
                manifest.stop().await;
                return Err(e);
            }
        };
        self.manifest = Some(manifest);

        let tunnels = match (&mut self.tunnels, self.offline) {
            (Some(tunnels), false) => match tunnels.start().await {
                Ok(urls) => Some(urls),
                Err(e) => {
                    sink.warn(format!("Tunnels could not be started: {e}"));
                    None
                }
            },
            (None, false) => {
                sink.warn("ngrok is not installed; serving on LAN and localhost only.");
                None
            }
            (_, true) => None,
        };

        if !self.offline {
            self.start_heartbeat();
        }

        let manifest_url = self
            .url_builder()
            .manifest_url(&UrlOptions::default(), None)
            .map_err(|e| debug!("No manifest URL yet: {}", e))
            .ok();

        info!("Session started for {}", self.root.display());
        Ok(StartedSession {
            expo_server_port,
            packager_port,
            tunnels,
            manifest_url,
        })
    }

    fn start_heartbeat(&mut self) {
        self.keep_alive.send_replace(true);
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
        let heartbeat = Heartbeat {
            root: self.root.clone(),
            users: self.ctx.users.clone(),
            urls: self.url_builder(),
            interval: self.ctx.config.session.heartbeat_interval(),
        };
        self.heartbeat = Some(tokio::spawn(heartbeat.run(self.keep_alive.subscribe())));
    }

    /// Stop everything. Never fails; all persisted session fields end up null.
    pub async fn stop(&mut self) {
        self.keep_alive.send_replace(false);
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }

        let timeout = self.ctx.config.session.stop_timeout();
        let graceful = async {
            if let Some(delay) = self.stop_delay {
                tokio::time::sleep(delay).await;
            }
            if let Some(mut manifest) = self.manifest.take() {
                manifest.stop().await;
            }
            self.packager.stop().await;
            if let Some(tunnels) = self.tunnels.as_mut() {
                tunnels.stop().await;
            }
        };

        if tokio::time::timeout(timeout, graceful).await.is_err() {
            warn!("Graceful stop exceeded {:?}, killing recorded processes", timeout);
            self.manifest = None;
            kill_recorded(&self.root);
        }

        if let Err(e) = set_packager_info(&self.root, &PackagerInfoUpdate::clear_all()) {
            warn!("Failed to clear packager info: {}", e);
        }
        info!("Session stopped for {}", self.root.display());
    }

    pub fn status(&self) -> SessionStatus {
        session_status(&self.root)
    }
}

impl<P> Drop for ProjectSession<P> {
    fn drop(&mut self) {
        if let Some(task) = self.heartbeat.take() {
            task.abort();
        }
    }
}

fn kill_recorded(root: &Path) {
    let info = read_packager_info(root);
    for recorded in [info.packager_pid, info.ngrok_pid].into_iter().flatten() {
        if pid::is_alive(recorded) {
            if let Err(e) = pid::kill(recorded) {
                warn!("Failed to kill {}: {}", recorded, e);
            }
        }
    }
}

/// Stop a session owned by another process.
///
/// Asks its manifest server to shut down, terminates the recorded packager and
/// tunnel agent, and clears `packager-info.json`. Never fails.
pub async fn stop_project(root: &Path) {
    let info = read_packager_info(root);
    if let Some(port) = info.expo_server_port {
        let client = reqwest::Client::builder()
            .timeout(SHUTDOWN_REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        match client
            .post(format!("http://127.0.0.1:{port}/shutdown"))
            .send()
            .await
        {
            Ok(_) => debug!("Requested manifest server shutdown on {}", port),
            Err(e) => debug!("Manifest server on {} unreachable: {}", port, e),
        }
    }
    for recorded in [info.packager_pid, info.ngrok_pid].into_iter().flatten() {
        pid::terminate_if_alive(recorded);
    }
    if let Err(e) = set_packager_info(root, &PackagerInfoUpdate::clear_all()) {
        warn!("Failed to clear packager info: {}", e);
    }
}

/// Periodic `development-sessions/notify-alive` while the keep-alive flag is set
struct Heartbeat {
    root: PathBuf,
    users: Arc<UserManager>,
    urls: UrlBuilder,
    interval: Duration,
}

impl Heartbeat {
    async fn run(self, mut alive: watch::Receiver<bool>) {
        loop {
            if !*alive.borrow_and_update() {
                break;
            }
            if let Err(e) = self.beat().await {
                debug!("Heartbeat failed: {}", e);
            }
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = alive.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        debug!("Heartbeat stopped");
    }

    async fn beat(&self) -> Result<()> {
        let Some(session) = self.users.session().await else {
            trace!("No user session, skipping heartbeat");
            return Ok(());
        };
        let payload = self.payload()?;
        self.users.api_for(Some(&session)).notify_alive(payload).await
    }

    fn payload(&self) -> Result<Value> {
        let config = read_config(&self.root)?;
        let exp = &config.exp;
        let url = self.urls.manifest_url(&UrlOptions::default(), None)?;
        let hostname = crate::url::os_hostname().unwrap_or_default();
        Ok(json!({
            "description": format!("{} on {}", exp.name.as_deref().unwrap_or_default(), hostname),
            "hostname": hostname,
            "config": {
                "description": exp.description,
                "name": exp.name,
                "slug": exp.slug,
                "primaryColor": exp.primary_color,
            },
            "url": url,
            "source": "desktop",
        }))
    }
}
