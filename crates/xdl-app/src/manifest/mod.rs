//! Manifest server
//!
//! Serves the project manifest to clients, accepts device log batches, and
//! can be asked to shut down over HTTP.
//!
//! Routes:
//! - `GET /`, `/manifest`, `/index.exp` - Manifest JSON (optionally signed)
//! - `POST /logs` - Device log batch
//! - `POST /shutdown` - Graceful shutdown

pub mod build;
mod routes;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use xdl_core::prelude::*;
use xdl_core::{read_exprc, LogEventType, LogSink};
use xdl_process::{free_port_from, MANIFEST_PORT_START};

use crate::config::{set_packager_info, PackagerInfoUpdate};
use crate::url::UrlEnv;
use crate::user::UserManager;
use crate::validator::ProjectValidator;

pub use build::{build_manifest, ManifestOwner, ManifestRequest, ASSET_FIELDS};

const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(1);

/// Everything the manifest server needs from its session
#[derive(Clone)]
pub struct ManifestServerDeps {
    pub root: PathBuf,
    pub sink: LogSink,
    pub users: Arc<UserManager>,
    pub validator: Arc<dyn ProjectValidator>,
    pub url_env: UrlEnv,
    pub offline: bool,
    pub developer_tool: String,
}

/// Last signed manifest, keyed by the exact manifest string
#[derive(Debug, Default)]
pub(crate) struct SignedManifestCache {
    entry: Option<(String, String)>,
}

impl SignedManifestCache {
    pub(crate) fn get(&self, manifest_string: &str) -> Option<&String> {
        self.entry
            .as_ref()
            .filter(|(key, _)| key == manifest_string)
            .map(|(_, signed)| signed)
    }

    pub(crate) fn insert(&mut self, manifest_string: String, signed: String) {
        self.entry = Some((manifest_string, signed));
    }
}

pub(crate) struct ServerState {
    pub(crate) deps: ManifestServerDeps,
    pub(crate) signed_cache: Mutex<SignedManifestCache>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
}

/// A running manifest server
pub struct ManifestServer {
    port: u16,
    root: PathBuf,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl ManifestServer {
    /// Bind and start serving.
    ///
    /// The port is `.exprc`'s `manifestPort` or the first free port from
    /// 19000. `expoServerPort` is persisted before the listener is bound.
    pub async fn start(deps: ManifestServerDeps) -> Result<Self> {
        let port = match read_exprc(&deps.root).manifest_port {
            Some(port) => port,
            None => free_port_from(MANIFEST_PORT_START).await?,
        };
        set_packager_info(
            &deps.root,
            &PackagerInfoUpdate {
                expo_server_port: Some(Some(port)),
                ..Default::default()
            },
        )?;

        let listener = match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => listener,
            Err(e) => {
                clear_port(&deps.root);
                return Err(e.into());
            }
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let root = deps.root.clone();
        let sink = deps.sink.clone();
        let state = Arc::new(ServerState {
            deps,
            signed_cache: Mutex::new(SignedManifestCache::default()),
            shutdown_tx: shutdown_tx.clone(),
        });
        let router = routes::router(state);

        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(wait_for_shutdown(shutdown_rx))
                .await
            {
                error!("Manifest server error: {}", e);
            }
            debug!("Manifest server on port {} exited", port);
        });

        sink.milestone(
            LogEventType::ManifestServerReady,
            format!("Expo server listening on port {port}"),
        );

        Ok(Self {
            port,
            root,
            shutdown_tx,
            task: Some(task),
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves when shutdown has been requested, over HTTP or by [`stop`](Self::stop)
    pub fn shutdown_requested(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        wait_for_shutdown(self.shutdown_tx.subscribe())
    }

    /// Stop serving and clear `expoServerPort`. Never fails.
    pub async fn stop(&mut self) {
        self.shutdown_tx.send_replace(true);
        if let Some(mut task) = self.task.take() {
            if tokio::time::timeout(SERVER_STOP_TIMEOUT, &mut task)
                .await
                .is_err()
            {
                debug!("Manifest server did not drain in time, aborting");
                task.abort();
            }
        }
        clear_port(&self.root);
    }
}

impl Drop for ManifestServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn clear_port(root: &std::path::Path) {
    let update = PackagerInfoUpdate {
        expo_server_port: Some(None),
        ..Default::default()
    };
    if let Err(e) = set_packager_info(root, &update) {
        warn!("Failed to clear expoServerPort: {}", e);
    }
}

async fn wait_for_shutdown(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
