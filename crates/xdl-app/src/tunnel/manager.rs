//! Tunnel lifecycle for a project session

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use xdl_core::prelude::*;
use xdl_core::{read_exprc, LogEventType, LogSink, TunnelStatus};
use xdl_process::{adb, pid};

use super::provider::{TunnelProvider, TunnelSpec};
use super::retry::{Remediation, RetryDecision, RetryPolicy};
use crate::config::{
    get_randomness, read_packager_info, reset_randomness, set_packager_info, PackagerInfoUpdate,
};
use crate::user::UserManager;

pub const MANIFEST_TUNNEL: &str = "expo";
pub const PACKAGER_TUNNEL: &str = "packager";

/// Lowercase, replace anything outside `[a-z0-9-]` with `-`, trim `-` at both ends
pub fn domainify(s: &str) -> String {
    let mapped: String = s
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// Public URLs of an established session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelUrls {
    pub expo_server_url: String,
    pub packager_url: String,
}

/// Tunnel manager settings
#[derive(Debug, Clone)]
pub struct TunnelOptions {
    pub domain: String,
    pub timeout: Duration,
    pub policy: RetryPolicy,
    /// `adb` binary, when installed
    pub adb: Option<PathBuf>,
}

impl Default for TunnelOptions {
    fn default() -> Self {
        Self {
            domain: "exp.direct".to_string(),
            timeout: Duration::from_secs(10),
            policy: RetryPolicy::default(),
            adb: None,
        }
    }
}

/// Starts, monitors and stops the two tunnels of a project session
pub struct TunnelManager<P> {
    root: PathBuf,
    provider: Arc<P>,
    users: Arc<UserManager>,
    sink: LogSink,
    options: TunnelOptions,
    listener: Option<JoinHandle<()>>,
}

impl<P> TunnelManager<P>
where
    P: TunnelProvider + Sync + 'static,
{
    pub fn new(
        root: impl Into<PathBuf>,
        provider: Arc<P>,
        users: Arc<UserManager>,
        sink: LogSink,
        options: TunnelOptions,
    ) -> Self {
        Self {
            root: root.into(),
            provider,
            users,
            sink,
            options,
            listener: None,
        }
    }

    pub fn provider(&self) -> &Arc<P> {
        &self.provider
    }

    /// Open the manifest and packager tunnels.
    ///
    /// Establishment runs as a detached task: if it outlives the timeout and
    /// [`Error::TunnelsTimedOut`] is returned, a late success is still persisted.
    pub async fn start(&mut self) -> Result<TunnelUrls> {
        let user = self.users.ensure_logged_in().await?;
        let info = read_packager_info(&self.root);
        let packager_port = info.packager_port.ok_or_else(|| Error::NoPackagerPort {
            root: self.root.clone(),
        })?;
        let expo_server_port = info
            .expo_server_port
            .ok_or_else(|| Error::NoManifestServerPort {
                root: self.root.clone(),
            })?;

        self.stop().await;

        if let Some(adb_path) = &self.options.adb {
            match adb::reverse(adb_path, &[expo_server_port, packager_port]).await {
                Ok(count) => debug!("adb reverse set up on {} device(s)", count),
                Err(e) => warn!("adb reverse failed: {}", e),
            }
        }

        self.listener = Some(spawn_status_listener(
            self.provider.subscribe_status(),
            self.sink.clone(),
        ));

        let establish = Establish {
            root: self.root.clone(),
            provider: self.provider.clone(),
            sink: self.sink.clone(),
            policy: self.options.policy,
            domain: self.options.domain.clone(),
            username: user.username,
            expo_server_port,
            packager_port,
        };
        let task = tokio::spawn(establish.run());

        match tokio::time::timeout(self.options.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_error)) => Err(Error::tunnel(format!(
                "tunnel task failed: {join_error}"
            ))),
            Err(_) => {
                warn!("Tunnels not ready after {:?}", self.options.timeout);
                Err(Error::TunnelsTimedOut)
            }
        }
    }

    /// Close tunnels and clear their persisted state. Never fails.
    pub async fn stop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }

        let info = read_packager_info(&self.root);
        match info.ngrok_pid {
            Some(recorded) if Some(recorded) != self.provider.pid() => {
                debug!("Killing recorded tunnel agent {}", recorded);
                pid::kill_if_alive(recorded);
            }
            _ => self.provider.kill().await,
        }

        if let Err(e) = set_packager_info(&self.root, &PackagerInfoUpdate::clear_tunnels()) {
            warn!("Failed to clear tunnel info: {}", e);
        }

        if let Some(adb_path) = &self.options.adb {
            let ports: Vec<u16> = [info.expo_server_port, info.packager_port]
                .into_iter()
                .flatten()
                .collect();
            if !ports.is_empty() {
                if let Err(e) = adb::reverse_remove(adb_path, &ports).await {
                    debug!("adb reverse --remove failed: {}", e);
                }
            }
        }
    }
}

impl<P> Drop for TunnelManager<P> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
    }
}

fn spawn_status_listener(
    mut rx: tokio::sync::broadcast::Receiver<TunnelStatus>,
    sink: LogSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(TunnelStatus::Online) => sink.info("Tunnel connected."),
                Ok(TunnelStatus::Reconnecting) => sink.warn("Tunnel reconnecting."),
                Ok(TunnelStatus::Closed) => sink.warn("Tunnel closed."),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

/// A connected tunnel, and whether any remediation ran on the way
struct Connected {
    url: String,
    remediated: bool,
}

/// The detached establishment task
struct Establish<P> {
    root: PathBuf,
    provider: Arc<P>,
    sink: LogSink,
    policy: RetryPolicy,
    domain: String,
    username: String,
    expo_server_port: u16,
    packager_port: u16,
}

impl<P> Establish<P>
where
    P: TunnelProvider + Sync + 'static,
{
    async fn run(self) -> Result<TunnelUrls> {
        let urls = self.connect_pair().await?;

        set_packager_info(
            &self.root,
            &PackagerInfoUpdate {
                expo_server_ngrok_url: Some(Some(urls.expo_server_url.clone())),
                packager_ngrok_url: Some(Some(urls.packager_url.clone())),
                ngrok_pid: Some(self.provider.pid()),
                ..Default::default()
            },
        )?;
        self.sink.milestone(
            LogEventType::TunnelReady,
            format!("Tunnel ready at {}", urls.expo_server_url),
        );
        Ok(urls)
    }

    /// Connect the manifest tunnel, then the packager tunnel.
    ///
    /// Both tunnels share one agent and one randomness, so a remediation
    /// applied while connecting the packager invalidates the manifest tunnel
    /// and the pair is connected again.
    async fn connect_pair(&self) -> Result<TunnelUrls> {
        for round in 1..=self.policy.max_attempts {
            let expo = self
                .connect_with_retry(MANIFEST_TUNNEL, self.expo_server_port, "")
                .await?;
            let packager = self
                .connect_with_retry(PACKAGER_TUNNEL, self.packager_port, "packager.")
                .await?;
            if !packager.remediated {
                return Ok(TunnelUrls {
                    expo_server_url: expo.url,
                    packager_url: packager.url,
                });
            }

            debug!("Reconnecting tunnels after remediation (round {})", round);
            for name in [MANIFEST_TUNNEL, PACKAGER_TUNNEL] {
                if let Err(e) = self.provider.disconnect(name).await {
                    debug!("Disconnect {} failed: {}", name, e);
                }
            }
        }
        Err(Error::tunnel(format!(
            "tunnels kept being torn down after {} rounds",
            self.policy.max_attempts
        )))
    }

    fn hostname(&self, prefix: &str) -> Result<String> {
        let randomness = match read_exprc(&self.root).manifest_tunnel_randomness {
            Some(randomness) => randomness,
            None => get_randomness(&self.root)?,
        };
        Ok(format!(
            "{prefix}{randomness}.{}.{}.{}",
            domainify(&self.username),
            domainify(&project_dir_name(&self.root)),
            self.domain
        ))
    }

    async fn connect_with_retry(
        &self,
        name: &str,
        port: u16,
        prefix: &str,
    ) -> Result<Connected> {
        let mut attempt = 0;
        let mut remediated = false;
        loop {
            attempt += 1;
            let result = match self.hostname(prefix) {
                Ok(hostname) => {
                    let spec = TunnelSpec {
                        name: name.to_string(),
                        port,
                        hostname,
                    };
                    self.provider.connect(&spec).await
                }
                Err(e) => Err(e),
            };
            let error = match result {
                Ok(url) => return Ok(Connected { url, remediated }),
                Err(e) => e,
            };

            match self.policy.decide(attempt, &error) {
                RetryDecision::GiveUp => {
                    warn!("Tunnel {} failed after {} attempt(s): {}", name, attempt, error);
                    return Err(match error {
                        e @ Error::Tunnel { .. } => e,
                        other => Error::tunnel(other.to_string()),
                    });
                }
                RetryDecision::Retry { remediation } => {
                    debug!("Tunnel {} attempt {} failed: {}", name, attempt, error);
                    if let Some(remediation) = remediation {
                        self.apply(remediation).await;
                        remediated = true;
                    }
                    tokio::time::sleep(self.policy.backoff).await;
                }
            }
        }
    }

    async fn apply(&self, remediation: Remediation) {
        match remediation {
            Remediation::KillRecordedTunnel => {
                let recorded = read_packager_info(&self.root).ngrok_pid;
                match recorded {
                    Some(recorded) if Some(recorded) != self.provider.pid() => {
                        info!("Killing stale tunnel agent {}", recorded);
                        pid::kill_if_alive(recorded);
                    }
                    _ => self.provider.kill().await,
                }
            }
            Remediation::RegenerateRandomness => match reset_randomness(&self.root) {
                Ok(randomness) => info!("Regenerated URL randomness: {}", randomness),
                Err(e) => warn!("Failed to regenerate URL randomness: {}", e),
            },
        }
    }
}

fn project_dir_name(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
