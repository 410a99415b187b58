//! Tunnel providers
//!
//! [`TunnelProvider`] is the seam between the [`TunnelManager`](super::TunnelManager)
//! and whatever actually opens public endpoints. [`NgrokProvider`] drives a
//! local ngrok agent, started lazily on first connect and shared by every
//! tunnel of the session.

use std::path::PathBuf;
use std::sync::Mutex as StdMutex;

use tokio::sync::{broadcast, Mutex};
use xdl_core::prelude::*;
use xdl_core::TunnelStatus;
use xdl_process::{AgentConfig, NgrokAgent, TunnelRequest};

/// One tunnel to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSpec {
    pub name: String,
    pub port: u16,
    pub hostname: String,
}

/// Opens and closes public tunnels to local ports
#[trait_variant::make(TunnelProvider: Send)]
pub trait LocalTunnelProvider {
    /// Open a tunnel and return its public URL
    async fn connect(&self, spec: &TunnelSpec) -> Result<String>;

    /// Close one tunnel by name
    async fn disconnect(&self, name: &str) -> Result<()>;

    /// Close every tunnel and stop any agent process
    async fn kill(&self);

    /// Pid of the agent process this provider owns, if any
    fn pid(&self) -> Option<u32>;

    /// Connection status notifications
    fn subscribe_status(&self) -> broadcast::Receiver<TunnelStatus>;
}

/// ngrok agent backed provider
pub struct NgrokProvider {
    config: AgentConfig,
    agent: Mutex<Option<NgrokAgent>>,
    pid: StdMutex<Option<u32>>,
    status_tx: broadcast::Sender<TunnelStatus>,
}

impl NgrokProvider {
    pub fn new(ngrok_path: PathBuf, authtoken: Option<String>, cwd: PathBuf) -> Self {
        let (status_tx, _) = broadcast::channel(16);
        Self {
            config: AgentConfig {
                ngrok_path,
                authtoken,
                cwd,
            },
            agent: Mutex::new(None),
            pid: StdMutex::new(None),
            status_tx,
        }
    }

    fn set_pid(&self, pid: Option<u32>) {
        if let Ok(mut guard) = self.pid.lock() {
            *guard = pid;
        }
    }

    /// Start the agent unless one is already running
    async fn ensure_agent(&self) -> Result<xdl_process::AgentApi> {
        let mut agent = self.agent.lock().await;
        if let Some(running) = agent.as_ref().filter(|a| a.is_running()) {
            return Ok(running.api().clone());
        }

        let started = NgrokAgent::start(&self.config).await?;
        self.set_pid(started.pid());

        let mut agent_status = started.subscribe_status();
        let forward = self.status_tx.clone();
        tokio::spawn(async move {
            while let Ok(status) = agent_status.recv().await {
                let closed = status == TunnelStatus::Closed;
                let _ = forward.send(status);
                if closed {
                    break;
                }
            }
        });

        let api = started.api().clone();
        *agent = Some(started);
        Ok(api)
    }
}

impl TunnelProvider for NgrokProvider {
    async fn connect(&self, spec: &TunnelSpec) -> Result<String> {
        let api = self.ensure_agent().await?;
        let request = TunnelRequest::http(&spec.name, spec.port, Some(spec.hostname.clone()));
        let url = api.connect(&request).await?;
        let _ = self.status_tx.send(TunnelStatus::Online);
        Ok(url)
    }

    async fn disconnect(&self, name: &str) -> Result<()> {
        let api = match self.agent.lock().await.as_ref() {
            Some(agent) => agent.api().clone(),
            None => return Ok(()),
        };
        api.disconnect(name).await
    }

    async fn kill(&self) {
        let taken = self.agent.lock().await.take();
        if let Some(mut agent) = taken {
            agent.kill().await;
        }
        self.set_pid(None);
    }

    fn pid(&self) -> Option<u32> {
        self.pid.lock().ok().and_then(|guard| *guard)
    }

    fn subscribe_status(&self) -> broadcast::Receiver<TunnelStatus> {
        self.status_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::{NgrokProvider, TunnelProvider, TunnelSpec};
    use xdl_core::Error;

    #[tokio::test]
    async fn test_missing_binary_fails_connect() {
        let provider = NgrokProvider::new(
            PathBuf::from("/nonexistent/ngrok"),
            None,
            std::env::temp_dir(),
        );
        let spec = TunnelSpec {
            name: "expo".into(),
            port: 19000,
            hostname: "ab-cde.jane.app.exp.direct".into(),
        };
        assert!(provider.connect(&spec).await.is_err());
        assert_eq!(provider.pid(), None);
        provider.kill().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_agent_exit_before_api_is_tunnel_error() {
        let temp = tempfile::tempdir().unwrap();
        let script = temp.path().join("ngrok");
        std::fs::write(
            &script,
            "#!/bin/sh\necho '{\"lvl\":\"eror\",\"msg\":\"failed\",\"err\":\"authentication failed\"}'\nexit 1\n",
        )
        .unwrap();
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        let provider = NgrokProvider::new(script, None, temp.path().to_path_buf());
        let spec = TunnelSpec {
            name: "expo".into(),
            port: 19000,
            hostname: "h".into(),
        };
        let err = provider.connect(&spec).await.unwrap_err();
        assert!(matches!(err, Error::Tunnel { .. }));
    }
}
