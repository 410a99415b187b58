//! ngrok agent client
//!
//! Runs `ngrok start --none` with JSON logging on stdout, learns the local
//! API address from the `starting web service` log line, and manages tunnels
//! through the agent's `/api/tunnels` endpoint.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use xdl_core::events::{ProcessEvent, TunnelStatus};
use xdl_core::prelude::*;

use crate::process::{CommandSpec, ManagedProcess};

/// How long to wait for the agent's API to come up
pub const AGENT_START_TIMEOUT: Duration = Duration::from_secs(10);

/// Agent error code for a hostname already bound to another session
pub const ERROR_ALREADY_BOUND: i64 = 103;

// ─────────────────────────────────────────────────────────────────────────────
// Log parsing
// ─────────────────────────────────────────────────────────────────────────────

/// Interesting events in the agent's JSON log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentLogEvent {
    /// Local API listening on this `host:port`
    WebService(String),
    Status(TunnelStatus),
    Error(String),
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    lvl: Option<String>,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    addr: Option<String>,
    #[serde(default)]
    err: Option<Value>,
}

/// Parse one line of `--log-format json` output
pub fn parse_log_line(line: &str) -> Option<AgentLogEvent> {
    let parsed: LogLine = serde_json::from_str(line).ok()?;
    match parsed.msg.as_str() {
        "starting web service" => parsed.addr.map(AgentLogEvent::WebService),
        "tunnel session started" | "client session established" => {
            Some(AgentLogEvent::Status(TunnelStatus::Online))
        }
        "failed to reconnect session" | "session closing" | "reconnecting" => {
            Some(AgentLogEvent::Status(TunnelStatus::Reconnecting))
        }
        _ if parsed.lvl.as_deref() == Some("eror") || parsed.lvl.as_deref() == Some("crit") => {
            let detail = match parsed.err {
                Some(Value::String(s)) => s,
                Some(other) => other.to_string(),
                None => parsed.msg,
            };
            Some(AgentLogEvent::Error(detail))
        }
        _ => None,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API types
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/tunnels`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TunnelRequest {
    pub name: String,
    pub addr: String,
    pub proto: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl TunnelRequest {
    pub fn http(name: impl Into<String>, port: u16, hostname: Option<String>) -> Self {
        Self {
            name: name.into(),
            addr: port.to_string(),
            proto: "http".to_string(),
            hostname,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TunnelResponse {
    public_url: String,
}

/// Error body returned by the agent API
#[derive(Debug, Clone, Deserialize)]
pub struct AgentError {
    pub error_code: i64,
    #[serde(default)]
    pub msg: String,
    #[serde(default)]
    pub details: Value,
}

/// Extract the agent error code from a tunnel error payload
pub fn error_code(payload: &Value) -> Option<i64> {
    payload.get("error_code").and_then(Value::as_i64)
}

fn agent_error(status: reqwest::StatusCode, body: &str) -> Error {
    match serde_json::from_str::<Value>(body) {
        Ok(payload) => {
            let msg = serde_json::from_value::<AgentError>(payload.clone())
                .map(|e| e.msg)
                .unwrap_or_else(|_| format!("ngrok API returned {status}"));
            Error::tunnel_with_payload(msg, payload)
        }
        Err(_) => Error::tunnel(format!("ngrok API returned {status}: {body}")),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// API client
// ─────────────────────────────────────────────────────────────────────────────

/// Client for a running agent's local API
#[derive(Debug, Clone)]
pub struct AgentApi {
    base: String,
    client: reqwest::Client,
}

impl AgentApi {
    pub fn new(addr: &str) -> Self {
        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
        }
    }

    /// Open a tunnel and return its public URL
    pub async fn connect(&self, request: &TunnelRequest) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/tunnels", self.base))
            .json(request)
            .send()
            .await
            .map_err(|e| Error::tunnel(format!("ngrok API unreachable: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::tunnel(format!("ngrok API read failed: {e}")))?;
        if !status.is_success() {
            return Err(agent_error(status, &body));
        }

        let parsed: TunnelResponse = serde_json::from_str(&body)
            .map_err(|e| Error::tunnel(format!("unexpected ngrok response: {e}")))?;
        debug!("Tunnel {} connected at {}", request.name, parsed.public_url);
        Ok(parsed.public_url)
    }

    /// Close a tunnel by name
    pub async fn disconnect(&self, name: &str) -> Result<()> {
        self.client
            .delete(format!("{}/api/tunnels/{}", self.base, name))
            .send()
            .await
            .map_err(|e| Error::tunnel(format!("ngrok API unreachable: {e}")))?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Agent process
// ─────────────────────────────────────────────────────────────────────────────

/// How to launch the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub ngrok_path: PathBuf,
    pub authtoken: Option<String>,
    pub cwd: PathBuf,
}

impl AgentConfig {
    pub fn command(&self) -> CommandSpec {
        let mut spec = CommandSpec::new(self.ngrok_path.to_string_lossy(), &self.cwd).args([
            "start",
            "--none",
            "--log",
            "stdout",
            "--log-format",
            "json",
        ]);
        if let Some(token) = &self.authtoken {
            spec = spec.args(["--authtoken", token.as_str()]);
        }
        spec
    }
}

/// A running ngrok agent
pub struct NgrokAgent {
    process: ManagedProcess,
    api: AgentApi,
    status_tx: broadcast::Sender<TunnelStatus>,
}

impl NgrokAgent {
    /// Spawn the agent and wait until its local API address is known
    pub async fn start(config: &AgentConfig) -> Result<Self> {
        let (event_tx, event_rx) = mpsc::channel(64);
        let process = ManagedProcess::spawn(&config.command(), event_tx)?;
        let (status_tx, _) = broadcast::channel(16);
        let (addr_tx, addr_rx) = oneshot::channel();

        tokio::spawn(Self::watch_output(event_rx, addr_tx, status_tx.clone()));

        let addr = match tokio::time::timeout(AGENT_START_TIMEOUT, addr_rx).await {
            Ok(Ok(Ok(addr))) => addr,
            Ok(Ok(Err(e))) => return Err(e),
            Ok(Err(_)) => return Err(Error::tunnel("ngrok exited before its API started")),
            Err(_) => return Err(Error::tunnel("timed out waiting for the ngrok API")),
        };
        info!("ngrok agent API at {}", addr);

        Ok(Self {
            process,
            api: AgentApi::new(&addr),
            status_tx,
        })
    }

    async fn watch_output(
        mut rx: mpsc::Receiver<ProcessEvent>,
        addr_tx: oneshot::Sender<Result<String>>,
        status_tx: broadcast::Sender<TunnelStatus>,
    ) {
        let mut addr_tx = Some(addr_tx);
        while let Some(event) = rx.recv().await {
            match event {
                ProcessEvent::Stdout(line) | ProcessEvent::Stderr(line) => {
                    match parse_log_line(&line) {
                        Some(AgentLogEvent::WebService(addr)) => {
                            if let Some(tx) = addr_tx.take() {
                                let _ = tx.send(Ok(addr));
                            }
                        }
                        Some(AgentLogEvent::Status(status)) => {
                            let _ = status_tx.send(status);
                        }
                        Some(AgentLogEvent::Error(err)) => {
                            warn!("ngrok: {}", err);
                            if let Some(tx) = addr_tx.take() {
                                let _ = tx.send(Err(Error::tunnel(err)));
                            }
                        }
                        None => trace!("ngrok: {}", line),
                    }
                }
                ProcessEvent::Exited { code } => {
                    info!("ngrok agent exited with {:?}", code);
                    let _ = status_tx.send(TunnelStatus::Closed);
                    break;
                }
            }
        }
    }

    pub fn api(&self) -> &AgentApi {
        &self.api
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<TunnelStatus> {
        self.status_tx.subscribe()
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.id()
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running()
    }

    /// Stop the agent, closing every tunnel it holds
    pub async fn kill(&mut self) {
        self.process.shutdown().await;
    }
}
