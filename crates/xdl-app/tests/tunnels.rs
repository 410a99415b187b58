//! Tunnel manager behaviour against a scripted provider

mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::Fixture;
use serde_json::json;
use tokio::sync::broadcast;
use xdl_app::config::{get_randomness, PackagerInfoUpdate};
use xdl_app::{
    read_packager_info, set_packager_info, RetryPolicy, TunnelManager, TunnelOptions,
    TunnelProvider, TunnelSpec,
};
use xdl_core::{Error, LogSink, Result, TunnelStatus};

#[derive(Clone, Copy)]
enum Failure {
    AlreadyBound,
    Fatal,
}

/// Fails the first `failures` connects of each tunnel, then succeeds
struct ScriptedProvider {
    failures: u32,
    failure: Failure,
    delay: Duration,
    attempts: Mutex<HashMap<String, u32>>,
    hostnames: Mutex<Vec<String>>,
    kills: AtomicUsize,
    status_tx: broadcast::Sender<TunnelStatus>,
}

impl ScriptedProvider {
    fn new(failures: u32, failure: Failure) -> Self {
        let (status_tx, _) = broadcast::channel(4);
        Self {
            failures,
            failure,
            delay: Duration::ZERO,
            attempts: Mutex::new(HashMap::new()),
            hostnames: Mutex::new(Vec::new()),
            kills: AtomicUsize::new(0),
            status_tx,
        }
    }

    fn attempts(&self, name: &str) -> u32 {
        self.attempts.lock().unwrap().get(name).copied().unwrap_or(0)
    }

    fn hostnames(&self) -> Vec<String> {
        self.hostnames.lock().unwrap().clone()
    }
}

impl TunnelProvider for ScriptedProvider {
    async fn connect(&self, spec: &TunnelSpec) -> Result<String> {
        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(spec.name.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.hostnames.lock().unwrap().push(spec.hostname.clone());
        tokio::time::sleep(self.delay).await;

        if attempt <= self.failures {
            return Err(match self.failure {
                Failure::AlreadyBound => Error::tunnel_with_payload(
                    "failed to start tunnel",
                    json!({"error_code": 103, "msg": "already bound"}),
                ),
                Failure::Fatal => Error::config("bad authtoken"),
            });
        }
        Ok(format!("https://{}", spec.hostname))
    }

    async fn disconnect(&self, _name: &str) -> Result<()> {
        Ok(())
    }

    async fn kill(&self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn subscribe_status(&self) -> broadcast::Receiver<TunnelStatus> {
        self.status_tx.subscribe()
    }
}

/// One agent shared by every tunnel: killing it drops them all
struct SharedAgentProvider {
    packager_failures: u32,
    packager_attempts: AtomicUsize,
    live: Mutex<HashMap<String, String>>,
    status_tx: broadcast::Sender<TunnelStatus>,
}

impl SharedAgentProvider {
    fn new(packager_failures: u32) -> Self {
        let (status_tx, _) = broadcast::channel(4);
        Self {
            packager_failures,
            packager_attempts: AtomicUsize::new(0),
            live: Mutex::new(HashMap::new()),
            status_tx,
        }
    }

    fn is_live(&self, url: &str) -> bool {
        self.live.lock().unwrap().values().any(|u| u == url)
    }
}

impl TunnelProvider for SharedAgentProvider {
    async fn connect(&self, spec: &TunnelSpec) -> Result<String> {
        if spec.name == "packager" {
            let attempt = self.packager_attempts.fetch_add(1, Ordering::SeqCst) + 1;
            if attempt as u32 <= self.packager_failures {
                return Err(Error::tunnel_with_payload(
                    "failed to start tunnel",
                    json!({"error_code": 103}),
                ));
            }
        }
        let url = format!("https://{}", spec.hostname);
        self.live
            .lock()
            .unwrap()
            .insert(spec.name.clone(), url.clone());
        Ok(url)
    }

    async fn disconnect(&self, name: &str) -> Result<()> {
        self.live.lock().unwrap().remove(name);
        Ok(())
    }

    async fn kill(&self) {
        self.live.lock().unwrap().clear();
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn subscribe_status(&self) -> broadcast::Receiver<TunnelStatus> {
        self.status_tx.subscribe()
    }
}

fn with_ports(fixture: &Fixture) {
    set_packager_info(
        fixture.root(),
        &PackagerInfoUpdate {
            packager_port: Some(Some(19001)),
            expo_server_port: Some(Some(19000)),
            ..Default::default()
        },
    )
    .unwrap();
}

fn manager<P: TunnelProvider + Sync + 'static>(
    fixture: &Fixture,
    provider: Arc<P>,
    timeout: Duration,
) -> TunnelManager<P> {
    let options = TunnelOptions {
        timeout,
        policy: RetryPolicy {
            backoff: Duration::from_millis(10),
            ..Default::default()
        },
        ..Default::default()
    };
    TunnelManager::new(
        fixture.root(),
        provider,
        fixture.users(true),
        LogSink::default(),
        options,
    )
}

#[tokio::test]
async fn test_persistent_failure_gives_up_after_exactly_three_attempts() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let provider = Arc::new(ScriptedProvider::new(u32::MAX, Failure::AlreadyBound));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));

    let err = manager.start().await.unwrap_err();

    assert!(matches!(err, Error::Tunnel { payload: Some(_), .. }));
    assert_eq!(provider.attempts("expo"), 3);
    assert_eq!(provider.attempts("packager"), 0);
    assert_eq!(read_packager_info(fixture.root()).expo_server_ngrok_url, None);
}

#[tokio::test]
async fn test_already_bound_kills_then_regenerates_randomness() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let provider = Arc::new(ScriptedProvider::new(2, Failure::AlreadyBound));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));

    let initial = get_randomness(fixture.root()).unwrap();
    let urls = manager.start().await.unwrap();

    // one kill from the initial stop, one per tunnel after its first failure
    assert_eq!(provider.kills.load(Ordering::SeqCst), 3);
    // packager remediation forces the manifest tunnel to reconnect
    assert_eq!(provider.attempts("expo"), 4);
    assert_eq!(provider.attempts("packager"), 4);

    let randomness = urls
        .expo_server_url
        .strip_prefix("https://")
        .and_then(|rest| rest.strip_suffix(".jane-doe.my-app.exp.direct"))
        .unwrap();
    assert_ne!(randomness, initial);
    assert_eq!(
        urls.packager_url,
        format!("https://packager.{randomness}.jane-doe.my-app.exp.direct")
    );

    let info = read_packager_info(fixture.root());
    assert_eq!(info.expo_server_ngrok_url, Some(urls.expo_server_url));
    assert_eq!(info.packager_ngrok_url, Some(urls.packager_url));
}

#[tokio::test]
async fn test_kill_remediation_keeps_hostname() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let provider = Arc::new(ScriptedProvider::new(1, Failure::AlreadyBound));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));

    manager.start().await.unwrap();

    let expo: Vec<String> = provider
        .hostnames()
        .into_iter()
        .filter(|h| !h.starts_with("packager."))
        .collect();
    assert_eq!(expo.len(), 3);
    assert!(expo.iter().all(|h| *h == expo[0]));
}

#[tokio::test]
async fn test_non_recoverable_error_is_not_retried() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let provider = Arc::new(ScriptedProvider::new(u32::MAX, Failure::Fatal));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));

    let err = manager.start().await.unwrap_err();

    assert!(matches!(err, Error::Tunnel { .. }));
    assert_eq!(provider.attempts("expo"), 1);
    assert_eq!(provider.attempts("packager"), 0);
}

#[tokio::test]
async fn test_requires_login_and_ports() {
    let fixture = Fixture::app();
    let provider = Arc::new(ScriptedProvider::new(0, Failure::Fatal));

    let mut logged_out = TunnelManager::new(
        fixture.root(),
        provider.clone(),
        fixture.users(false),
        LogSink::default(),
        TunnelOptions::default(),
    );
    assert!(matches!(logged_out.start().await, Err(Error::NotLoggedIn)));

    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));
    assert!(matches!(
        manager.start().await,
        Err(Error::NoPackagerPort { .. })
    ));
    assert_eq!(provider.attempts("expo"), 0);
}

#[tokio::test]
async fn test_timeout_still_persists_late_success() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let mut provider = ScriptedProvider::new(0, Failure::Fatal);
    provider.delay = Duration::from_millis(300);
    let provider = Arc::new(provider);
    let mut manager = manager(&fixture, provider, Duration::from_millis(50));

    assert!(matches!(manager.start().await, Err(Error::TunnelsTimedOut)));

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while read_packager_info(fixture.root()).expo_server_ngrok_url.is_none() {
        assert!(std::time::Instant::now() < deadline, "late tunnel never persisted");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_stop_clears_tunnel_fields_only() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let provider = Arc::new(ScriptedProvider::new(0, Failure::Fatal));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));
    manager.start().await.unwrap();
    let kills_before = provider.kills.load(Ordering::SeqCst);

    manager.stop().await;

    let info = read_packager_info(fixture.root());
    assert_eq!(info.expo_server_ngrok_url, None);
    assert_eq!(info.packager_ngrok_url, None);
    assert_eq!(info.ngrok_pid, None);
    assert_eq!(info.packager_port, Some(19001));
    assert_eq!(info.expo_server_port, Some(19000));
    assert_eq!(provider.kills.load(Ordering::SeqCst), kills_before + 1);
}

#[tokio::test]
async fn test_packager_remediation_leaves_both_tunnels_live() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    // first failure kills the shared agent, second regenerates randomness
    let provider = Arc::new(SharedAgentProvider::new(2));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));

    let urls = manager.start().await.unwrap();

    let info = read_packager_info(fixture.root());
    let expo_url = info.expo_server_ngrok_url.unwrap();
    let packager_url = info.packager_ngrok_url.unwrap();
    assert!(provider.is_live(&expo_url), "manifest tunnel is dead");
    assert!(provider.is_live(&packager_url), "packager tunnel is dead");
    assert_eq!(expo_url, urls.expo_server_url);

    let randomness = get_randomness(fixture.root()).unwrap();
    assert_eq!(
        expo_url,
        format!("https://{randomness}.jane-doe.my-app.exp.direct")
    );
    assert_eq!(
        packager_url,
        format!("https://packager.{randomness}.jane-doe.my-app.exp.direct")
    );
}

#[cfg(unix)]
#[tokio::test]
async fn test_stop_force_kills_foreign_agent() {
    let fixture = Fixture::app();
    with_ports(&fixture);
    let mut agent = std::process::Command::new("sh")
        .args(["-c", "trap '' TERM; while true; do sleep 1; done"])
        .spawn()
        .unwrap();
    set_packager_info(
        fixture.root(),
        &PackagerInfoUpdate {
            ngrok_pid: Some(Some(agent.id())),
            ..Default::default()
        },
    )
    .unwrap();
    let provider = Arc::new(ScriptedProvider::new(0, Failure::Fatal));
    let mut manager = manager(&fixture, provider.clone(), Duration::from_secs(5));
    tokio::time::sleep(Duration::from_millis(100)).await;

    manager.stop().await;

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while agent.try_wait().unwrap().is_none() {
        assert!(std::time::Instant::now() < deadline, "agent survived stop");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(read_packager_info(fixture.root()).ngrok_pid, None);
    assert_eq!(provider.kills.load(Ordering::SeqCst), 0);
}
