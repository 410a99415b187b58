//! Public tunnels to the manifest server and packager
//!
//! - [`TunnelProvider`] - Seam for whatever opens public endpoints
//! - [`NgrokProvider`] - ngrok agent implementation
//! - [`RetryPolicy`] - Per-tunnel retry decisions with remediations
//! - [`TunnelManager`] - Start/stop orchestration and persisted tunnel state

pub mod manager;
pub mod provider;
pub mod retry;

pub use manager::{domainify, TunnelManager, TunnelOptions, TunnelUrls};
pub use provider::{LocalTunnelProvider, NgrokProvider, TunnelProvider, TunnelSpec};
pub use retry::{Remediation, RetryDecision, RetryPolicy, MAX_ATTEMPTS, RETRY_BACKOFF};
