//! Packager readiness probe

use std::time::Duration;

use tokio::time::Instant;
use xdl_core::prelude::*;

/// Body fragment the packager's `/status` endpoint returns once it is serving
pub const DEFAULT_STATUS_MARKER: &str = "packager-status:running";

/// Delay between probe attempts
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How long to wait for the packager before giving up
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// Per-request timeout
const REQUEST_TIMEOUT: Duration = Duration::from_secs(2);

/// HTTP GET probe that polls a status URL until its body contains a marker.
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    pub url: String,
    pub marker: String,
    pub interval: Duration,
    pub timeout: Duration,
}

impl ReadinessProbe {
    /// Probe for a packager listening on `localhost:{port}`
    pub fn for_port(port: u16) -> Self {
        Self {
            url: format!("http://localhost:{port}/status"),
            marker: DEFAULT_STATUS_MARKER.to_string(),
            interval: DEFAULT_POLL_INTERVAL,
            timeout: DEFAULT_READY_TIMEOUT,
        }
    }

    pub fn with_marker(mut self, marker: impl Into<String>) -> Self {
        self.marker = marker.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Poll until ready, or fail with `Error::PackagerTimeout` once the window closes.
    pub async fn wait_ready(&self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::network(format!("failed to build HTTP client: {e}")))?;

        debug!("Probing packager readiness at {}", self.url);
        let deadline = Instant::now() + self.timeout;

        loop {
            match client.get(&self.url).send().await {
                Ok(response) if response.status().is_success() => match response.text().await {
                    Ok(body) if body.contains(&self.marker) => {
                        info!("Packager ready at {}", self.url);
                        return Ok(());
                    }
                    Ok(_) => trace!("Status body at {} missing marker", self.url),
                    Err(e) => debug!("Failed to read status body: {}", e),
                },
                Ok(response) => {
                    trace!("Readiness probe returned {} at {}", response.status(), self.url);
                }
                Err(e) => {
                    if !e.is_connect() {
                        debug!("Readiness probe failed: {}", e);
                    }
                }
            }

            if Instant::now() + self.interval > deadline {
                return Err(Error::PackagerTimeout {
                    url: self.url.clone(),
                    waited_ms: self.timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}
