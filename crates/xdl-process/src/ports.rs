//! Free local port discovery

use tokio::net::TcpListener;
use xdl_core::prelude::*;

/// First port tried for the manifest server
pub const MANIFEST_PORT_START: u16 = 19000;

/// First port tried for the packager
pub const PACKAGER_PORT_START: u16 = 19001;

/// Find the first port at or above `start` that can currently be bound.
///
/// The probe listener is dropped before returning, so the caller still has
/// to bind it and may lose a race with another process.
pub async fn free_port_from(start: u16) -> Result<u16> {
    let mut port = start;
    loop {
        match TcpListener::bind(("0.0.0.0", port)).await {
            Ok(listener) => {
                drop(listener);
                debug!("Found free port {}", port);
                return Ok(port);
            }
            Err(e) => trace!("Port {} unavailable: {}", port, e),
        }
        port = port
            .checked_add(1)
            .ok_or_else(|| Error::process(format!("no free port at or above {start}")))?;
    }
}
