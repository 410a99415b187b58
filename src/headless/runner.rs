//! Headless mode runner - start a session and stream its events

use std::path::Path;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use xdl_app::{ProjectSession, StartOptions, XdlContext};
use xdl_core::prelude::*;
use xdl_core::LogSink;

use super::HeadlessEvent;

/// Run a session until Ctrl-C or an HTTP shutdown request, emitting NDJSON
pub async fn run_headless(root: &Path, ctx: XdlContext, opts: StartOptions) -> Result<()> {
    info!("═══════════════════════════════════════════════════════");
    info!("xdl starting in HEADLESS mode");
    info!("Project: {}", root.display());
    info!("═══════════════════════════════════════════════════════");

    let forwarder = spawn_log_forwarder(&ctx.sink);
    let mut session = ProjectSession::new(root, ctx);

    let started = match session.start(opts).await {
        Ok(started) => started,
        Err(e) => {
            HeadlessEvent::error(&e).emit();
            session.stop().await;
            forwarder.abort();
            return Err(e);
        }
    };
    HeadlessEvent::started(root, &started).emit();

    let reason = match session.shutdown_requested() {
        Some(requested) => tokio::select! {
            _ = tokio::signal::ctrl_c() => "interrupted",
            _ = requested => "shutdown requested",
        },
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for Ctrl-C: {}", e);
            }
            "interrupted"
        }
    };
    info!("Stopping: {}", reason);

    session.stop().await;
    HeadlessEvent::stopped(Some(reason.to_string())).emit();
    forwarder.abort();

    info!("xdl headless mode exiting");
    Ok(())
}

fn spawn_log_forwarder(sink: &LogSink) -> JoinHandle<()> {
    let mut rx = sink.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(record) => HeadlessEvent::log(&record).emit(),
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Headless output dropped {} log records", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}
