//! Packager process supervision
//!
//! [`PackagerSupervisor`] owns the bundler child process, pumps its output
//! through the [`OutputClassifier`] into the project [`LogSink`], and
//! publishes its lifecycle on a `watch` channel:
//!
//! ```text
//! Stopped → Starting → Running → Stopping → Stopped
//!              │          │
//!              └──────────┴──→ Errored (unexpected exit / not ready)
//! ```

use std::path::PathBuf;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use xdl_core::events::{LogEventType, LogTag, ProcessEvent};
use xdl_core::prelude::*;
use xdl_core::{LogLevel, LogSink};

use crate::output::{OutputAction, OutputClassifier, OutputPatterns, Stream};
use crate::process::{CommandSpec, ManagedProcess};
use crate::readiness::ReadinessProbe;
use crate::watchman;

/// Packager lifecycle state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackagerState {
    Stopped,
    Starting { port: u16, pid: Option<u32> },
    Running { port: u16, pid: Option<u32> },
    Stopping,
    Errored { message: String, code: Option<i32> },
}

impl PackagerState {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            PackagerState::Starting { .. } | PackagerState::Running { .. }
        )
    }
}

/// Everything needed to launch the packager
#[derive(Debug, Clone)]
pub struct PackagerLaunch {
    pub root: PathBuf,
    pub command: CommandSpec,
    pub port: u16,
    pub probe: ReadinessProbe,
    pub patterns: OutputPatterns,
    /// `watchman` binary used for recrawl recovery, if installed
    pub watchman: Option<PathBuf>,
}

/// Returned once the packager process has been spawned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpawnedPackager {
    pub port: u16,
    pub pid: Option<u32>,
}

/// Supervises a single packager process
pub struct PackagerSupervisor {
    sink: LogSink,
    state_tx: watch::Sender<PackagerState>,
    process: Option<ManagedProcess>,
    probe: Option<ReadinessProbe>,
    port: Option<u16>,
    output_task: Option<JoinHandle<()>>,
}

impl PackagerSupervisor {
    pub fn new(sink: LogSink) -> Self {
        let (state_tx, _) = watch::channel(PackagerState::Stopped);
        Self {
            sink,
            state_tx,
            process: None,
            probe: None,
            port: None,
            output_task: None,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PackagerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> PackagerState {
        self.state_tx.borrow().clone()
    }

    /// Whether a process handle exists and is still running
    pub fn is_running(&self) -> bool {
        self.process.as_ref().is_some_and(ManagedProcess::is_running)
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().and_then(ManagedProcess::id)
    }

    /// Spawn the packager, stopping any previous instance first.
    ///
    /// Returns as soon as the process exists; call [`wait_ready`](Self::wait_ready)
    /// to wait for it to serve requests.
    pub async fn spawn(&mut self, launch: PackagerLaunch) -> Result<SpawnedPackager> {
        self.stop().await;

        let classifier = OutputClassifier::new(&launch.patterns)?;
        let (event_tx, event_rx) = mpsc::channel(256);
        let process = ManagedProcess::spawn(&launch.command, event_tx)?;
        let pid = process.id();

        self.state_tx.send_replace(PackagerState::Starting {
            port: launch.port,
            pid,
        });

        self.output_task = Some(tokio::spawn(Self::pump_output(
            event_rx,
            classifier,
            self.sink.clone(),
            self.state_tx.clone(),
            launch.root.clone(),
            launch.watchman.clone(),
        )));
        self.process = Some(process);
        self.probe = Some(launch.probe);
        self.port = Some(launch.port);

        Ok(SpawnedPackager {
            port: launch.port,
            pid,
        })
    }

    /// Race the readiness probe against the process exiting; first one wins.
    pub async fn wait_ready(&mut self) -> Result<()> {
        let Some(probe) = self.probe.clone() else {
            return Err(Error::process("packager has not been spawned"));
        };
        let mut state_rx = self.state_tx.subscribe();

        let result = tokio::select! {
            ready = probe.wait_ready() => ready,
            code = wait_for_exit(&mut state_rx) => Err(Error::PackagerExited { code }),
        };

        match result {
            Ok(()) => {
                if let Some(port) = self.port {
                    self.state_tx.send_replace(PackagerState::Running {
                        port,
                        pid: self.pid(),
                    });
                }
                self.sink
                    .milestone(LogEventType::PackagerReady, "Packager started!");
                Ok(())
            }
            Err(e) => {
                if let Some(process) = self.process.as_mut() {
                    self.state_tx.send_replace(PackagerState::Stopping);
                    process.shutdown().await;
                }
                self.process = None;
                self.state_tx.send_replace(PackagerState::Errored {
                    message: e.to_string(),
                    code: match &e {
                        Error::PackagerExited { code } => *code,
                        _ => None,
                    },
                });
                Err(e)
            }
        }
    }

    /// Stop the packager if this supervisor owns one. Never fails.
    pub async fn stop(&mut self) {
        let Some(mut process) = self.process.take() else {
            return;
        };
        self.state_tx.send_replace(PackagerState::Stopping);
        if process.is_running() {
            info!("Stopping packager");
            process.shutdown().await;
            process.wait().await;
        }
        if let Some(task) = self.output_task.take() {
            // Let the pump drain the exit event; it finishes on its own.
            let _ = tokio::time::timeout(std::time::Duration::from_millis(500), task).await;
        }
        self.probe = None;
        self.port = None;
        self.state_tx.send_replace(PackagerState::Stopped);
    }

    async fn pump_output(
        mut rx: mpsc::Receiver<ProcessEvent>,
        mut classifier: OutputClassifier,
        sink: LogSink,
        state_tx: watch::Sender<PackagerState>,
        root: PathBuf,
        watchman_path: Option<PathBuf>,
    ) {
        while let Some(event) = rx.recv().await {
            let actions = match event {
                ProcessEvent::Stdout(line) => classifier.feed(Stream::Stdout, &line),
                ProcessEvent::Stderr(line) => classifier.feed(Stream::Stderr, &line),
                ProcessEvent::Exited { code } => {
                    apply_actions(classifier.flush(), &sink, &root, watchman_path.as_ref());
                    let stopping = matches!(*state_tx.borrow(), PackagerState::Stopping);
                    if stopping {
                        debug!("Packager exited during stop with {:?}", code);
                    } else {
                        sink.log(
                            LogLevel::Error,
                            LogTag::Packager,
                            format!("Packager process exited with code {code:?}"),
                        );
                        state_tx.send_replace(PackagerState::Errored {
                            message: "packager exited".to_string(),
                            code,
                        });
                    }
                    break;
                }
            };
            apply_actions(actions, &sink, &root, watchman_path.as_ref());
        }
    }
}

fn apply_actions(
    actions: Vec<OutputAction>,
    sink: &LogSink,
    root: &std::path::Path,
    watchman_path: Option<&PathBuf>,
) {
    for action in actions {
        match action {
            OutputAction::Log { level, line } => sink.log(level, LogTag::Packager, line),
            OutputAction::WatchmanRecrawl => match watchman_path {
                Some(path) => {
                    let path = path.clone();
                    let root = root.to_path_buf();
                    let sink = sink.clone();
                    tokio::spawn(async move {
                        match watchman::recrawl(&path, &root).await {
                            Ok(()) => sink.info("Watchman recrawl complete."),
                            Err(e) => sink.warn(format!("Watchman recrawl failed: {e}")),
                        }
                    });
                }
                None => sink.warn("Watchman needs a recrawl but is not installed."),
            },
        }
    }
}

/// Resolve once the state becomes `Errored` from an exit; pends forever otherwise
async fn wait_for_exit(rx: &mut watch::Receiver<PackagerState>) -> Option<i32> {
    loop {
        if let PackagerState::Errored { code, .. } = &*rx.borrow_and_update() {
            return *code;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

impl Drop for PackagerSupervisor {
    fn drop(&mut self) {
        if let Some(task) = self.output_task.take() {
            task.abort();
        }
    }
}
