//! Child process supervision

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use crate::pid;
use xdl_core::events::ProcessEvent;
use xdl_core::prelude::*;

/// How long `shutdown()` waits after SIGTERM before force-killing
pub const GRACEFUL_EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything needed to launch a child process
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Printable command line for logs
    pub fn display(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }
}

/// A supervised child process with line-buffered output.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` background task
/// that calls `child.wait()`, so the real exit code is emitted as
/// `ProcessEvent::Exited { code }`. The handle keeps a kill channel, an atomic
/// exited flag for synchronous checks, and a [`Notify`] so `shutdown()` can
/// await exit without polling.
pub struct ManagedProcess {
    pid: Option<u32>,
    /// Consumed on first use (or on drop)
    kill_tx: Option<oneshot::Sender<()>>,
    exited: Arc<AtomicBool>,
    exit_notify: Arc<Notify>,
}

impl ManagedProcess {
    /// Spawn `spec`, forwarding stdout/stderr lines and the exit to `event_tx`.
    pub fn spawn(spec: &CommandSpec, event_tx: mpsc::Sender<ProcessEvent>) -> Result<Self> {
        info!("Spawning: {}", spec.display());

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound && spec.program == "node" {
                    Error::NodeNotFound
                } else {
                    Error::process_spawn(&spec.program, e.to_string())
                }
            })?;

        let pid = child.id();
        info!("{} started with PID: {:?}", spec.program, pid);

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::stdout_reader(stdout, event_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::stderr_reader(stderr, event_tx.clone()));
        }

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            event_tx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child`, waits for it to exit, emits `ProcessEvent::Exited`.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        event_tx: mpsc::Sender<ProcessEvent>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        let code: Option<i32> = tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => {
                        info!("Process exited with status: {:?}", status);
                        status.code()
                    }
                    Err(e) => {
                        error!("Error waiting for process: {}", e);
                        None
                    }
                }
            }
            _ = kill_rx => {
                info!("Kill signal received, force-killing process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => status.code(),
                    Err(e) => {
                        error!("Error waiting after kill: {}", e);
                        None
                    }
                }
            }
        };

        // has_exited() must be true before callers observe the event
        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();

        debug!("Sending ProcessEvent::Exited {{ code: {:?} }}", code);
        let _ = event_tx.send(ProcessEvent::Exited { code }).await;
    }

    async fn stdout_reader(stdout: tokio::process::ChildStdout, tx: mpsc::Sender<ProcessEvent>) {
        let mut reader = BufReader::new(stdout).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stdout: {}", line);
            if tx.send(ProcessEvent::Stdout(line)).await.is_err() {
                debug!("stdout channel closed");
                break;
            }
        }

        debug!("stdout reader finished");
    }

    async fn stderr_reader(stderr: tokio::process::ChildStderr, tx: mpsc::Sender<ProcessEvent>) {
        let mut reader = BufReader::new(stderr).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("stderr: {}", line);
            if tx.send(ProcessEvent::Stderr(line)).await.is_err() {
                debug!("stderr channel closed");
                break;
            }
        }

        debug!("stderr reader finished");
    }

    /// Stop the process: SIGTERM, wait up to [`GRACEFUL_EXIT_TIMEOUT`], then force kill.
    pub async fn shutdown(&mut self) {
        if self.has_exited() {
            debug!("Process already exited, nothing to stop");
            return;
        }

        // Create the `notified()` future before the final check so a
        // notification between the two cannot be missed.
        let exit_notify = Arc::clone(&self.exit_notify);
        let notified = exit_notify.notified();

        match self.pid {
            Some(pid) => {
                if let Err(e) = pid::terminate(pid) {
                    warn!("SIGTERM failed: {}", e);
                }
            }
            None => {
                self.force_kill();
                return;
            }
        }

        if self.has_exited() {
            return;
        }

        match tokio::time::timeout(GRACEFUL_EXIT_TIMEOUT, notified).await {
            Ok(()) => info!("Process exited gracefully"),
            Err(_) => {
                warn!("Timeout waiting for graceful exit, force killing");
                self.force_kill();
            }
        }
    }

    /// Force kill the process by signalling the wait task
    pub fn force_kill(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            // The wait task may already have exited naturally
            let _ = tx.send(());
        }
    }

    /// Wait until the process has exited
    pub async fn wait(&self) {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return;
        }
        notified.await;
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for ManagedProcess {
    fn drop(&mut self) {
        if !self.has_exited() {
            warn!("ManagedProcess dropped while process may still be running");
            self.force_kill();
        }
    }
}
