//! Signalling processes recorded by pid

use xdl_core::prelude::*;

#[cfg(unix)]
mod imp {
    use nix::errno::Errno;
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    use xdl_core::prelude::*;

    fn to_pid(pid: u32) -> Result<Pid> {
        i32::try_from(pid)
            .map(Pid::from_raw)
            .map_err(|_| Error::process(format!("invalid pid {pid}")))
    }

    pub fn is_alive(pid: u32) -> bool {
        match to_pid(pid) {
            Ok(pid) => !matches!(signal::kill(pid, None), Err(Errno::ESRCH)),
            Err(_) => false,
        }
    }

    pub fn send(pid: u32, sig: Signal) -> Result<()> {
        match signal::kill(to_pid(pid)?, sig) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(Error::process(format!("failed to signal {pid}: {e}"))),
        }
    }

    pub fn terminate(pid: u32) -> Result<()> {
        send(pid, Signal::SIGTERM)
    }

    pub fn kill(pid: u32) -> Result<()> {
        send(pid, Signal::SIGKILL)
    }
}

#[cfg(not(unix))]
mod imp {
    use std::process::{Command, Stdio};

    use xdl_core::prelude::*;

    pub fn is_alive(pid: u32) -> bool {
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {pid}"), "/NH"])
            .stderr(Stdio::null())
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn taskkill(pid: u32, force: bool) -> Result<()> {
        let mut cmd = Command::new("taskkill");
        cmd.args(["/PID", &pid.to_string()]);
        if force {
            cmd.arg("/F");
        }
        cmd.stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|_| ())
            .map_err(|e| Error::process(format!("failed to signal {pid}: {e}")))
    }

    pub fn terminate(pid: u32) -> Result<()> {
        taskkill(pid, false)
    }

    pub fn kill(pid: u32) -> Result<()> {
        taskkill(pid, true)
    }
}

/// Whether a process with this pid currently exists
pub fn is_alive(pid: u32) -> bool {
    imp::is_alive(pid)
}

/// Ask the process to exit (SIGTERM). A pid that is already gone is not an error.
pub fn terminate(pid: u32) -> Result<()> {
    debug!("Sending SIGTERM to {}", pid);
    imp::terminate(pid)
}

/// Force-kill the process (SIGKILL). A pid that is already gone is not an error.
pub fn kill(pid: u32) -> Result<()> {
    debug!("Sending SIGKILL to {}", pid);
    imp::kill(pid)
}

/// Terminate `pid` if it is still alive, logging instead of failing
pub fn terminate_if_alive(pid: u32) {
    if is_alive(pid) {
        if let Err(e) = terminate(pid) {
            warn!("Failed to terminate {}: {}", pid, e);
        }
    }
}

/// Force-kill `pid` if it is still alive, logging instead of failing
pub fn kill_if_alive(pid: u32) {
    if is_alive(pid) {
        if let Err(e) = kill(pid) {
            warn!("Failed to kill {}: {}", pid, e);
        }
    }
}
