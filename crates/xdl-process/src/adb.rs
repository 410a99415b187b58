//! `adb reverse` port forwarding for connected Android devices

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use xdl_core::prelude::*;

/// Parse `adb devices` output into the serials of devices in `device` state
pub fn parse_devices(output: &str) -> Vec<String> {
    output
        .lines()
        .skip_while(|l| !l.starts_with("List of devices"))
        .skip(1)
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            match (parts.next(), parts.next()) {
                (Some(serial), Some("device")) => Some(serial.to_string()),
                _ => None,
            }
        })
        .collect()
}

/// Serials of attached, authorized devices
pub async fn connected_devices(adb: &Path) -> Result<Vec<String>> {
    let output = Command::new(adb)
        .arg("devices")
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| Error::process_spawn("adb", e.to_string()))?;
    Ok(parse_devices(&String::from_utf8_lossy(&output.stdout)))
}

async fn run_for_device(adb: &Path, serial: &str, args: &[String]) -> Result<()> {
    let status = Command::new(adb)
        .arg("-s")
        .arg(serial)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::process_spawn("adb", e.to_string()))?;
    if !status.success() {
        return Err(Error::process(format!(
            "adb {} failed for {serial}: {status}",
            args.join(" ")
        )));
    }
    Ok(())
}

fn tcp(port: u16) -> String {
    format!("tcp:{port}")
}

/// Forward each port on every connected device back to this machine.
///
/// Returns the number of devices configured; per-device failures are logged.
pub async fn reverse(adb: &Path, ports: &[u16]) -> Result<usize> {
    let devices = connected_devices(adb).await?;
    for serial in &devices {
        for port in ports {
            let args = vec!["reverse".to_string(), tcp(*port), tcp(*port)];
            if let Err(e) = run_for_device(adb, serial, &args).await {
                warn!("{}", e);
            }
        }
    }
    debug!("adb reverse {:?} on {} device(s)", ports, devices.len());
    Ok(devices.len())
}

/// Remove the reverse forwards set up by [`reverse`]
pub async fn reverse_remove(adb: &Path, ports: &[u16]) -> Result<()> {
    for serial in connected_devices(adb).await? {
        for port in ports {
            let args = vec![
                "reverse".to_string(),
                "--remove".to_string(),
                tcp(*port),
            ];
            if let Err(e) = run_for_device(adb, &serial, &args).await {
                debug!("{}", e);
            }
        }
    }
    Ok(())
}
