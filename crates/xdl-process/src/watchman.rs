//! Watchman recrawl recovery

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use xdl_core::prelude::*;

async fn run(watchman: &Path, args: &[&str], root: &Path) -> Result<()> {
    let status = Command::new(watchman)
        .args(args)
        .arg(root)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::process_spawn("watchman", e.to_string()))?;
    if !status.success() {
        return Err(Error::process(format!(
            "watchman {} failed: {status}",
            args.join(" ")
        )));
    }
    Ok(())
}

/// Drop and recreate watchman's watch of `root`
pub async fn recrawl(watchman: &Path, root: &Path) -> Result<()> {
    info!("Recreating watchman watch for {}", root.display());
    run(watchman, &["watch-del"], root).await?;
    run(watchman, &["watch-project"], root).await
}
