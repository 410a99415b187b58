//! xdl - Development session lifecycle for mobile projects
//!
//! This is the binary entry point. All session logic lives in `xdl-app`.

mod commands;
mod headless;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use xdl_app::XdlConfig;

/// xdl - Run and inspect a project's development session
#[derive(Parser, Debug)]
#[command(name = "xdl")]
#[command(about = "Development session lifecycle for mobile projects", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the manifest server, packager and tunnels; prints NDJSON events
    Start {
        /// Project root
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        /// How devices reach the session: lan, localhost or tunnel
        #[arg(long, value_name = "TYPE")]
        host: Option<String>,

        /// Skip tunnels, manifest signing and the heartbeat
        #[arg(long)]
        offline: bool,

        /// Run the packager without file watching
        #[arg(long)]
        non_persistent: bool,
    },

    /// Stop the session running for a project
    Stop {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the session status (running, ill or exited)
    Status {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,
    },

    /// Print the manifest URL, or the packager URL with --packager
    Url {
        #[arg(value_name = "PATH")]
        path: Option<PathBuf>,

        #[arg(long)]
        packager: bool,
    },
}

fn project_root(path: Option<PathBuf>) -> PathBuf {
    path.unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let config = XdlConfig::load_default();
    xdl_core::logging::init(&config.logging)?;

    match args.command {
        Command::Start {
            path,
            host,
            offline,
            non_persistent,
        } => {
            let root = project_root(path);
            commands::start(config, &root, host.as_deref(), offline, non_persistent).await
        }
        Command::Stop { path } => {
            commands::stop(&project_root(path)).await;
            Ok(())
        }
        Command::Status { path } => {
            println!("{}", commands::status(&project_root(path)));
            Ok(())
        }
        Command::Url { path, packager } => {
            println!("{}", commands::url(&config, &project_root(path), packager)?);
            Ok(())
        }
    }
}
