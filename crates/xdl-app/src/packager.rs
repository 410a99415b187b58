//! Project packager: launch configuration and persisted state
//!
//! Wraps the [`PackagerSupervisor`] with everything that depends on the
//! project: port choice, typed options from the app config, the node command
//! line, and the `packagerPort`/`packagerPid` fields of `packager-info.json`.

use std::path::{Path, PathBuf};

use tokio::sync::watch;
use xdl_core::prelude::*;
use xdl_core::{gte_sdk_version, read_config, LogSink, ProjectConfig};
use xdl_process::{
    free_port_from, pid, CommandSpec, PackagerLaunch, PackagerOptions, PackagerState,
    PackagerSupervisor, ReadinessProbe, PACKAGER_PORT_START,
};

use crate::config::{read_packager_info, set_packager_info, PackagerInfoUpdate, PackagerSettings};

/// Packager CLI used when the app config has no `rnCliPath`
pub const DEFAULT_CLI_PATH: &str = "node_modules/react-native/local-cli/cli.js";
const LOG_REPORTER_PATH: &str = "node_modules/expo/tools/LogReporter";
const LOG_REPORTER_MIN_SDK: &str = "16.0.0";

/// Per-start packager options
#[derive(Debug, Clone, Default)]
pub struct PackagerStartOptions {
    pub reset_cache: bool,
    pub non_persistent: bool,
    pub max_workers: Option<u32>,
    /// Replaces `node <cli.js>`; packager arguments are still appended
    pub command: Option<CommandSpec>,
}

/// Packager of one project
pub struct ProjectPackager {
    root: PathBuf,
    settings: PackagerSettings,
    node: Option<PathBuf>,
    watchman: Option<PathBuf>,
    supervisor: PackagerSupervisor,
}

impl ProjectPackager {
    pub fn new(
        root: impl Into<PathBuf>,
        sink: LogSink,
        settings: PackagerSettings,
        node: Option<PathBuf>,
        watchman: Option<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            settings,
            node,
            watchman,
            supervisor: PackagerSupervisor::new(sink),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<PackagerState> {
        self.supervisor.subscribe()
    }

    pub fn state(&self) -> PackagerState {
        self.supervisor.state()
    }

    pub fn pid(&self) -> Option<u32> {
        self.supervisor.pid()
    }

    /// Resolve port, options and command line for a start
    pub async fn prepare(&self, opts: &PackagerStartOptions) -> Result<PackagerLaunch> {
        let config = read_config(&self.root)?;
        let user_opts = config.exp.packager_opts.clone().unwrap_or_default();

        let port = match user_opts
            .get("port")
            .and_then(serde_json::Value::as_u64)
            .and_then(|p| u16::try_from(p).ok())
        {
            Some(port) => port,
            None => free_port_from(PACKAGER_PORT_START).await?,
        };

        let mut options = PackagerOptions::new(port);
        options.non_persistent = opts.non_persistent;
        options.max_workers = opts.max_workers.or(self.settings.max_workers);
        if gte_sdk_version(&config.exp, LOG_REPORTER_MIN_SDK) {
            options.custom_log_reporter_path =
                Some(self.root.join(LOG_REPORTER_PATH).to_string_lossy().into_owned());
        }
        options.merge_user(&user_opts, &self.root)?;
        options.reset_cache |= opts.reset_cache;
        options.verbose |= std::env::var_os("EXPO_DEBUG").is_some();

        let command = match &opts.command {
            Some(spec) => spec.clone().args(options.to_args()),
            None => self.node_command(&config, &options),
        };
        debug!("Packager command: {}", command.display());

        Ok(PackagerLaunch {
            root: self.root.clone(),
            command,
            port: options.port,
            probe: ReadinessProbe::for_port(options.port)
                .with_marker(self.settings.status_marker.clone())
                .with_timeout(self.settings.ready_timeout()),
            patterns: self.settings.output_patterns(),
            watchman: self.watchman.clone(),
        })
    }

    fn node_command(&self, config: &ProjectConfig, options: &PackagerOptions) -> CommandSpec {
        let (cli_path, custom) = match &config.exp.rn_cli_path {
            Some(path) => (self.root.join(path), true),
            None => (self.root.join(DEFAULT_CLI_PATH), false),
        };
        let program = self
            .node
            .as_ref()
            .map_or_else(|| "node".to_string(), |p| p.to_string_lossy().into_owned());

        let mut spec = CommandSpec::new(program, &self.root)
            .args([cli_path.to_string_lossy().into_owned()])
            .args(options.to_args())
            .env("REACT_NATIVE_APP_ROOT", self.root.to_string_lossy())
            .env("ELECTRON_RUN_AS_NODE", "1");
        if custom {
            spec = spec.env(
                "NODE_PATH",
                self.root.join("node_modules").to_string_lossy(),
            );
        }
        spec
    }

    /// Start the packager and wait until it serves requests.
    ///
    /// `packagerPort` and `packagerPid` are persisted as soon as the process
    /// exists and cleared again if it never becomes ready.
    pub async fn start(&mut self, opts: &PackagerStartOptions) -> Result<u16> {
        let launch = self.prepare(opts).await?;
        let spawned = self.supervisor.spawn(launch).await?;
        set_packager_info(
            &self.root,
            &PackagerInfoUpdate {
                packager_port: Some(Some(spawned.port)),
                packager_pid: Some(spawned.pid),
                ..Default::default()
            },
        )?;

        if let Err(e) = self.supervisor.wait_ready().await {
            clear_packager(&self.root);
            return Err(e);
        }
        Ok(spawned.port)
    }

    /// Stop the owned process, or the recorded pid when there is none.
    /// Always clears `packagerPort` and `packagerPid`.
    pub async fn stop(&mut self) {
        let owned = self.supervisor.is_running();
        self.supervisor.stop().await;
        if !owned {
            if let Some(recorded) = read_packager_info(&self.root).packager_pid {
                debug!("Stopping recorded packager pid {}", recorded);
                pid::terminate_if_alive(recorded);
            }
        }
        clear_packager(&self.root);
    }
}

fn clear_packager(root: &Path) {
    if let Err(e) = set_packager_info(root, &PackagerInfoUpdate::clear_packager()) {
        warn!("Failed to clear packager info: {}", e);
    }
}
