//! # xdl-process - External Process Management
//!
//! Manages the child processes a development session depends on: the
//! JavaScript packager, the ngrok agent, and the platform tools (`adb`,
//! `watchman`) invoked along the way.
//!
//! Depends on [`xdl_core`] for domain types and error handling.
//!
//! ## Public API
//!
//! ### Process Management
//! - [`ManagedProcess`] - Spawn a child with line-buffered output and graceful stop
//! - [`CommandSpec`] - Program, args, working directory and env for a child
//! - [`pid`] - Signal processes recorded by pid
//!
//! ### Packager
//! - [`PackagerSupervisor`] - Spawn, readiness race, output pumping, stop
//! - [`PackagerOptions`] - Typed packager options and CLI arguments
//! - [`OutputClassifier`] - Line-by-line packager output classification
//! - [`ReadinessProbe`] - `/status` polling until the packager serves
//!
//! ### Tunnels and Tools
//! - [`NgrokAgent`], [`AgentApi`] - ngrok agent process and local API client
//! - [`ToolAvailability`] - Locate node, adb, watchman, ngrok
//! - [`adb`] - `adb reverse` port forwarding
//! - [`free_port_from()`] - Free local port discovery

pub mod adb;
pub mod ngrok;
pub mod options;
pub mod output;
pub mod packager;
pub mod pid;
pub mod ports;
pub mod process;
pub mod readiness;
pub mod tools;
pub mod watchman;

pub use ngrok::{AgentApi, AgentConfig, NgrokAgent, TunnelRequest};
pub use options::{PackagerOptions, UNION_MERGED_KEYS};
pub use output::{OutputAction, OutputClassifier, OutputPatterns, Stream};
pub use packager::{PackagerLaunch, PackagerState, PackagerSupervisor, SpawnedPackager};
pub use ports::{free_port_from, MANIFEST_PORT_START, PACKAGER_PORT_START};
pub use process::{CommandSpec, ManagedProcess};
pub use readiness::ReadinessProbe;
pub use tools::ToolAvailability;
