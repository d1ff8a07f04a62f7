//! tunnelbar: supervision core for an SSH tunnel and a dependent node service.
//!
//! Both services are launchd user agents. This crate polls them, derives a
//! single connection state, drives start/stop/restart requests, and keeps a
//! crash watchdog installed so the services never outlive the app.
//!
//! # Architecture
//!
//! - **Command runner** (`command`): runs `launchctl`/`lsof`/`ssh`, never fails
//! - **Probe** (`probe`): one read-only status query per service
//! - **Status aggregator** (`status`): poll loop and the published snapshot
//! - **Controller** (`control`): per-service toggle/restart state machine
//! - **Lifecycle** (`lifecycle`, `watchdog`): startup order, teardown, crash watchdog
//! - **Host** (`host`): one long-running process serving the shell over stdio JSON
//!
//! UI layers subscribe to [`StatusAggregator::subscribe`] and call into
//! [`ServiceController`]; they never write state directly.

pub mod app_dirs;
pub mod command;
pub mod config;
pub mod connectivity;
pub mod control;
pub mod error;
pub mod host;
pub mod launchd;
pub mod lifecycle;
pub mod logging;
pub mod probe;
pub mod status;
pub mod voice_command;
pub mod watchdog;

#[cfg(test)]
mod test_utils;

pub use command::{CommandOutput, CommandRunner, SystemCommandRunner};
pub use config::{ConfigHandle, MonitorConfig};
pub use control::{ControlOutcome, RejectReason, ServiceAction, ServiceController};
pub use error::{MonitorError, Result};
pub use host::HostCore;
pub use lifecycle::LifecycleManager;
pub use status::{ConnectionState, ServiceKind, StatusAggregator, StatusSnapshot};
pub use watchdog::{WatchdogPaths, WatchdogVerdict};
