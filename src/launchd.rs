//! launchd adapter.
//!
//! Builds the concrete `launchctl` and `lsof` invocations the core needs and
//! runs them through a [`CommandRunner`]. Nothing here interprets results
//! beyond "did the tool accept it"; parsing lives in [`crate::probe`].
//!
//! | Operation | Invocation |
//! |-----------|------------|
//! | status | `launchctl print gui/<uid>/<label>` |
//! | register (load + start) | `launchctl bootstrap gui/<uid> <plist>` |
//! | unload (stop + deregister) | `launchctl bootout gui/<uid>/<label>` |
//! | signal (legacy stop path) | `launchctl kill <SIG> gui/<uid>/<label>` |
//! | listening pids | `lsof -nP -iTCP:<port> -sTCP:LISTEN -t` |

use crate::command::CommandRunner;
use crate::config::SupervisorConfig;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Thin wrapper over `launchctl`/`lsof` for one launchd domain.
#[derive(Clone)]
pub struct Supervisor {
    runner: Arc<dyn CommandRunner>,
    launchctl: PathBuf,
    lsof: PathBuf,
    domain: String,
}

impl Supervisor {
    /// Create a supervisor adapter from the configured tool paths.
    pub fn new(runner: Arc<dyn CommandRunner>, config: &SupervisorConfig) -> Self {
        let domain = config.domain.clone().unwrap_or_else(default_domain);
        Self {
            runner,
            launchctl: config.launchctl_path.clone(),
            lsof: config.lsof_path.clone(),
            domain,
        }
    }

    /// The launchd domain target, e.g. `gui/501`.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Fully-qualified service target, e.g. `gui/501/com.example.tunnel`.
    pub fn service_target(&self, label: &str) -> String {
        format!("{}/{label}", self.domain)
    }

    /// Free-text status report for `label`. Empty when the unit is unknown.
    pub async fn print(&self, label: &str) -> String {
        let target = self.service_target(label);
        self.runner
            .run(&self.launchctl, &["print", target.as_str()])
            .await
    }

    /// Register (load and start) the unit defined by `plist`.
    ///
    /// Returns whether `launchctl` reported success. Callers do not act on
    /// the value; the next poll reconciles.
    pub async fn bootstrap(&self, plist: &Path) -> bool {
        let plist_arg = plist.to_string_lossy();
        let out = self
            .runner
            .output(&self.launchctl, &["bootstrap", self.domain.as_str(), &plist_arg])
            .await;
        info!(plist = %plist.display(), accepted = out.success, "launchctl bootstrap");
        out.success
    }

    /// Unload (stop and deregister) `label`.
    ///
    /// Preferred over signalling: an unloaded unit cannot be relaunched by
    /// its `KeepAlive` policy.
    pub async fn bootout(&self, label: &str) -> bool {
        let target = self.service_target(label);
        let out = self
            .runner
            .output(&self.launchctl, &["bootout", target.as_str()])
            .await;
        info!(label, accepted = out.success, "launchctl bootout");
        out.success
    }

    /// Send `signal` (e.g. `SIGTERM`) to the service's process.
    pub async fn kill(&self, signal: &str, label: &str) -> bool {
        let target = self.service_target(label);
        let out = self
            .runner
            .output(&self.launchctl, &["kill", signal, target.as_str()])
            .await;
        info!(label, signal, accepted = out.success, "launchctl kill");
        out.success
    }

    /// Pids holding `port` in LISTEN state.
    pub async fn listening_pids(&self, port: u16) -> Vec<u32> {
        let port_arg = format!("-iTCP:{port}");
        let out = self
            .runner
            .run(&self.lsof, &["-nP", port_arg.as_str(), "-sTCP:LISTEN", "-t"])
            .await;
        let pids: Vec<u32> = out
            .lines()
            .filter_map(|line| line.trim().parse::<u32>().ok())
            .filter(|pid| *pid > 0)
            .collect();
        debug!(port, ?pids, "listening pids");
        pids
    }

    /// Whether any process listens on `port`.
    pub async fn port_listening(&self, port: u16) -> bool {
        !self.listening_pids(port).await.is_empty()
    }
}

/// `gui/<uid>` for the current user.
pub fn default_domain() -> String {
    // SAFETY: getuid has no preconditions and cannot fail.
    let uid = unsafe { libc::getuid() };
    format!("gui/{uid}")
}
