//! Startup and teardown of the supervised services.
//!
//! Startup, in order:
//!
//! 1. ensure the runtime directory
//! 2. write the pid file
//! 3. install and register the crash watchdog
//! 4. register the tunnel
//! 5. wait the startup grace period
//! 6. register the node
//!
//! Shutdown, in order: stop the poll loop, wait for it and for any control
//! operation still running, unload the node, the tunnel and the watchdog,
//! then delete the pid file and watchdog artifacts. Shutdown runs at most
//! once. A startup overlapping a shutdown stops registering units as soon as
//! the shutdown begins.
//!
//! Every step is best-effort. Failures are logged and the sequence goes on;
//! the next poll shows what actually happened.

use crate::command::CommandRunner;
use crate::config::ConfigHandle;
use crate::launchd::Supervisor;
use crate::status::StatusAggregator;
use crate::watchdog::{self, WatchdogPaths};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// What [`LifecycleManager::startup`] managed to do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StartupReport {
    /// Whether this session never started because shutdown had begun.
    pub skipped: bool,
    pub pid_file_written: bool,
    pub watchdog_installed: bool,
    pub tunnel_accepted: bool,
    pub node_accepted: bool,
}

/// Owns the process-level lifecycle: pid file, watchdog and the initial
/// start / final stop of both services.
pub struct LifecycleManager {
    runner: Arc<dyn CommandRunner>,
    config: ConfigHandle,
    aggregator: Arc<StatusAggregator>,
    paths: WatchdogPaths,
    shut_down: AtomicBool,
}

impl LifecycleManager {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: ConfigHandle,
        aggregator: Arc<StatusAggregator>,
    ) -> Self {
        let label = config.snapshot().lifecycle.watchdog_label;
        Self {
            runner,
            config,
            aggregator,
            paths: WatchdogPaths::default_paths(&label),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Use explicit artifact locations instead of the standard ones.
    pub fn with_paths(mut self, paths: WatchdogPaths) -> Self {
        self.paths = paths;
        self
    }

    /// Where the pid file and watchdog artifacts live.
    pub fn paths(&self) -> &WatchdogPaths {
        &self.paths
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Bring the services up for this app session.
    pub async fn startup(&self) -> StartupReport {
        let _operation = self.aggregator.track_operation();
        if self.aggregator.is_cancelled() {
            debug!("shutdown already began, skipping startup");
            return StartupReport {
                skipped: true,
                ..StartupReport::default()
            };
        }

        let config = self.config.snapshot();
        let supervisor = Supervisor::new(self.runner.clone(), &config.supervisor);
        let mut report = StartupReport::default();

        let pid = std::process::id();
        match self
            .paths
            .ensure_runtime_dir()
            .and_then(|()| watchdog::write_pid_file(&self.paths, pid))
        {
            Ok(()) => {
                report.pid_file_written = true;
                info!(pid, path = %self.paths.pid_file.display(), "pid file written");
            }
            Err(e) => warn!(error = %e, "pid file not written, watchdog cannot guard this session"),
        }

        match watchdog::install(&self.paths, &config, &supervisor).await {
            Ok(accepted) => report.watchdog_installed = accepted,
            Err(e) => warn!(error = %e, "watchdog not installed"),
        }

        if self.aggregator.is_cancelled() {
            info!("shutdown began during startup, tunnel not registered");
            return report;
        }
        report.tunnel_accepted = supervisor.bootstrap(&config.tunnel.plist_path).await;
        info!(accepted = report.tunnel_accepted, "tunnel registered");

        let grace = config.lifecycle.startup_grace();
        info!(grace_ms = grace.as_millis() as u64, "waiting for tunnel before starting node");
        tokio::select! {
            biased;
            _ = self.aggregator.cancelled() => {}
            _ = tokio::time::sleep(grace) => {}
        }
        if self.aggregator.is_cancelled() {
            info!("shutdown began during startup, node not registered");
            return report;
        }

        report.node_accepted = supervisor.bootstrap(&config.node.plist_path).await;
        info!(accepted = report.node_accepted, "node registered");

        report
    }

    /// Tear everything down. Must complete before the process exits.
    ///
    /// Returns `false` if shutdown had already run.
    pub async fn shutdown(&self) -> bool {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return false;
        }
        info!("shutting down");

        self.aggregator.stop().await;

        let config = self.config.snapshot();
        let supervisor = Supervisor::new(self.runner.clone(), &config.supervisor);
        for label in [
            &config.node.label,
            &config.tunnel.label,
            &config.lifecycle.watchdog_label,
        ] {
            if !supervisor.bootout(label).await {
                warn!(label = %label, "unload not accepted during shutdown");
            }
        }
        watchdog::remove_artifacts(&self.paths);

        info!("shutdown complete");
        true
    }
}
