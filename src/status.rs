//! Status aggregation and the poll loop.
//!
//! [`StatusAggregator`] owns the only shared mutable state of the core: the
//! published [`StatusSnapshot`]. It is written exclusively through the
//! aggregator (poll results, optimistic updates requested by the controller,
//! in-flight flags) and observed through a `tokio::sync::watch` channel, so
//! subscribers always see a whole snapshot, never half of a pair.
//!
//! # Poll tick
//!
//! Tunnel and node probes run concurrently; the [`ConnectionState`] is
//! derived only after both complete. Ticks carry no memory of previous
//! ticks. The last poll to complete overwrites the published observations,
//! except that a poll which started before an optimistic update is dropped.

use crate::command::CommandRunner;
use crate::config::ConfigHandle;
use crate::launchd::Supervisor;
use crate::probe::{ServiceObservation, probe_node, probe_tunnel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TaskTrackerToken;
use tracing::{debug, info};

/// Combined health of the tunnel and node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Tunnel and node both running.
    Connected,
    /// Tunnel running, node not.
    TunnelOnly,
    /// Tunnel down, whatever the node reports.
    #[default]
    Disconnected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connected => "connected",
            Self::TunnelOnly => "tunnel only",
            Self::Disconnected => "disconnected",
        };
        f.write_str(label)
    }
}

/// Pure tri-state derivation from the current pair of running flags.
pub fn derive_state(tunnel_running: bool, node_running: bool) -> ConnectionState {
    match (tunnel_running, node_running) {
        (true, true) => ConnectionState::Connected,
        (true, false) => ConnectionState::TunnelOnly,
        (false, _) => ConnectionState::Disconnected,
    }
}

/// One of the two managed services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKind {
    Tunnel,
    Node,
}

impl ServiceKind {
    /// Lowercase name used in logs, CLI arguments and JSON.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tunnel => "tunnel",
            Self::Node => "node",
        }
    }

    /// Parse a case-insensitive service name. `ssh` is accepted for the tunnel.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "tunnel" | "ssh" => Some(Self::Tunnel),
            "node" => Some(Self::Node),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Published per-service state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Known to launchd.
    pub loaded: bool,
    /// Running as far as the UI is concerned. For the node this is forced
    /// to `false` while the tunnel is down.
    pub running: bool,
    /// What the last probe said about the process, before masking.
    pub reported_running: bool,
    /// Port listening state, `None` for services without a port.
    pub port_listening: Option<bool>,
    /// A toggle/restart for this service is in flight.
    pub in_flight: bool,
}

/// Everything the UI renders.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Combined state derived from the two services.
    pub state: ConnectionState,
    pub tunnel: ServiceStatus,
    pub node: ServiceStatus,
    /// Completion time of the last published poll.
    pub last_poll: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    /// Status of one service.
    pub fn service(&self, kind: ServiceKind) -> &ServiceStatus {
        match kind {
            ServiceKind::Tunnel => &self.tunnel,
            ServiceKind::Node => &self.node,
        }
    }

    fn service_mut(&mut self, kind: ServiceKind) -> &mut ServiceStatus {
        match kind {
            ServiceKind::Tunnel => &mut self.tunnel,
            ServiceKind::Node => &mut self.node,
        }
    }

    /// Whether the tunnel process runs or its port is listening.
    pub fn tunnel_running(&self) -> bool {
        self.tunnel.running
    }

    /// Whether the node runs. Always `false` while the tunnel is down.
    pub fn node_running(&self) -> bool {
        self.node.running
    }

    /// Node counts as healthy only on top of a running tunnel.
    pub fn node_healthy(&self) -> bool {
        self.tunnel.running && self.node.running
    }

    fn apply_observations(&mut self, tunnel: ServiceObservation, node: ServiceObservation) {
        let tunnel_running = tunnel.is_up();
        let node_running = tunnel_running && node.running;

        self.tunnel.loaded = tunnel.loaded;
        self.tunnel.running = tunnel_running;
        self.tunnel.reported_running = tunnel.running;
        self.tunnel.port_listening = tunnel.port_listening;

        self.node.loaded = node.loaded;
        self.node.running = node_running;
        self.node.reported_running = node.running;
        self.node.port_listening = None;

        self.state = derive_state(tunnel_running, node_running);
        self.last_poll = Some(Utc::now());
    }
}

/// Polls both services and publishes [`StatusSnapshot`]s.
pub struct StatusAggregator {
    runner: Arc<dyn CommandRunner>,
    config: ConfigHandle,
    tx: watch::Sender<StatusSnapshot>,
    /// Bumped by optimistic writes; polls started under an older value are dropped.
    generation: AtomicU64,
    completed_polls: AtomicU64,
    cancel: CancellationToken,
    /// Control and startup operations that issue supervisor commands.
    operations: TaskTracker,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl StatusAggregator {
    /// Build an idle aggregator publishing a default (disconnected) snapshot.
    /// Nothing is polled until [`start`](Self::start) or [`poll_now`](Self::poll_now).
    pub fn new(runner: Arc<dyn CommandRunner>, config: ConfigHandle) -> Self {
        let (tx, _rx) = watch::channel(StatusSnapshot::default());
        Self {
            runner,
            config,
            tx,
            generation: AtomicU64::new(0),
            completed_polls: AtomicU64::new(0),
            cancel: CancellationToken::new(),
            operations: TaskTracker::new(),
            loop_handle: Mutex::new(None),
        }
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.tx.subscribe()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> StatusSnapshot {
        self.tx.borrow().clone()
    }

    /// Number of polls whose result was published.
    pub fn completed_polls(&self) -> u64 {
        self.completed_polls.load(Ordering::SeqCst)
    }

    /// Whether [`stop`](Self::stop) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once [`stop`](Self::stop) has been called.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    /// Register an operation that issues supervisor commands. [`stop`](Self::stop)
    /// does not return while a token is alive.
    ///
    /// Take the token before checking [`is_cancelled`](Self::is_cancelled):
    /// an operation that sees "not cancelled" while holding a token is
    /// guaranteed to finish before teardown starts.
    pub fn track_operation(&self) -> TaskTrackerToken {
        self.operations.token()
    }

    /// Number of tracked operations still running.
    pub fn operations_in_flight(&self) -> usize {
        self.operations.len()
    }

    /// Run one poll tick now and publish the result.
    ///
    /// Returns the published snapshot, or `None` when the aggregator has
    /// been cancelled or the result went stale during probing.
    pub async fn poll_now(&self) -> Option<StatusSnapshot> {
        if self.cancel.is_cancelled() {
            return None;
        }
        let config = self.config.snapshot();
        let supervisor = Supervisor::new(self.runner.clone(), &config.supervisor);
        let started_generation = self.generation.load(Ordering::SeqCst);

        let (tunnel, node) = tokio::join!(
            probe_tunnel(&supervisor, &config.tunnel),
            probe_node(&supervisor, &config.node)
        );

        if self.cancel.is_cancelled() {
            debug!("discarding poll result after cancellation");
            return None;
        }

        let mut published = None;
        let mut transition = None;
        self.tx.send_if_modified(|snapshot| {
            if self.generation.load(Ordering::SeqCst) != started_generation {
                return false;
            }
            let previous = snapshot.state;
            snapshot.apply_observations(tunnel, node);
            if previous != snapshot.state {
                transition = Some((previous, snapshot.state));
            }
            published = Some(snapshot.clone());
            true
        });

        match &published {
            Some(_) => {
                self.completed_polls.fetch_add(1, Ordering::SeqCst);
                if let Some((from, to)) = transition {
                    info!(%from, %to, "connection state changed");
                }
            }
            None => debug!("discarding poll result superseded by optimistic update"),
        }
        published
    }

    /// Optimistically publish "tunnel stopped": both services down and
    /// `Disconnected`, without waiting for a poll.
    pub fn mark_tunnel_stopped(&self) {
        self.tx.send_modify(|snapshot| {
            self.generation.fetch_add(1, Ordering::SeqCst);
            let previous = snapshot.state;
            for kind in [ServiceKind::Tunnel, ServiceKind::Node] {
                let status = snapshot.service_mut(kind);
                status.loaded = false;
                status.running = false;
                status.reported_running = false;
            }
            snapshot.tunnel.port_listening = Some(false);
            snapshot.state = ConnectionState::Disconnected;
            if previous != ConnectionState::Disconnected {
                info!(from = %previous, "tunnel stopped, publishing disconnected");
            }
        });
    }

    /// Publish the in-flight flag for `kind`.
    pub fn set_in_flight(&self, kind: ServiceKind, in_flight: bool) {
        self.tx.send_if_modified(|snapshot| {
            let status = snapshot.service_mut(kind);
            if status.in_flight == in_flight {
                return false;
            }
            status.in_flight = in_flight;
            true
        });
    }

    /// Schedule delayed polls to catch supervisor transitions that lag
    /// behind the command that caused them.
    pub fn schedule_follow_up_polls(self: &Arc<Self>, delays: Vec<Duration>) {
        for delay in delays {
            let aggregator = Arc::clone(self);
            let cancel = self.cancel.child_token();
            tokio::spawn(async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(delay) => {
                        debug!(delay_ms = delay.as_millis() as u64, "follow-up poll");
                        aggregator.poll_now().await;
                    }
                }
            });
        }
    }

    /// Start the poll loop. The first tick runs immediately. Calling this
    /// again while the loop is running does nothing.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.loop_handle.lock().unwrap_or_else(|e| e.into_inner());
        if handle.is_some() || self.cancel.is_cancelled() {
            return;
        }
        let aggregator = Arc::clone(self);
        *handle = Some(tokio::spawn(async move { aggregator.run_loop().await }));
    }

    async fn run_loop(&self) {
        info!(
            interval_secs = self.config.snapshot().polling.interval_secs,
            "status poll loop started"
        );
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = self.poll_now() => {}
            }
            let interval = self.config.snapshot().polling.interval();
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
        info!("status poll loop stopped");
    }

    /// Stop polling, wait for tracked operations to finish, then wait for
    /// the loop task to exit.
    ///
    /// Pending sleeps end immediately; external commands already running
    /// finish on their own and their results are discarded.
    pub async fn stop(&self) {
        self.cancel.cancel();
        self.operations.close();
        if !self.operations.is_empty() {
            debug!(
                in_flight = self.operations.len(),
                "waiting for control operations to finish"
            );
        }
        self.operations.wait().await;
        let handle = self
            .loop_handle
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}
