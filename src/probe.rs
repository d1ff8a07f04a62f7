//! Service probes.
//!
//! A probe is a single read-only query against one service: is it known to
//! launchd, does it have a live process, and (tunnel only) is its port
//! listening.
//!
//! # Status parsing precedence
//!
//! 1. Empty output means not loaded. launchd only returns nothing (or a
//!    "could not find service" error) when the unit is not registered.
//! 2. "Could not find service" is an authoritative negative.
//! 3. Otherwise the unit is loaded, and running if the report carries a
//!    running-state marker or, failing that, a positive pid. Both forms
//!    appear depending on the launchctl version and verb.

use crate::config::ServiceDescriptor;
use crate::launchd::Supervisor;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MISSING_SERVICE_MARKER: &str = "could not find service";
const RUNNING_STATE_MARKER: &str = "state = running";

/// Result of probing one service at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObservation {
    /// Known to launchd.
    pub loaded: bool,
    /// Has an active process according to launchd.
    pub running: bool,
    /// Whether the service's port is in LISTEN state. `None` when the
    /// service has no port contract.
    pub port_listening: Option<bool>,
}

impl ServiceObservation {
    /// Up for aggregation purposes: launchd reports it running, or its
    /// port is listening (the port decides whether traffic can flow).
    pub fn is_up(&self) -> bool {
        self.running || self.port_listening == Some(true)
    }
}

/// Parse the free-text output of `launchctl print` (or `launchctl list <label>`).
pub fn parse_status(text: &str) -> ServiceObservation {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return ServiceObservation::default();
    }
    let lower = trimmed.to_ascii_lowercase();
    if lower.contains(MISSING_SERVICE_MARKER) {
        return ServiceObservation::default();
    }

    let running = lower.contains(RUNNING_STATE_MARKER) || parse_pid(trimmed).is_some();
    ServiceObservation {
        loaded: true,
        running,
        port_listening: None,
    }
}

/// Extract a positive pid from `pid = N` or `"PID" = N;` lines.
pub fn parse_pid(text: &str) -> Option<u32> {
    text.lines().find_map(|line| {
        let line = line.trim();
        let rest = line
            .strip_prefix("pid = ")
            .or_else(|| line.strip_prefix("\"PID\" = "))?;
        let value = rest.trim().trim_end_matches(';').trim();
        value
            .parse::<i64>()
            .ok()
            .filter(|pid| *pid > 0)
            .and_then(|pid| u32::try_from(pid).ok())
    })
}

/// Probe the tunnel: port check and status query run concurrently.
pub async fn probe_tunnel(
    supervisor: &Supervisor,
    tunnel: &ServiceDescriptor,
) -> ServiceObservation {
    let port_check = async {
        match tunnel.port {
            Some(port) => Some(supervisor.port_listening(port).await),
            None => None,
        }
    };
    let (port_listening, status) = tokio::join!(port_check, supervisor.print(&tunnel.label));

    let mut observation = parse_status(&status);
    observation.port_listening = port_listening;
    debug!(label = %tunnel.label, ?observation, "tunnel probe");
    observation
}

/// Probe the node: status query only, no port contract.
pub async fn probe_node(supervisor: &Supervisor, node: &ServiceDescriptor) -> ServiceObservation {
    let status = supervisor.print(&node.label).await;
    let observation = parse_status(&status);
    debug!(label = %node.label, ?observation, "node probe");
    observation
}
