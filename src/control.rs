//! Toggle/restart state machine.
//!
//! Each service is either idle or has exactly one operation in flight:
//!
//! ```text
//! Idle → Toggling → Idle
//! Idle → Restarting → Idle
//! ```
//!
//! A request for a service that is already busy is dropped ([`ControlOutcome::Busy`]),
//! never queued. Tunnel and node are guarded independently.
//!
//! # Policy
//!
//! - Stopping unloads the unit (`bootout`) instead of signalling it, so the
//!   unit's keep-alive policy cannot relaunch it.
//! - Stopping the tunnel also unloads the node and publishes `Disconnected`
//!   right away. Starting the tunnel never starts the node.
//! - The node may only be started while the tunnel is running.
//!
//! Command failures are not inspected. Every operation ends with a forced
//! poll plus delayed follow-ups, and whatever they observe is the truth.

use crate::command::CommandRunner;
use crate::config::{ConfigHandle, MonitorConfig, ServiceDescriptor};
use crate::launchd::Supervisor;
use crate::status::{ServiceKind, ServiceStatus, StatusAggregator};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// What the caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    /// Stop if loaded or running, start otherwise.
    Toggle,
    /// Start unless already running.
    Start,
    /// Stop unless already unloaded.
    Stop,
    /// Unload, wait, reload.
    Restart,
}

impl ServiceAction {
    /// Parse a case-insensitive action name such as `"toggle"`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "toggle" => Some(Self::Toggle),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}

/// Why a request was refused before any command ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// The node cannot be started without a running tunnel.
    TunnelDown,
    /// The core is tearing down.
    ShuttingDown,
}

/// Informational result of a control request. Never an error: the
/// published snapshot is the contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum ControlOutcome {
    /// The unit was registered.
    Started,
    /// The unit was unloaded (with the node, for the tunnel).
    Stopped,
    /// The unit was unloaded and registered again.
    Restarted,
    /// Already in the requested state; only a confirmation poll ran.
    Unchanged,
    /// Another operation for the same service is in flight.
    Busy,
    /// Refused before any command ran, or before registering during shutdown.
    Rejected(RejectReason),
}

impl fmt::Display for ControlOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started => f.write_str("started"),
            Self::Stopped => f.write_str("stopped"),
            Self::Restarted => f.write_str("restarted"),
            Self::Unchanged => f.write_str("unchanged"),
            Self::Busy => f.write_str("busy"),
            Self::Rejected(RejectReason::TunnelDown) => f.write_str("rejected: tunnel is down"),
            Self::Rejected(RejectReason::ShuttingDown) => f.write_str("rejected: shutting down"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Plan {
    Start,
    Stop,
    Restart,
    Noop,
}

fn plan_for(action: ServiceAction, status: &ServiceStatus) -> Plan {
    let active = status.loaded || status.running;
    match action {
        ServiceAction::Toggle if active => Plan::Stop,
        ServiceAction::Toggle => Plan::Start,
        ServiceAction::Start if status.running => Plan::Noop,
        ServiceAction::Start if status.loaded => Plan::Restart,
        ServiceAction::Start => Plan::Start,
        ServiceAction::Stop if active => Plan::Stop,
        ServiceAction::Stop => Plan::Noop,
        ServiceAction::Restart => Plan::Restart,
    }
}

/// Issues start/stop/restart commands for the tunnel and node.
pub struct ServiceController {
    runner: Arc<dyn CommandRunner>,
    config: ConfigHandle,
    aggregator: Arc<StatusAggregator>,
    tunnel_busy: AtomicBool,
    node_busy: AtomicBool,
}

impl ServiceController {
    /// Build a controller that publishes through `aggregator`.
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        config: ConfigHandle,
        aggregator: Arc<StatusAggregator>,
    ) -> Self {
        Self {
            runner,
            config,
            aggregator,
            tunnel_busy: AtomicBool::new(false),
            node_busy: AtomicBool::new(false),
        }
    }

    /// Whether an operation for `kind` is in flight.
    pub fn is_in_flight(&self, kind: ServiceKind) -> bool {
        self.busy_flag(kind).load(Ordering::SeqCst)
    }

    /// The dependent-start guard: node start controls must be disabled
    /// unless this returns `true`.
    pub fn can_start_node(&self) -> bool {
        self.aggregator.snapshot().tunnel_running()
    }

    /// Stop the service if it is loaded or running, start it otherwise.
    pub async fn toggle(&self, kind: ServiceKind) -> ControlOutcome {
        self.perform(kind, ServiceAction::Toggle).await
    }

    /// Start the service. A loaded but dead unit is restarted.
    pub async fn start(&self, kind: ServiceKind) -> ControlOutcome {
        self.perform(kind, ServiceAction::Start).await
    }

    /// Unload the service. Stopping the tunnel also unloads the node.
    pub async fn stop(&self, kind: ServiceKind) -> ControlOutcome {
        self.perform(kind, ServiceAction::Stop).await
    }

    /// Unload, wait for the settle delay, register again.
    pub async fn restart(&self, kind: ServiceKind) -> ControlOutcome {
        self.perform(kind, ServiceAction::Restart).await
    }

    /// Run `action` against `kind`.
    ///
    /// Returns once the terminal command has completed and a confirmation
    /// poll has run. Follow-up polls are left running in the background.
    ///
    /// The operation is tracked by the aggregator, so a concurrent shutdown
    /// waits for it before unloading anything. Once shutdown has begun no
    /// further unit is registered.
    pub async fn perform(&self, kind: ServiceKind, action: ServiceAction) -> ControlOutcome {
        let _operation = self.aggregator.track_operation();
        if self.aggregator.is_cancelled() {
            debug!(service = %kind, ?action, "ignoring control request during shutdown");
            return ControlOutcome::Rejected(RejectReason::ShuttingDown);
        }

        let snapshot = self.aggregator.snapshot();
        let plan = plan_for(action, snapshot.service(kind));
        if kind == ServiceKind::Node
            && matches!(plan, Plan::Start | Plan::Restart)
            && !snapshot.tunnel_running()
        {
            info!(?action, "refusing to start node while tunnel is down");
            return ControlOutcome::Rejected(RejectReason::TunnelDown);
        }

        let Some(guard) = InFlightGuard::acquire(self, kind) else {
            debug!(service = %kind, ?action, "operation already in flight, dropping request");
            return ControlOutcome::Busy;
        };

        let config = self.config.snapshot();
        info!(service = %kind, ?action, ?plan, "executing control request");
        let outcome = self.execute(kind, plan, &config).await;

        self.aggregator.poll_now().await;
        drop(guard);
        self.aggregator
            .schedule_follow_up_polls(config.polling.follow_up_delays());

        info!(service = %kind, %outcome, "control request finished");
        outcome
    }

    async fn execute(
        &self,
        kind: ServiceKind,
        plan: Plan,
        config: &MonitorConfig,
    ) -> ControlOutcome {
        let supervisor = Supervisor::new(self.runner.clone(), &config.supervisor);
        let descriptor = descriptor_for(config, kind);
        match plan {
            Plan::Noop => ControlOutcome::Unchanged,
            Plan::Start => {
                if self.aggregator.is_cancelled() {
                    return shutting_down(kind);
                }
                supervisor.bootstrap(&descriptor.plist_path).await;
                ControlOutcome::Started
            }
            Plan::Stop => {
                supervisor.bootout(&descriptor.label).await;
                if kind == ServiceKind::Tunnel {
                    self.aggregator.mark_tunnel_stopped();
                    supervisor.bootout(&config.node.label).await;
                }
                ControlOutcome::Stopped
            }
            Plan::Restart => {
                if !supervisor.bootout(&descriptor.label).await {
                    warn!(service = %kind, "unload before restart was not accepted");
                }
                tokio::select! {
                    biased;
                    _ = self.aggregator.cancelled() => {}
                    _ = tokio::time::sleep(config.lifecycle.restart_settle()) => {}
                }
                if self.aggregator.is_cancelled() {
                    return shutting_down(kind);
                }
                supervisor.bootstrap(&descriptor.plist_path).await;
                ControlOutcome::Restarted
            }
        }
    }

    fn busy_flag(&self, kind: ServiceKind) -> &AtomicBool {
        match kind {
            ServiceKind::Tunnel => &self.tunnel_busy,
            ServiceKind::Node => &self.node_busy,
        }
    }
}

fn shutting_down(kind: ServiceKind) -> ControlOutcome {
    info!(service = %kind, "shutdown began, not registering the unit again");
    ControlOutcome::Rejected(RejectReason::ShuttingDown)
}

fn descriptor_for(config: &MonitorConfig, kind: ServiceKind) -> &ServiceDescriptor {
    match kind {
        ServiceKind::Tunnel => &config.tunnel,
        ServiceKind::Node => &config.node,
    }
}

/// Holds a service's in-flight flag and mirrors it into the published
/// snapshot. Released on drop.
struct InFlightGuard<'a> {
    controller: &'a ServiceController,
    kind: ServiceKind,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(controller: &'a ServiceController, kind: ServiceKind) -> Option<Self> {
        controller
            .busy_flag(kind)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        controller.aggregator.set_in_flight(kind, true);
        Some(Self { controller, kind })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller
            .busy_flag(self.kind)
            .store(false, Ordering::SeqCst);
        self.controller.aggregator.set_in_flight(self.kind, false);
    }
}
