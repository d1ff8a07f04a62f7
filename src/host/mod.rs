//! Long-running host process for the menu-bar shell.
//!
//! The shell starts one `tunnelbar run` process and talks to it over the
//! stdio bridge ([`stdio::run_bridge`]). All control requests then go
//! through the same [`ServiceController`] and [`StatusAggregator`], so the
//! in-flight guards, optimistic updates and forced polls hold across every
//! request the shell sends.

pub mod contract;
pub mod stdio;

use crate::command::CommandRunner;
use crate::config::{ConfigHandle, MonitorConfig};
use crate::control::ServiceController;
use crate::host::contract::HostCommand;
use crate::launchd::Supervisor;
use crate::lifecycle::LifecycleManager;
use crate::status::StatusAggregator;
use crate::voice_command::{self, VoiceCommand};
use crate::watchdog::WatchdogPaths;
use std::sync::Arc;
use tracing::info;

/// The supervision core wired to one command runner.
pub struct HostCore {
    config: ConfigHandle,
    runner: Arc<dyn CommandRunner>,
    aggregator: Arc<StatusAggregator>,
    controller: Arc<ServiceController>,
    lifecycle: LifecycleManager,
}

impl HostCore {
    /// Wire the core with the standard watchdog locations.
    pub fn new(runner: Arc<dyn CommandRunner>, config: MonitorConfig) -> Self {
        let config = ConfigHandle::new(config);
        let aggregator = Arc::new(StatusAggregator::new(runner.clone(), config.clone()));
        let controller = Arc::new(ServiceController::new(
            runner.clone(),
            config.clone(),
            aggregator.clone(),
        ));
        let lifecycle = LifecycleManager::new(runner.clone(), config.clone(), aggregator.clone());
        Self {
            config,
            runner,
            aggregator,
            controller,
            lifecycle,
        }
    }

    /// Use explicit pid file and watchdog locations.
    pub fn with_watchdog_paths(mut self, paths: WatchdogPaths) -> Self {
        self.lifecycle = self.lifecycle.with_paths(paths);
        self
    }

    pub fn config(&self) -> &ConfigHandle {
        &self.config
    }

    pub fn runner(&self) -> &Arc<dyn CommandRunner> {
        &self.runner
    }

    /// The one aggregator every request publishes through.
    pub fn aggregator(&self) -> &Arc<StatusAggregator> {
        &self.aggregator
    }

    /// The one controller holding the per-service guards.
    pub fn controller(&self) -> &Arc<ServiceController> {
        &self.controller
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    /// A supervisor for the current configuration.
    pub fn supervisor(&self) -> Supervisor {
        Supervisor::new(self.runner.clone(), &self.config.snapshot().supervisor)
    }

    /// Poll now, falling back to the last published snapshot once stopped.
    pub async fn fresh_snapshot(&self) -> serde_json::Value {
        let snapshot = self
            .aggregator
            .poll_now()
            .await
            .unwrap_or_else(|| self.aggregator.snapshot());
        serde_json::to_value(snapshot).unwrap_or_default()
    }

    /// Execute one request and build its response payload.
    ///
    /// `Quit` is the caller's business and yields `Null`.
    pub async fn dispatch(&self, command: &HostCommand) -> serde_json::Value {
        if let Some((service, action)) = command.control() {
            let outcome = self.controller.perform(service, action).await;
            return serde_json::json!({
                "service": service,
                "action": action,
                "result": outcome,
                "status": self.aggregator.snapshot(),
            });
        }
        match command {
            HostCommand::Status => self.fresh_snapshot().await,
            HostCommand::Say { transcript } => {
                serde_json::json!({ "reply": self.say(transcript).await })
            }
            _ => serde_json::Value::Null,
        }
    }

    /// Handle a transcript: control phrases run, everything else gets a
    /// spoken-style reply.
    pub async fn say(&self, transcript: &str) -> String {
        match voice_command::parse_voice_command(transcript) {
            VoiceCommand::Control { service, action } => {
                let outcome = self.controller.perform(service, action).await;
                voice_command::control_response(service, outcome)
            }
            VoiceCommand::Status => {
                let snapshot = self
                    .aggregator
                    .poll_now()
                    .await
                    .unwrap_or_else(|| self.aggregator.snapshot());
                voice_command::status_response(&snapshot)
            }
            VoiceCommand::Help => voice_command::help_response(),
            VoiceCommand::Chat(text) => {
                info!(%text, "not a control phrase, leaving it to the assistant");
                format!("(chat) {text}")
            }
        }
    }
}
