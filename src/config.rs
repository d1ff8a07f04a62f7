//! Configuration types for the service supervision core.
//!
//! The configuration object is constructed once at startup and passed by
//! reference into the components that need it. Components read it on every
//! operation, so a reloaded config takes effect on the next poll or command.

use crate::error::{MonitorError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// The SSH tunnel service.
    pub tunnel: ServiceDescriptor,
    /// The node service (depends on the tunnel).
    pub node: ServiceDescriptor,
    /// Status polling cadence.
    pub polling: PollingConfig,
    /// Startup, restart and watchdog timing.
    pub lifecycle: LifecycleConfig,
    /// Locations of the OS tools the core shells out to.
    pub supervisor: SupervisorConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            tunnel: ServiceDescriptor::tunnel_default(),
            node: ServiceDescriptor::node_default(),
            polling: PollingConfig::default(),
            lifecycle: LifecycleConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

/// Identifies one launchd-managed service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    /// launchd label, unique within the user's domain.
    pub label: String,
    /// Path to the unit definition (plist) used to register the service.
    pub plist_path: PathBuf,
    /// Local TCP port the service listens on. Only the tunnel has one.
    #[serde(default)]
    pub port: Option<u16>,
}

impl ServiceDescriptor {
    fn tunnel_default() -> Self {
        Self::with_label("com.tunnelbar.tunnel", Some(18789))
    }

    fn node_default() -> Self {
        Self::with_label("com.tunnelbar.node", None)
    }

    fn with_label(label: &str, port: Option<u16>) -> Self {
        Self {
            label: label.to_owned(),
            plist_path: crate::app_dirs::launch_agents_dir().join(format!("{label}.plist")),
            port,
        }
    }
}

/// Status polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Seconds between regular poll ticks.
    pub interval_secs: u64,
    /// Delays (ms) of the follow-up polls scheduled after each toggle/restart.
    ///
    /// Supervisor state lags behind bootout, so a single forced poll right
    /// after the command is not enough to observe the node going away.
    pub follow_up_delays_ms: Vec<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 3,
            follow_up_delays_ms: vec![2_000, 5_000],
        }
    }
}

impl PollingConfig {
    /// Interval between regular poll ticks.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    /// Follow-up poll delays as durations.
    pub fn follow_up_delays(&self) -> Vec<Duration> {
        self.follow_up_delays_ms
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect()
    }
}

/// Startup ordering, restart settle time and watchdog settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Wait between registering the tunnel and registering the node.
    pub startup_grace_ms: u64,
    /// Wait between unload and reload during a restart.
    pub restart_settle_ms: u64,
    /// launchd label of the watchdog job.
    pub watchdog_label: String,
    /// How often launchd runs the watchdog script.
    pub watchdog_interval_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_grace_ms: 2_000,
            restart_settle_ms: 1_000,
            watchdog_label: "com.tunnelbar.watchdog".to_owned(),
            watchdog_interval_secs: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }
}

/// Executable paths for the supervisor and OS utilities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// `launchctl` executable.
    pub launchctl_path: PathBuf,
    /// `lsof` executable, used for the port check.
    pub lsof_path: PathBuf,
    /// `ssh` executable, used by connectivity diagnosis.
    pub ssh_path: PathBuf,
    /// launchd domain target. `None` resolves to `gui/<uid>`.
    pub domain: Option<String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            launchctl_path: PathBuf::from("/bin/launchctl"),
            lsof_path: PathBuf::from("/usr/sbin/lsof"),
            ssh_path: PathBuf::from("/usr/bin/ssh"),
            domain: None,
        }
    }
}

/// Shared, replaceable configuration.
///
/// Components take a clone of the current value at the start of every poll
/// or command, so a [`replace`](ConfigHandle::replace) applies from the next
/// operation on and never mid-operation.
#[derive(Debug, Clone, Default)]
pub struct ConfigHandle {
    inner: Arc<RwLock<MonitorConfig>>,
}

impl ConfigHandle {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Current configuration.
    pub fn snapshot(&self) -> MonitorConfig {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap in a new configuration.
    pub fn replace(&self, config: MonitorConfig) {
        *self.inner.write().unwrap_or_else(|e| e.into_inner()) = config;
    }
}

impl MonitorConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| MonitorError::Config(e.to_string()))
    }

    /// Load from `path` if it exists, otherwise return defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.is_file() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MonitorError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> PathBuf {
        crate::app_dirs::config_file()
    }

    /// Check the invariants the core relies on.
    ///
    /// # Errors
    ///
    /// Returns [`MonitorError::Config`] describing the first violated rule.
    pub fn validate(&self) -> Result<()> {
        let labels = [
            ("tunnel", self.tunnel.label.as_str()),
            ("node", self.node.label.as_str()),
            ("watchdog", self.lifecycle.watchdog_label.as_str()),
        ];
        for (name, label) in labels {
            if label.trim().is_empty() {
                return Err(MonitorError::Config(format!("{name} label is empty")));
            }
        }
        if self.tunnel.label == self.node.label
            || self.tunnel.label == self.lifecycle.watchdog_label
            || self.node.label == self.lifecycle.watchdog_label
        {
            return Err(MonitorError::Config(
                "tunnel, node and watchdog labels must be distinct".to_owned(),
            ));
        }
        match self.tunnel.port {
            Some(0) | None => {
                return Err(MonitorError::Config(
                    "tunnel port must be set and non-zero".to_owned(),
                ));
            }
            Some(_) => {}
        }
        if self.polling.interval_secs == 0 {
            return Err(MonitorError::Config(
                "polling interval must be at least one second".to_owned(),
            ));
        }
        if self.lifecycle.watchdog_interval_secs == 0 {
            return Err(MonitorError::Config(
                "watchdog interval must be at least one second".to_owned(),
            ));
        }
        Ok(())
    }
}
