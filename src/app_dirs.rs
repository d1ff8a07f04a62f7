//! Centralized application directory paths for tunnelbar.
//!
//! Uses the [`dirs`] crate for platform-appropriate directory resolution.
//!
//! # Directory Layout
//!
//! | Purpose | macOS | Linux |
//! |---------|-------|-------|
//! | App data | `~/Library/Application Support/tunnelbar/` | `~/.local/share/tunnelbar/` |
//! | Config | `~/Library/Application Support/tunnelbar/` | `~/.config/tunnelbar/` |
//! | Runtime (PID file, watchdog script) | `<data>/run/` | `<data>/run/` |
//! | Logs | `<data>/logs/` | `<data>/logs/` |
//! | Launch agents | `~/Library/LaunchAgents/` | `~/Library/LaunchAgents/` |
//!
//! # Environment Overrides
//!
//! - `TUNNELBAR_DATA_DIR`: overrides [`data_dir`]
//! - `TUNNELBAR_CONFIG_DIR`: overrides [`config_dir`]
//! - `TUNNELBAR_RUNTIME_DIR`: overrides [`runtime_dir`]
//! - `TUNNELBAR_LOG_DIR`: overrides [`logs_dir`]
//! - `TUNNELBAR_LAUNCH_AGENTS_DIR`: overrides [`launch_agents_dir`]

use std::path::PathBuf;

/// Application data root directory.
#[must_use]
pub fn data_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TUNNELBAR_DATA_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::data_dir()
        .map(|d| d.join("tunnelbar"))
        .unwrap_or_else(|| PathBuf::from("/tmp/tunnelbar-data"))
}

/// Application config directory (holds `config.toml`).
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TUNNELBAR_CONFIG_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::config_dir()
        .map(|d| d.join("tunnelbar"))
        .unwrap_or_else(|| PathBuf::from("/tmp/tunnelbar-config"))
}

/// App-private runtime directory for the PID file and the watchdog script.
#[must_use]
pub fn runtime_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TUNNELBAR_RUNTIME_DIR") {
        return PathBuf::from(override_dir);
    }
    data_dir().join("run")
}

/// Log file directory (`data_dir()/logs/`).
#[must_use]
pub fn logs_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TUNNELBAR_LOG_DIR") {
        return PathBuf::from(override_dir);
    }
    data_dir().join("logs")
}

/// Per-user launchd agents directory, where the watchdog plist is installed.
#[must_use]
pub fn launch_agents_dir() -> PathBuf {
    if let Some(override_dir) = std::env::var_os("TUNNELBAR_LAUNCH_AGENTS_DIR") {
        return PathBuf::from(override_dir);
    }
    dirs::home_dir()
        .map(|home| home.join("Library").join("LaunchAgents"))
        .unwrap_or_else(|| PathBuf::from("/tmp/tunnelbar-launch-agents"))
}

/// Main config file path (`config_dir()/config.toml`).
#[must_use]
pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}
