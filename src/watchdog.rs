//! Crash watchdog.
//!
//! The app writes its pid to a file and installs a small launchd job that
//! runs a POSIX `sh` script every few seconds. If the recorded pid is no
//! longer alive, the script unloads the node and the tunnel, removes the pid
//! file and finally unloads itself. launchd keeps running the job after the
//! app dies, so services never outlive a crashed app by more than one
//! interval.
//!
//! # File layout
//!
//! ```text
//! <runtime dir>/
//!   app.pid          ← pid of the running app
//!   watchdog.sh      ← generated script
//! ~/Library/LaunchAgents/
//!   <watchdog label>.plist
//! ```
//!
//! [`check_once`] performs the same check in-process.

use crate::app_dirs;
use crate::config::MonitorConfig;
use crate::error::{MonitorError, Result};
use crate::launchd::Supervisor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const PID_FILE_NAME: &str = "app.pid";
const SCRIPT_FILE_NAME: &str = "watchdog.sh";

/// Filesystem locations of the watchdog artifacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchdogPaths {
    pub runtime_dir: PathBuf,
    pub pid_file: PathBuf,
    pub script: PathBuf,
    pub plist: PathBuf,
}

impl WatchdogPaths {
    /// Layout rooted at explicit directories.
    pub fn for_root(runtime_dir: &Path, launch_agents_dir: &Path, label: &str) -> Self {
        Self {
            runtime_dir: runtime_dir.to_path_buf(),
            pid_file: runtime_dir.join(PID_FILE_NAME),
            script: runtime_dir.join(SCRIPT_FILE_NAME),
            plist: launch_agents_dir.join(format!("{label}.plist")),
        }
    }

    /// Layout under the standard runtime and LaunchAgents directories.
    pub fn default_paths(label: &str) -> Self {
        Self::for_root(
            &app_dirs::runtime_dir(),
            &app_dirs::launch_agents_dir(),
            label,
        )
    }

    /// Create the runtime directory if missing.
    pub fn ensure_runtime_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.runtime_dir).map_err(|e| {
            MonitorError::Watchdog(format!(
                "cannot create runtime dir {}: {e}",
                self.runtime_dir.display()
            ))
        })
    }
}

/// Result of one in-process watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "verdict", content = "pid")]
pub enum WatchdogVerdict {
    /// No (readable) pid file: nothing to guard.
    NoPidFile,
    /// The recorded owner is alive.
    OwnerAlive(u32),
    /// The recorded owner was dead; services and the watchdog were unloaded.
    Healed(u32),
}

impl fmt::Display for WatchdogVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoPidFile => f.write_str("no pid file"),
            Self::OwnerAlive(pid) => write!(f, "owner {pid} alive"),
            Self::Healed(pid) => write!(f, "owner {pid} dead, services unloaded"),
        }
    }
}

/// Record `pid` as the current owner.
pub fn write_pid_file(paths: &WatchdogPaths, pid: u32) -> Result<()> {
    fs::write(&paths.pid_file, format!("{pid}\n")).map_err(|e| {
        MonitorError::Watchdog(format!(
            "cannot write pid file {}: {e}",
            paths.pid_file.display()
        ))
    })
}

/// Read the recorded owner pid. `None` when missing, empty or malformed.
pub fn read_pid_file(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse::<u32>().ok().filter(|pid| *pid > 0)
}

/// Whether a process with `pid` exists. A process owned by another user
/// (`EPERM`) counts as alive.
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = libc::pid_t::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    // SAFETY: signal 0 performs the existence and permission checks only.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return true;
    }
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

/// Single-quote `value` for `sh`.
fn sh_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Generate the watchdog shell script.
pub fn render_script(paths: &WatchdogPaths, config: &MonitorConfig, domain: &str) -> String {
    let launchctl = sh_quote(&config.supervisor.launchctl_path.to_string_lossy());
    let target = |label: &str| sh_quote(&format!("{domain}/{label}"));
    format!(
        r#"#!/bin/sh
# Generated by tunnelbar. Unloads the supervised services once the app is gone.
PID_FILE={pid_file}
LAUNCHCTL={launchctl}

[ -f "$PID_FILE" ] || exit 0
PID=$(tr -d '[:space:]' < "$PID_FILE" 2>/dev/null)
case "$PID" in
    ''|*[!0-9]*) exit 0 ;;
esac

if kill -0 "$PID" 2>/dev/null || ps -p "$PID" >/dev/null 2>&1; then
    exit 0
fi

"$LAUNCHCTL" bootout {node} >/dev/null 2>&1
"$LAUNCHCTL" bootout {tunnel} >/dev/null 2>&1
rm -f "$PID_FILE"
"$LAUNCHCTL" bootout {watchdog} >/dev/null 2>&1
exit 0
"#,
        pid_file = sh_quote(&paths.pid_file.to_string_lossy()),
        node = target(&config.node.label),
        tunnel = target(&config.tunnel.label),
        watchdog = target(&config.lifecycle.watchdog_label),
    )
}

/// Generate the launchd job definition that runs the script periodically.
pub fn render_plist(paths: &WatchdogPaths, label: &str, interval_secs: u64) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
    <key>Label</key>
    <string>{label}</string>
    <key>ProgramArguments</key>
    <array>
        <string>/bin/sh</string>
        <string>{script}</string>
    </array>
    <key>StartInterval</key>
    <integer>{interval_secs}</integer>
    <key>RunAtLoad</key>
    <true/>
</dict>
</plist>
"#,
        label = xml_escape(label),
        script = xml_escape(&paths.script.to_string_lossy()),
    )
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            MonitorError::Watchdog(format!("cannot create {}: {e}", parent.display()))
        })?;
    }
    fs::write(path, contents)
        .map_err(|e| MonitorError::Watchdog(format!("cannot write {}: {e}", path.display())))
}

fn set_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).map_err(|e| {
        MonitorError::Watchdog(format!(
            "cannot set executable permission on {}: {e}",
            path.display()
        ))
    })
}

/// Write the script and plist, then register the job with launchd.
///
/// A job left behind by a previous run is unloaded first so the new
/// definition takes effect. Returns whether launchd accepted the job.
pub async fn install(
    paths: &WatchdogPaths,
    config: &MonitorConfig,
    supervisor: &Supervisor,
) -> Result<bool> {
    let label = &config.lifecycle.watchdog_label;
    write_file(
        &paths.script,
        &render_script(paths, config, supervisor.domain()),
    )?;
    set_executable(&paths.script)?;
    write_file(
        &paths.plist,
        &render_plist(paths, label, config.lifecycle.watchdog_interval_secs),
    )?;

    if supervisor.bootout(label).await {
        debug!(label = %label, "unloaded stale watchdog job");
    }
    let accepted = supervisor.bootstrap(&paths.plist).await;
    info!(label = %label, accepted, "watchdog installed");
    Ok(accepted)
}

/// Delete the pid file, script and plist. Missing files are ignored.
pub fn remove_artifacts(paths: &WatchdogPaths) {
    for path in [&paths.pid_file, &paths.script, &paths.plist] {
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "removed watchdog artifact"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "cannot remove watchdog artifact"),
        }
    }
}

/// In-process equivalent of one watchdog script run.
pub async fn check_once(
    paths: &WatchdogPaths,
    config: &MonitorConfig,
    supervisor: &Supervisor,
) -> WatchdogVerdict {
    let Some(pid) = read_pid_file(&paths.pid_file) else {
        return WatchdogVerdict::NoPidFile;
    };
    if pid_alive(pid) {
        return WatchdogVerdict::OwnerAlive(pid);
    }

    warn!(pid, "app is gone, unloading supervised services");
    supervisor.bootout(&config.node.label).await;
    supervisor.bootout(&config.tunnel.label).await;
    if let Err(e) = fs::remove_file(&paths.pid_file)
        && e.kind() != ErrorKind::NotFound
    {
        warn!(error = %e, "cannot remove stale pid file");
    }
    supervisor.bootout(&config.lifecycle.watchdog_label).await;
    WatchdogVerdict::Healed(pid)
}
