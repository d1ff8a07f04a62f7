//! Shared helpers for integration tests.
//!
//! [`FakeTools`] writes shell-script stand-ins for `launchctl` and `lsof`
//! into a temp directory. Loaded labels are marker files, and every
//! invocation is appended to `calls.log`.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tunnelbar::MonitorConfig;
use tunnelbar::watchdog::WatchdogPaths;

pub(crate) const TUNNEL: &str = "com.tunnelbar.tunnel";
pub(crate) const NODE: &str = "com.tunnelbar.node";
pub(crate) const WATCHDOG: &str = "com.tunnelbar.watchdog";

pub(crate) struct FakeTools {
    pub(crate) root: tempfile::TempDir,
    pub(crate) launchctl: PathBuf,
    pub(crate) lsof: PathBuf,
    state: PathBuf,
}

fn write_executable(path: &Path, body: &str) {
    fs::write(path, body).expect("write fake tool");
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).expect("chmod fake tool");
}

impl FakeTools {
    pub(crate) fn new() -> Self {
        let root = tempfile::Builder::new()
            .prefix("tunnelbar-it-")
            .tempdir()
            .expect("create temp dir");
        let state = root.path().join("state");
        let bin = root.path().join("bin");
        fs::create_dir_all(&state).unwrap();
        fs::create_dir_all(&bin).unwrap();

        let launchctl = bin.join("launchctl");
        write_executable(
            &launchctl,
            &format!(
                r#"#!/bin/sh
STATE='{state}'
echo "launchctl $*" >> "$STATE/calls.log"
case "$1" in
    print)
        label=${{2##*/}}
        if [ -f "$STATE/$label.loaded" ]; then
            printf 'state = running\npid = 4242\n'
            exit 0
        fi
        echo "Could not find service \"$label\" in domain for user gui: 501" >&2
        exit 113
        ;;
    bootstrap)
        label=$(basename "$3" .plist)
        touch "$STATE/$label.loaded"
        ;;
    bootout)
        label=${{2##*/}}
        [ -f "$STATE/$label.loaded" ] || exit 3
        [ -f "$STATE/$label.slow" ] && sleep "$(cat "$STATE/$label.slow")"
        rm -f "$STATE/$label.loaded"
        ;;
esac
exit 0
"#,
                state = state.display()
            ),
        );

        let lsof = bin.join("lsof");
        write_executable(
            &lsof,
            &format!(
                r#"#!/bin/sh
STATE='{state}'
echo "lsof $*" >> "$STATE/calls.log"
if [ -f "$STATE/{TUNNEL}.loaded" ]; then
    echo 4242
    exit 0
fi
exit 1
"#,
                state = state.display()
            ),
        );

        Self {
            root,
            launchctl,
            lsof,
            state,
        }
    }

    /// Config pointing at the fake tools, with unit files inside the temp root.
    pub(crate) fn config(&self) -> MonitorConfig {
        let mut config = MonitorConfig::default();
        config.supervisor.launchctl_path = self.launchctl.clone();
        config.supervisor.lsof_path = self.lsof.clone();
        config.supervisor.domain = Some("gui/501".to_owned());
        config.tunnel.plist_path = self.root.path().join(format!("{TUNNEL}.plist"));
        config.node.plist_path = self.root.path().join(format!("{NODE}.plist"));
        config.lifecycle.startup_grace_ms = 0;
        config.lifecycle.restart_settle_ms = 10;
        config.polling.follow_up_delays_ms = vec![];
        config
    }

    pub(crate) fn watchdog_paths(&self) -> WatchdogPaths {
        WatchdogPaths::for_root(
            &self.root.path().join("run"),
            &self.root.path().join("LaunchAgents"),
            WATCHDOG,
        )
    }

    pub(crate) fn load(&self, label: &str) {
        fs::write(self.state.join(format!("{label}.loaded")), b"").unwrap();
    }

    /// Make `bootout` of `label` take `secs` seconds (a decimal string for `sleep`).
    pub(crate) fn slow_bootout(&self, label: &str, secs: &str) {
        fs::write(self.state.join(format!("{label}.slow")), secs).unwrap();
    }

    pub(crate) fn is_loaded(&self, label: &str) -> bool {
        self.state.join(format!("{label}.loaded")).exists()
    }

    /// Recorded invocations, oldest first.
    pub(crate) fn calls(&self) -> Vec<String> {
        fs::read_to_string(self.state.join("calls.log"))
            .map(|log| log.lines().map(str::to_owned).collect())
            .unwrap_or_default()
    }

    pub(crate) fn clear_calls(&self) {
        let _ = fs::remove_file(self.state.join("calls.log"));
    }
}

/// Pid of a process that has exited and been reaped.
pub(crate) fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}
