//! The generated watchdog script, executed by a real `sh`.

use crate::helpers::{FakeTools, NODE, TUNNEL, WATCHDOG, dead_pid};
use std::process::Command;
use std::sync::Arc;
use tunnelbar::SystemCommandRunner;
use tunnelbar::launchd::Supervisor;
use tunnelbar::watchdog::{self, WatchdogPaths};

async fn installed(tools: &FakeTools) -> WatchdogPaths {
    let config = tools.config();
    let paths = tools.watchdog_paths();
    paths.ensure_runtime_dir().unwrap();
    let supervisor = Supervisor::new(Arc::new(SystemCommandRunner), &config.supervisor);
    assert!(watchdog::install(&paths, &config, &supervisor).await.unwrap());
    tools.clear_calls();
    paths
}

fn run_script(paths: &WatchdogPaths) {
    let status = Command::new("/bin/sh").arg(&paths.script).status().unwrap();
    assert!(status.success());
}

#[tokio::test]
async fn dead_owner_is_healed() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    tools.load(NODE);
    let paths = installed(&tools).await;
    watchdog::write_pid_file(&paths, dead_pid()).unwrap();

    run_script(&paths);

    assert_eq!(
        tools.calls(),
        vec![
            format!("launchctl bootout gui/501/{NODE}"),
            format!("launchctl bootout gui/501/{TUNNEL}"),
            format!("launchctl bootout gui/501/{WATCHDOG}"),
        ]
    );
    assert!(!paths.pid_file.exists());
    assert!(!tools.is_loaded(TUNNEL));
    assert!(!tools.is_loaded(NODE));
    assert!(!tools.is_loaded(WATCHDOG));
}

#[tokio::test]
async fn live_owner_is_left_alone() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    tools.load(NODE);
    let paths = installed(&tools).await;
    watchdog::write_pid_file(&paths, std::process::id()).unwrap();

    run_script(&paths);

    assert!(tools.calls().is_empty());
    assert!(paths.pid_file.exists());
    assert!(tools.is_loaded(TUNNEL));
    assert!(tools.is_loaded(NODE));
}

#[tokio::test]
async fn missing_or_garbage_pid_file_is_a_no_op() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    let paths = installed(&tools).await;

    run_script(&paths);
    std::fs::write(&paths.pid_file, "garbage\n").unwrap();
    run_script(&paths);

    assert!(tools.calls().is_empty());
    assert!(tools.is_loaded(TUNNEL));
}

#[tokio::test]
async fn in_process_check_agrees_with_script() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    tools.load(NODE);
    let paths = installed(&tools).await;
    let pid = dead_pid();
    watchdog::write_pid_file(&paths, pid).unwrap();
    let config = tools.config();
    let supervisor = Supervisor::new(Arc::new(SystemCommandRunner), &config.supervisor);

    let verdict = watchdog::check_once(&paths, &config, &supervisor).await;

    assert_eq!(verdict, watchdog::WatchdogVerdict::Healed(pid));
    assert!(!tools.is_loaded(TUNNEL));
    assert!(!tools.is_loaded(NODE));
    assert!(!paths.pid_file.exists());
}
