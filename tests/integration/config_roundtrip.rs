//! Config files as a user would write them.

use std::fs;
use std::path::PathBuf;
use tunnelbar::{MonitorConfig, MonitorError};

#[test]
fn hand_written_config_loads_and_validates() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(
        &path,
        r#"
[tunnel]
label = "io.example.ssh-tunnel"
plist_path = "/Users/me/Library/LaunchAgents/io.example.ssh-tunnel.plist"
port = 2222

[node]
label = "io.example.node"
plist_path = "/Users/me/Library/LaunchAgents/io.example.node.plist"

[polling]
interval_secs = 5
follow_up_delays_ms = [1500]

[supervisor]
domain = "gui/502"
"#,
    )
    .unwrap();

    let config = MonitorConfig::load_or_default(&path).unwrap();
    config.validate().unwrap();

    assert_eq!(config.tunnel.port, Some(2222));
    assert_eq!(config.node.port, None);
    assert_eq!(
        config.node.plist_path,
        PathBuf::from("/Users/me/Library/LaunchAgents/io.example.node.plist")
    );
    assert_eq!(config.polling.follow_up_delays_ms, vec![1500]);
    assert_eq!(config.supervisor.domain.as_deref(), Some("gui/502"));
    assert_eq!(config.lifecycle.watchdog_interval_secs, 10);
    assert_eq!(config.supervisor.launchctl_path, PathBuf::from("/bin/launchctl"));
}

#[test]
fn default_config_round_trips_through_disk() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("tunnelbar").join("config.toml");

    MonitorConfig::default().save_to_file(&path).unwrap();
    let loaded = MonitorConfig::from_file(&path).unwrap();

    loaded.validate().unwrap();
    assert_eq!(loaded.tunnel, MonitorConfig::default().tunnel);
    assert_eq!(loaded.polling.interval_secs, 3);
}

#[test]
fn conflicting_labels_fail_validation() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("config.toml");
    fs::write(
        &path,
        r#"
[lifecycle]
watchdog_label = "com.tunnelbar.node"
"#,
    )
    .unwrap();

    let config = MonitorConfig::from_file(&path).unwrap();
    assert!(matches!(config.validate(), Err(MonitorError::Config(_))));
}
