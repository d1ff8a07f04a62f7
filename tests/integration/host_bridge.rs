//! The stdio bridge driven the way the menu-bar shell drives it.

use crate::helpers::{FakeTools, NODE, TUNNEL, WATCHDOG};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::task::JoinHandle;
use tunnelbar::host::stdio::run_bridge;
use tunnelbar::{HostCore, MonitorConfig, SystemCommandRunner};

struct Session {
    input: Option<DuplexStream>,
    output: Lines<BufReader<DuplexStream>>,
    bridge: JoinHandle<tunnelbar::Result<()>>,
}

fn start(tools: &FakeTools) -> Session {
    start_with(tools, tools.config())
}

fn start_with(tools: &FakeTools, config: MonitorConfig) -> Session {
    let host = HostCore::new(Arc::new(SystemCommandRunner), config)
        .with_watchdog_paths(tools.watchdog_paths());
    let (input, bridge_in) = tokio::io::duplex(1 << 16);
    let (bridge_out, output) = tokio::io::duplex(1 << 20);
    let bridge = tokio::spawn(run_bridge(
        Arc::new(host),
        BufReader::new(bridge_in),
        bridge_out,
        std::future::pending(),
    ));
    Session {
        input: Some(input),
        output: BufReader::new(output).lines(),
        bridge,
    }
}

impl Session {
    async fn send(&mut self, line: &str) {
        let input = self.input.as_mut().expect("input open");
        input.write_all(line.as_bytes()).await.unwrap();
        input.write_all(b"\n").await.unwrap();
    }

    async fn next(&mut self) -> serde_json::Value {
        let line = tokio::time::timeout(Duration::from_secs(10), self.output.next_line())
            .await
            .expect("bridge output within timeout")
            .unwrap()
            .expect("bridge output open");
        serde_json::from_str(&line).unwrap()
    }

    async fn wait_for_state(&mut self, state: &str) {
        loop {
            let message = self.next().await;
            if message["event"] == "status" && message["payload"]["state"] == state {
                return;
            }
        }
    }

    /// Collect `count` responses, skipping events.
    async fn responses(&mut self, count: usize) -> Vec<serde_json::Value> {
        let mut responses = Vec::new();
        while responses.len() < count {
            let message = self.next().await;
            if message.get("request_id").is_some() {
                responses.push(message);
            }
        }
        responses
    }
}

#[tokio::test]
async fn overlapping_toggles_share_one_guard() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    tools.load(NODE);
    tools.slow_bootout(NODE, "0.5");
    let mut session = start(&tools);

    assert_eq!(session.next().await["event"], "ready");
    session.wait_for_state("connected").await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    tools.clear_calls();

    session
        .send(r#"{"request_id":"a","command":"toggle","service":"node"}"#)
        .await;
    session
        .send(r#"{"request_id":"b","command":"toggle","service":"node"}"#)
        .await;
    let responses = session.responses(2).await;

    let mut outcomes: Vec<String> = responses
        .iter()
        .map(|r| {
            assert_eq!(r["ok"], true);
            r["payload"]["result"]["outcome"].as_str().unwrap().to_owned()
        })
        .collect();
    outcomes.sort();
    assert_eq!(outcomes, ["busy", "stopped"]);
    let node_bootout = format!("launchctl bootout gui/501/{NODE}");
    let node_bootouts = tools.calls().iter().filter(|c| **c == node_bootout).count();
    assert_eq!(node_bootouts, 1);
    assert!(!tools.is_loaded(NODE));
    assert!(tools.is_loaded(TUNNEL));
}

#[tokio::test]
async fn stdin_eof_tears_everything_down() {
    let tools = FakeTools::new();
    let mut session = start(&tools);

    assert_eq!(session.next().await["event"], "ready");
    session.wait_for_state("connected").await;
    assert!(tools.is_loaded(WATCHDOG));
    assert!(tools.watchdog_paths().pid_file.exists());

    session.send(r#"{"request_id":"s","command":"status"}"#).await;
    let status = session.responses(1).await.remove(0);
    assert_eq!(status["payload"]["state"], "connected");

    session.input.take();
    tokio::time::timeout(Duration::from_secs(10), session.bridge)
        .await
        .expect("bridge exits on EOF")
        .unwrap()
        .unwrap();

    assert!(!tools.is_loaded(TUNNEL));
    assert!(!tools.is_loaded(NODE));
    assert!(!tools.is_loaded(WATCHDOG));
    let paths = tools.watchdog_paths();
    assert!(!paths.pid_file.exists());
    assert!(!paths.script.exists());
    assert!(!paths.plist.exists());
}

#[tokio::test]
async fn quit_during_restart_leaves_node_unloaded() {
    let tools = FakeTools::new();
    tools.load(TUNNEL);
    tools.load(NODE);
    let mut config = tools.config();
    config.lifecycle.restart_settle_ms = 1_000;
    let mut session = start_with(&tools, config);
    session.wait_for_state("connected").await;
    tokio::time::sleep(Duration::from_millis(200)).await;

    session
        .send(r#"{"request_id":"r","command":"restart","service":"node"}"#)
        .await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    session.send(r#"{"request_id":"q","command":"quit"}"#).await;

    let responses = session.responses(2).await;
    let restart = responses.iter().find(|r| r["request_id"] == "r").unwrap();
    assert_eq!(restart["payload"]["result"]["outcome"], "rejected");
    assert_eq!(restart["payload"]["result"]["reason"], "shutting_down");

    tokio::time::timeout(Duration::from_secs(10), session.bridge)
        .await
        .expect("bridge exits on quit")
        .unwrap()
        .unwrap();
    assert!(!tools.is_loaded(NODE));
    assert!(!tools.is_loaded(TUNNEL));
}
