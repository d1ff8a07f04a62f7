//! Shared test utilities used across multiple test modules.
//!
//! [`FakeLaunchd`] is an in-memory stand-in for `launchctl` and `lsof` that
//! records every invocation and models which labels are loaded.

use crate::command::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

/// Pid reported for every running fake service.
pub const FAKE_PID: u32 = 4242;

#[derive(Default)]
struct FakeState {
    loaded: HashSet<String>,
    port_owners: HashMap<u16, String>,
    calls: Vec<String>,
    delays: Vec<(String, Duration)>,
    linger_after_bootout: HashMap<String, u32>,
    lingering: HashMap<String, u32>,
    print_overrides: HashMap<String, String>,
}

/// Fake supervisor. `bootstrap` loads the label named by the plist file
/// stem, `bootout` unloads it, `print` reports `state = running` for loaded
/// labels and "Could not find service" otherwise.
#[derive(Default)]
pub struct FakeLaunchd {
    state: Mutex<FakeState>,
}

impl FakeLaunchd {
    pub fn new() -> Self {
        Self::default()
    }

    /// `lsof` reports a listener on `port` while `label` is loaded.
    pub fn with_port_owner(self, port: u16, label: &str) -> Self {
        self.lock().port_owners.insert(port, label.to_owned());
        self
    }

    /// Delay every invocation whose command line contains `pattern`.
    pub fn with_delay(self, pattern: &str, delay: Duration) -> Self {
        self.lock().delays.push((pattern.to_owned(), delay));
        self
    }

    /// After `bootout`, keep reporting `label` as running for `prints` status queries.
    pub fn with_linger(self, label: &str, prints: u32) -> Self {
        self.lock()
            .linger_after_bootout
            .insert(label.to_owned(), prints);
        self
    }

    pub fn load(&self, label: &str) {
        self.lock().loaded.insert(label.to_owned());
    }

    pub fn is_loaded(&self, label: &str) -> bool {
        self.lock().loaded.contains(label)
    }

    /// Force the status text returned for `label`.
    pub fn set_print_override(&self, label: &str, text: &str) {
        self.lock()
            .print_overrides
            .insert(label.to_owned(), text.to_owned());
    }

    /// Recorded command lines, e.g. `launchctl bootout gui/501/com.x.node`.
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Number of recorded command lines containing `pattern`.
    pub fn count_matching(&self, pattern: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn respond(&self, tool: &str, args: &[&str]) -> CommandOutput {
        let mut state = self.lock();
        match (tool, args.first().copied()) {
            ("launchctl", Some("print")) => {
                let label = label_of_target(args.get(1).copied().unwrap_or_default());
                if let Some(text) = state.print_overrides.get(&label) {
                    return CommandOutput::ok(text.clone());
                }
                if state.loaded.contains(&label) {
                    return CommandOutput::ok(running_report(&label));
                }
                if let Some(remaining) = state.lingering.get_mut(&label)
                    && *remaining > 0
                {
                    *remaining -= 1;
                    return CommandOutput::ok(running_report(&label));
                }
                CommandOutput {
                    success: false,
                    code: Some(113),
                    stdout: String::new(),
                    stderr: format!("Could not find service \"{label}\" in domain for user gui"),
                }
            }
            ("launchctl", Some("bootstrap")) => {
                let label = args
                    .get(2)
                    .and_then(|p| Path::new(p).file_stem())
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_default();
                state.lingering.remove(&label);
                state.loaded.insert(label);
                CommandOutput::ok("")
            }
            ("launchctl", Some("bootout")) => {
                let label = label_of_target(args.get(1).copied().unwrap_or_default());
                if state.loaded.remove(&label) {
                    if let Some(prints) = state.linger_after_bootout.get(&label).copied() {
                        state.lingering.insert(label, prints);
                    }
                    CommandOutput::ok("")
                } else {
                    CommandOutput {
                        success: false,
                        code: Some(3),
                        stdout: String::new(),
                        stderr: "Boot-out failed: 3: No such process".to_owned(),
                    }
                }
            }
            ("lsof", _) => {
                let port = args
                    .iter()
                    .find_map(|a| a.strip_prefix("-iTCP:"))
                    .and_then(|p| p.parse::<u16>().ok());
                let owner_loaded = port
                    .and_then(|p| state.port_owners.get(&p))
                    .is_some_and(|label| state.loaded.contains(label));
                if owner_loaded {
                    CommandOutput::ok(FAKE_PID.to_string())
                } else {
                    CommandOutput {
                        success: false,
                        code: Some(1),
                        ..CommandOutput::default()
                    }
                }
            }
            _ => CommandOutput::ok(""),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeLaunchd {
    async fn output(&self, program: &Path, args: &[&str]) -> CommandOutput {
        let tool = program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let line = format!("{tool} {}", args.join(" "));
        let delay = {
            let mut state = self.lock();
            state.calls.push(line.clone());
            state
                .delays
                .iter()
                .find(|(pattern, _)| line.contains(pattern.as_str()))
                .map(|(_, d)| *d)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.respond(&tool, args)
    }
}

fn label_of_target(target: &str) -> String {
    target.rsplit('/').next().unwrap_or_default().to_owned()
}

fn running_report(label: &str) -> String {
    format!("gui/501/{label} = {{\n\tactive count = 1\n\tstate = running\n\tpid = {FAKE_PID}\n}}")
}

/// A unique temporary directory for test isolation.
pub fn temp_test_root(name: &str) -> tempfile::TempDir {
    tempfile::Builder::new()
        .prefix(&format!("tunnelbar-{name}-"))
        .tempdir()
        .expect("create temp test dir")
}
