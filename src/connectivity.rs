//! SSH reachability diagnosis.
//!
//! Before the tunnel is blamed, it helps to know whether the remote host
//! accepts a non-interactive login at all. [`check_ssh`] runs a batch-mode
//! `ssh` that only echoes a marker and classifies whatever went wrong.

use crate::command::CommandRunner;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use tracing::{debug, info};

const REACHABLE_MARKER: &str = "tunnelbar-ok";

/// Outcome of an SSH reachability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "result", content = "detail")]
pub enum SshReachability {
    /// Login succeeded and the remote command ran.
    Reachable,
    /// Name resolution, routing or TCP connect failed.
    HostUnreachable,
    /// The server refused our keys.
    AuthRejected,
    /// The server's host key does not match `known_hosts`.
    HostKeyMismatch,
    /// Anything else, with the first line ssh printed.
    Unknown(String),
}

impl fmt::Display for SshReachability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reachable => f.write_str("reachable"),
            Self::HostUnreachable => f.write_str("host unreachable"),
            Self::AuthRejected => f.write_str("authentication rejected"),
            Self::HostKeyMismatch => f.write_str("host key mismatch"),
            Self::Unknown(detail) => write!(f, "unknown failure: {detail}"),
        }
    }
}

const UNREACHABLE_MARKERS: &[&str] = &[
    "could not resolve hostname",
    "connection refused",
    "connection timed out",
    "operation timed out",
    "no route to host",
    "network is unreachable",
    "connection closed by remote host",
];

const HOST_KEY_MARKERS: &[&str] = &[
    "host key verification failed",
    "remote host identification has changed",
];

/// Classify the streams of a finished `ssh` run.
pub fn classify(stdout: &str, stderr: &str) -> SshReachability {
    if stdout.lines().any(|line| line.trim() == REACHABLE_MARKER) {
        return SshReachability::Reachable;
    }
    let lower = stderr.to_ascii_lowercase();
    if HOST_KEY_MARKERS.iter().any(|m| lower.contains(m)) {
        return SshReachability::HostKeyMismatch;
    }
    if lower.contains("permission denied") {
        return SshReachability::AuthRejected;
    }
    if UNREACHABLE_MARKERS.iter().any(|m| lower.contains(m)) {
        return SshReachability::HostUnreachable;
    }
    let detail = stderr
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && !line.starts_with('@'))
        .unwrap_or("ssh produced no output")
        .to_owned();
    SshReachability::Unknown(detail)
}

/// Run `ssh -o BatchMode=yes -o ConnectTimeout=<secs> -- <host> echo <marker>`.
///
/// `--` ends option parsing, so a host that starts with `-` is passed as a
/// destination and never read as an ssh option.
pub async fn check_ssh(
    runner: &dyn CommandRunner,
    ssh: &Path,
    host: &str,
    connect_timeout_secs: u64,
) -> SshReachability {
    let timeout = format!("ConnectTimeout={connect_timeout_secs}");
    let args = [
        "-o",
        "BatchMode=yes",
        "-o",
        timeout.as_str(),
        "--",
        host,
        "echo",
        REACHABLE_MARKER,
    ];
    let (stdout, stderr) = runner.run_with_stderr(ssh, &args).await;
    debug!(host, %stderr, "ssh check finished");
    let result = classify(&stdout, &stderr);
    info!(host, %result, "ssh reachability");
    result
}
