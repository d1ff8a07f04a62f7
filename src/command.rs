//! External command execution.
//!
//! [`CommandRunner`] is the substrate every other component uses to talk to
//! the OS. It never fails: a command that cannot be launched or exits
//! non-zero simply yields empty output, which callers treat as
//! "unknown/negative".
//!
//! # Cancellation
//!
//! [`SystemCommandRunner`] runs each process on its own tokio task. A caller
//! that stops awaiting (for example a cancelled poll loop) only drops the
//! waiter; the process itself runs to completion and its result is
//! discarded. No timeout is applied.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tracing::{debug, warn};

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `true` when the process launched and exited with status 0.
    pub success: bool,
    /// Exit code, if the process exited normally.
    pub code: Option<i32>,
    /// Trimmed standard output.
    pub stdout: String,
    /// Trimmed standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Output for a process that could not be launched at all.
    pub fn launch_failed() -> Self {
        Self::default()
    }

    /// Successful output with the given stdout.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Executes external commands.
#[async_trait]
pub trait CommandRunner: Send + Sync + 'static {
    /// Run `program` with `args` to completion and capture both streams.
    async fn output(&self, program: &Path, args: &[&str]) -> CommandOutput;

    /// Run a command and return its trimmed stdout.
    ///
    /// Returns an empty string on launch failure or non-zero exit.
    async fn run(&self, program: &Path, args: &[&str]) -> String {
        let out = self.output(program, args).await;
        if out.success { out.stdout } else { String::new() }
    }

    /// Run a command and return `(stdout, stderr)` regardless of exit status.
    ///
    /// For callers that need stderr to tell failure kinds apart.
    async fn run_with_stderr(&self, program: &Path, args: &[&str]) -> (String, String) {
        let out = self.output(program, args).await;
        (out.stdout, out.stderr)
    }
}

/// [`CommandRunner`] backed by real OS processes.
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn output(&self, program: &Path, args: &[&str]) -> CommandOutput {
        let program: PathBuf = program.to_path_buf();
        let owned_args: Vec<String> = args.iter().map(|a| (*a).to_owned()).collect();
        debug!(program = %program.display(), args = ?owned_args, "running command");

        let worker_program = program.clone();
        let worker = tokio::spawn(async move {
            tokio::process::Command::new(&worker_program)
                .args(&owned_args)
                .stdin(Stdio::null())
                .output()
                .await
        });

        match worker.await {
            Ok(Ok(out)) => {
                let result = CommandOutput {
                    success: out.status.success(),
                    code: out.status.code(),
                    stdout: String::from_utf8_lossy(&out.stdout).trim().to_owned(),
                    stderr: String::from_utf8_lossy(&out.stderr).trim().to_owned(),
                };
                if !result.success {
                    debug!(
                        program = %program.display(),
                        code = ?result.code,
                        "command exited non-zero"
                    );
                }
                result
            }
            Ok(Err(e)) => {
                warn!(program = %program.display(), error = %e, "cannot launch command");
                CommandOutput::launch_failed()
            }
            Err(e) => {
                warn!(program = %program.display(), error = %e, "command task failed");
                CommandOutput::launch_failed()
            }
        }
    }
}
