//! Headless host binary for tunnelbar.
//!
//! `tunnelbar run` is what the menu-bar shell launches: it starts the
//! services and then speaks newline-delimited JSON over stdin/stdout (see
//! [`tunnelbar::host::contract`]). Every control request from the shell goes
//! through this one process. Stdin EOF, a `quit` request, SIGTERM or Ctrl+C
//! all run the full teardown before the process exits. The remaining
//! subcommands are one-shot helpers.
//!
//! All tracing output goes to stderr so stdout stays machine-readable.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{info, warn};
use tunnelbar::connectivity;
use tunnelbar::control::ServiceAction;
use tunnelbar::host::HostCore;
use tunnelbar::host::stdio::run_bridge;
use tunnelbar::watchdog;
use tunnelbar::{MonitorConfig, ServiceKind, SystemCommandRunner, app_dirs, logging};

/// Supervises the SSH tunnel and node launchd agents.
#[derive(Parser)]
#[command(name = "tunnelbar", version, about)]
struct Cli {
    /// Path to TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Subcommand to run.
    #[command(subcommand)]
    command: Option<Command>,
}

/// Available commands.
#[derive(Subcommand)]
enum Command {
    /// Start both services and serve JSON requests on stdin until EOF,
    /// `quit`, SIGTERM or Ctrl+C, then tear down.
    Run,

    /// Poll once and print the snapshot.
    Status,

    /// Stop the service if it is up, start it otherwise.
    Toggle {
        #[arg(value_parser = parse_service)]
        service: ServiceKind,
    },

    /// Start the service.
    Start {
        #[arg(value_parser = parse_service)]
        service: ServiceKind,
    },

    /// Stop the service. Stopping the tunnel also stops the node.
    Stop {
        #[arg(value_parser = parse_service)]
        service: ServiceKind,
    },

    /// Unload, wait, and reload the service.
    Restart {
        #[arg(value_parser = parse_service)]
        service: ServiceKind,
    },

    /// Run one crash-watchdog check in-process.
    WatchdogCheck,

    /// Write the default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// Check whether a host accepts non-interactive SSH logins.
    CheckSsh {
        host: String,

        /// Connect timeout in seconds.
        #[arg(long, default_value_t = 5)]
        timeout: u64,
    },

    /// Handle a transcript the way the voice pipeline would.
    Say {
        #[arg(required = true, num_args = 1..)]
        transcript: Vec<String>,
    },
}

fn parse_service(raw: &str) -> Result<ServiceKind, String> {
    ServiceKind::parse(raw)
        .ok_or_else(|| format!("unknown service '{raw}' (expected tunnel or node)"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);

    let log_dir = matches!(command, Command::Run).then(app_dirs::logs_dir);
    let log_guards = logging::init(log_dir.as_deref()).context("cannot initialise logging")?;

    let config_path = cli
        .config
        .unwrap_or_else(MonitorConfig::default_config_path);

    if let Command::InitConfig { force } = command {
        return init_config(&config_path, force);
    }

    let config = MonitorConfig::load_or_default(&config_path)
        .with_context(|| format!("cannot load config from {}", config_path.display()))?;
    config.validate()?;
    let host = HostCore::new(Arc::new(SystemCommandRunner), config);

    match command {
        Command::Run => {
            let result = run(host).await;
            drop(log_guards);
            // The blocking stdin read cannot be cancelled; exit without
            // waiting for the runtime to reclaim it.
            std::process::exit(i32::from(result.is_err()));
        }
        Command::Status => print_status(&host).await,
        Command::Toggle { service } => control(&host, service, ServiceAction::Toggle).await,
        Command::Start { service } => control(&host, service, ServiceAction::Start).await,
        Command::Stop { service } => control(&host, service, ServiceAction::Stop).await,
        Command::Restart { service } => control(&host, service, ServiceAction::Restart).await,
        Command::WatchdogCheck => watchdog_check(&host).await,
        Command::CheckSsh { host: target, timeout } => check_ssh(&host, &target, timeout).await,
        Command::Say { transcript } => say(&host, &transcript.join(" ")).await,
        Command::InitConfig { .. } => Ok(()),
    }
}

fn init_config(path: &std::path::Path, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        anyhow::bail!("{} already exists (use --force to overwrite)", path.display());
    }
    MonitorConfig::default().save_to_file(path)?;
    println!("wrote {}", path.display());
    Ok(())
}

async fn run(host: HostCore) -> anyhow::Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "tunnelbar starting");
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    run_bridge(Arc::new(host), stdin, tokio::io::stdout(), quit_signal())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "tunnelbar exited with error");
            anyhow::anyhow!("tunnelbar host failed: {e}")
        })?;
    info!("tunnelbar shut down cleanly");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl+C.
async fn quit_signal() {
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(error = %e, "cannot listen for SIGTERM, only Ctrl+C will stop the host");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = terminate.recv() => info!("received SIGTERM"),
        _ = tokio::signal::ctrl_c() => info!("received Ctrl+C"),
    }
}

async fn print_status(host: &HostCore) -> anyhow::Result<()> {
    let snapshot = host.fresh_snapshot().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(())
}

async fn control(
    host: &HostCore,
    service: ServiceKind,
    action: ServiceAction,
) -> anyhow::Result<()> {
    host.aggregator().poll_now().await;
    let outcome = host.controller().perform(service, action).await;
    let report = serde_json::json!({
        "service": service,
        "action": action,
        "result": outcome,
        "status": host.aggregator().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn watchdog_check(host: &HostCore) -> anyhow::Result<()> {
    let config = host.config().snapshot();
    let paths = host.lifecycle().paths();
    let verdict = watchdog::check_once(paths, &config, &host.supervisor()).await;
    println!("{}", serde_json::to_string(&verdict)?);
    Ok(())
}

async fn check_ssh(host: &HostCore, target: &str, timeout: u64) -> anyhow::Result<()> {
    let ssh = host.config().snapshot().supervisor.ssh_path;
    let result = connectivity::check_ssh(host.runner().as_ref(), &ssh, target, timeout).await;
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

async fn say(host: &HostCore, transcript: &str) -> anyhow::Result<()> {
    host.aggregator().poll_now().await;
    println!("{}", host.say(transcript).await);
    Ok(())
}
