//! Voice command detection for service control.
//!
//! Transcripts from the push-to-talk pipeline are checked for control
//! phrases before they reach the assistant. Anything that is not a control
//! phrase comes back as [`VoiceCommand::Chat`] and is left to the caller.
//!
//! # Supported Commands
//!
//! | Phrase Pattern | Command |
//! |----------------|---------|
//! | "start / turn on / bring up the {service}" | `Control { Start }` |
//! | "stop / turn off / shut down the {service}" | `Control { Stop }` |
//! | "restart / reconnect / bounce the {service}" | `Control { Restart }` |
//! | "toggle the {service}" | `Control { Toggle }` |
//! | "connect" / "disconnect" | tunnel start / stop |
//! | "status", "are we connected" | `Status` |
//! | "help", "what can you do" | `Help` |
//!
//! `{service}` is "tunnel" (or "ssh") or "node".

use crate::control::{ControlOutcome, RejectReason, ServiceAction};
use crate::status::{ConnectionState, ServiceKind, StatusSnapshot};

/// A voice command detected from user speech.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceCommand {
    /// Run a control action against one service.
    Control {
        service: ServiceKind,
        action: ServiceAction,
    },
    /// Report the current connection state.
    Status,
    /// List what can be said.
    Help,
    /// Not a command; the normalized transcript for the assistant.
    Chat(String),
}

const START_PHRASES: &[&str] = &["start", "turn on", "bring up", "launch"];
const STOP_PHRASES: &[&str] = &["stop", "turn off", "shut down", "take down", "kill"];
const RESTART_PHRASES: &[&str] = &["restart", "reconnect", "bounce", "reboot"];
const TOGGLE_PHRASES: &[&str] = &["toggle", "flip"];
const STATUS_PHRASES: &[&str] = &[
    "status",
    "are we connected",
    "am i connected",
    "is the tunnel up",
    "is the node up",
    "is the node running",
    "is the tunnel running",
];
const HELP_PHRASES: &[&str] = &["help", "what can you do", "what can i say"];

fn normalize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '\'')
        .filter(|w| !w.is_empty())
        .map(str::to_owned)
        .collect()
}

fn contains_phrase(words: &[String], phrase: &str) -> bool {
    let needle: Vec<&str> = phrase.split(' ').collect();
    words
        .windows(needle.len())
        .any(|window| window.iter().zip(&needle).all(|(w, n)| w == n))
}

fn contains_any(words: &[String], phrases: &[&str]) -> bool {
    phrases.iter().any(|p| contains_phrase(words, p))
}

fn detect_service(words: &[String]) -> Option<ServiceKind> {
    words.iter().find_map(|w| ServiceKind::parse(w))
}

fn detect_action(words: &[String]) -> Option<ServiceAction> {
    // Restart first: "reconnect" must not fall through to "connect".
    if contains_any(words, RESTART_PHRASES) {
        Some(ServiceAction::Restart)
    } else if contains_any(words, STOP_PHRASES) {
        Some(ServiceAction::Stop)
    } else if contains_any(words, START_PHRASES) {
        Some(ServiceAction::Start)
    } else if contains_any(words, TOGGLE_PHRASES) {
        Some(ServiceAction::Toggle)
    } else {
        None
    }
}

/// Map a transcript to a command.
pub fn parse_voice_command(transcript: &str) -> VoiceCommand {
    let words = normalize(transcript);
    if words.is_empty() {
        return VoiceCommand::Chat(String::new());
    }

    if contains_any(&words, STATUS_PHRASES) {
        return VoiceCommand::Status;
    }

    let service = detect_service(&words);
    if let (Some(service), Some(action)) = (service, detect_action(&words)) {
        return VoiceCommand::Control { service, action };
    }
    if service.is_none() {
        if contains_phrase(&words, "disconnect") {
            return VoiceCommand::Control {
                service: ServiceKind::Tunnel,
                action: ServiceAction::Stop,
            };
        }
        if contains_phrase(&words, "connect") {
            return VoiceCommand::Control {
                service: ServiceKind::Tunnel,
                action: ServiceAction::Start,
            };
        }
    }

    if contains_any(&words, HELP_PHRASES) {
        return VoiceCommand::Help;
    }
    VoiceCommand::Chat(words.join(" "))
}

/// Spoken reply listing the supported phrases.
pub fn help_response() -> String {
    "You can say start, stop or restart the tunnel or the node, \
     connect or disconnect, or ask for the status."
        .to_owned()
}

/// Spoken reply for the current snapshot.
pub fn status_response(snapshot: &StatusSnapshot) -> String {
    match snapshot.state {
        ConnectionState::Connected => "Connected. The tunnel and the node are running.".to_owned(),
        ConnectionState::TunnelOnly => "The tunnel is up but the node is not running.".to_owned(),
        ConnectionState::Disconnected => "Disconnected. The tunnel is down.".to_owned(),
    }
}

/// Spoken reply for a finished control request.
pub fn control_response(service: ServiceKind, outcome: ControlOutcome) -> String {
    match outcome {
        ControlOutcome::Started => format!("Starting the {service}."),
        ControlOutcome::Stopped => format!("Stopped the {service}."),
        ControlOutcome::Restarted => format!("Restarted the {service}."),
        ControlOutcome::Unchanged => format!("The {service} is already in that state."),
        ControlOutcome::Busy => format!("The {service} is still busy, try again in a moment."),
        ControlOutcome::Rejected(RejectReason::TunnelDown) => {
            "The node needs the tunnel. Start the tunnel first.".to_owned()
        }
        ControlOutcome::Rejected(RejectReason::ShuttingDown) => "Shutting down.".to_owned(),
    }
}
