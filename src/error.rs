//! Error types for tunnelbar.
//!
//! The supervision core itself never surfaces errors to its UI collaborators
//! (outcomes are observable state), so this type only covers the ambient
//! surface: configuration, filesystem artifacts, logging setup and the
//! host bridge transport.

/// Top-level error type for the tunnelbar crate.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// Configuration could not be parsed, serialized or validated.
    #[error("config error: {0}")]
    Config(String),

    /// Watchdog artifact (PID file, script, plist) could not be written.
    #[error("watchdog error: {0}")]
    Watchdog(String),

    /// Logging could not be initialised.
    #[error("logging error: {0}")]
    Logging(String),

    /// The stdin/stdout command bridge could not read or write.
    #[error("bridge error: {0}")]
    Bridge(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, MonitorError>;
