//! Error types for the sensor session.
//!
//! `ImuError` is the single error type returned across the public API. Driver
//! implementations report failures as `anyhow::Error`; the session wraps them
//! into the variant that matches where the failure happened:
//!
//! - **`OpenFailure`**: the device could not be connected (or could not be
//!   configured right after connecting).
//! - **`Io`**: a transaction on an open device failed.
//! - **`NotOpen`**: an operation needed the device while the session was closed.
//! - **`InvalidConfiguration`**: an unparseable axis name, an out-of-range
//!   setting, or a malformed command payload.
//! - **`Config`**: wraps `figment` errors raised while loading configuration files.
//!
//! Open and I/O failures are counted by the session and reported through
//! diagnostics; the polling loop treats them as transient. `NotOpen` and
//! `InvalidConfiguration` go straight back to the caller.

use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type Result<T> = std::result::Result<T, ImuError>;

/// Errors raised by the sensor session and its collaborators.
#[derive(Error, Debug)]
pub enum ImuError {
    /// Driver refused or failed to configure the connection
    #[error("Failed to open device on {port}: {source}")]
    OpenFailure {
        /// Port the session tried to open
        port: String,
        /// Driver error
        #[source]
        source: anyhow::Error,
    },

    /// A device transaction failed
    #[error("Device I/O error: {0}")]
    Io(#[source] anyhow::Error),

    /// Operation needs an open session
    #[error("Device session is not open")]
    NotOpen,

    /// Rejected configuration or command argument
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Loading configuration failed
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    /// A blocking or background task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl ImuError {
    /// Shorthand for building an [`ImuError::InvalidConfiguration`].
    pub fn invalid(message: impl Into<String>) -> Self {
        ImuError::InvalidConfiguration(message.into())
    }

    /// Whether the polling loop should treat this error as transient.
    pub fn is_transient(&self) -> bool {
        matches!(self, ImuError::OpenFailure { .. } | ImuError::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_mentions_port() {
        let err = ImuError::OpenFailure {
            port: "/dev/ttyACM3".into(),
            source: anyhow::anyhow!("no such device"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/dev/ttyACM3"));
        assert!(msg.contains("no such device"));
    }

    #[test]
    fn transient_classification() {
        assert!(ImuError::Io(anyhow::anyhow!("timeout")).is_transient());
        assert!(!ImuError::NotOpen.is_transient());
        assert!(!ImuError::invalid("bad axis").is_transient());
    }
}
