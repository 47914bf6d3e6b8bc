//! Error type shared by every fallible operation in this crate.
//!
//! Variants roughly split into three groups:
//!
//! - **setup** (`ClientSetup`, `ConfigError`, `Credentials`, `Io`): the
//!   client could not be built; fix configuration and restart
//! - **runtime** (`ClientTransfer`, `ClientConnection`, `ConnectionState`,
//!   `RetriesPolicy`, `ConnectTimeout`, `KernelStopped`): the bridge
//!   connection failed or was given up on
//! - **application** (`Handler`, `Serialization`): the inbound message
//!   handler refused a message, or an outbound control payload could not be
//!   encoded

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// Client options or TLS material could not be assembled.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// `Config` failed its validation rules.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// No usable bridge password could be resolved.
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// The request could not be queued to the event loop (kernel gone or channel closed).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Network or broker level failure reported by the event loop.
    ///
    /// Boxed because `rumqttc::ConnectionError` is large.
    #[error("Client connection error: {0}")]
    ClientConnection(Box<rumqttc::ConnectionError>),

    #[error("Client connection state error: {0}")]
    ConnectionState(#[from] rumqttc::StateError),

    /// Reconnect budget exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    /// No CONNACK within the allowed time.
    #[error("Timed out after {0:?} waiting for the broker to accept the connection")]
    ConnectTimeout(Duration),

    /// The connection kernel ended before the operation could complete.
    #[error("Connection kernel stopped: {0}")]
    KernelStopped(String),

    /// The registered message handler rejected an inbound message.
    #[error("Message handler failed on topic '{topic}': {reason}")]
    Handler { topic: String, reason: String },

    /// Control payload (e.g. gateway attach) could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// File access while loading certificates or token files.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_error_display() {
        let err = TransferError::Handler {
            topic: "/devices/dev-1/config".into(),
            reason: "disk full".into(),
        };
        assert_eq!(
            err.to_string(),
            "Message handler failed on topic '/devices/dev-1/config': disk full"
        );
    }

    #[test]
    fn test_connection_error_is_boxed() {
        let err: TransferError = rumqttc::ConnectionError::NetworkTimeout.into();
        assert!(matches!(err, TransferError::ClientConnection(_)));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "roots.pem missing");
        let err: TransferError = io_err.into();
        assert!(err.to_string().contains("roots.pem missing"));
    }
}
