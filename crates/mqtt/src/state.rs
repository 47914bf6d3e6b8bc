//! Observable connection state of the bridge client.
//!
//! The [`ConnectionKernel`](crate::ConnectionKernel) owns the sending side of a
//! `watch` channel carrying these values; sessions use the receiving side to
//! wait for the first CONNACK and to notice when the kernel gives up.

use std::fmt;

/// Where the bridge connection currently is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    Connecting,
    /// CONNACK accepted; subscribe and publish requests will be flushed.
    Connected,
    /// Connection lost or refused, with the reason.
    Disconnected(String),
    /// Waiting this many seconds before the next attempt.
    Reconnecting(f64),
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// Reason for `Disconnected`, remaining delay for `Reconnecting`, empty otherwise.
    pub fn details(&self) -> String {
        match self {
            ConnectionState::Disconnected(reason) => reason.clone(),
            ConnectionState::Reconnecting(seconds) => format!("in {seconds} seconds"),
            ConnectionState::Connecting | ConnectionState::Connected => String::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }

    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            ConnectionState::Connecting | ConnectionState::Reconnecting(_)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())?;
        let details = self.details();
        if !details.is_empty() {
            write!(f, " ({details})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display_includes_details() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Reconnecting(2.5).to_string(),
            "Reconnecting (in 2.5 seconds)"
        );
        assert_eq!(
            ConnectionState::Disconnected("bad credentials".into()).to_string(),
            "Disconnected (bad credentials)"
        );
    }

    #[test]
    fn test_state_predicates() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(ConnectionState::Reconnecting(1.0).is_connecting());
        assert!(!ConnectionState::Disconnected("x".into()).is_connecting());
    }
}
