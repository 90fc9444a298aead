//! Error types for icsprobe

use thiserror::Error;

/// Result type alias for icsprobe operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for icsprobe
#[derive(Error, Debug)]
pub enum Error {
    /// Network I/O error on an established session
    #[error("Device I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Connection establishment failure
    #[error("Connection failed: {reason}{}", .hint.as_deref().map(|h| format!(" ({h})")).unwrap_or_default())]
    Connect {
        reason: String,
        hint: Option<String>,
    },

    /// Operation requires an established session
    #[error("Not connected: call connect() before issuing device operations")]
    NotConnected,

    /// Malformed or negative response from the device
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Device returned fewer bytes than requested
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },

    /// Observation endpoint unreachable or returned non-JSON
    #[error("Observation fetch failed: {0}")]
    Fetch(String),

    /// Unknown payload pattern name
    #[error("Invalid payload pattern '{0}' (expected all_max, all_min, or alternating)")]
    InvalidPattern(String),

    /// Invalid memory window
    #[error("Invalid memory window: {0}")]
    InvalidWindow(String),

    /// Invalid caller-supplied parameter
    #[error("Invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// Malformed hex payload
    #[error("Invalid hex payload: {0}")]
    Payload(String),

    /// Certificate generation or loading failure
    #[error("Certificate error: {0}")]
    Certificate(String),

    /// Operation interrupted
    #[error("Operation interrupted: {0}")]
    Interrupted(String),
}

impl Error {
    /// Create a protocol error with a custom message
    pub fn protocol<S: Into<String>>(msg: S) -> Self {
        Error::Protocol(msg.into())
    }

    /// Create a connection error without a remediation hint
    pub fn connect<S: Into<String>>(reason: S) -> Self {
        Error::Connect {
            reason: reason.into(),
            hint: None,
        }
    }

    /// Create a connection error carrying a remediation hint
    pub fn connect_hint<S: Into<String>, H: Into<String>>(reason: S, hint: H) -> Self {
        Error::Connect {
            reason: reason.into(),
            hint: Some(hint.into()),
        }
    }

    /// Create an observation fetch error
    pub fn fetch<S: Into<String>>(msg: S) -> Self {
        Error::Fetch(msg.into())
    }

    /// Create an invalid window error
    pub fn invalid_window<S: Into<String>>(msg: S) -> Self {
        Error::InvalidWindow(msg.into())
    }

    /// Create an invalid parameter error
    pub fn invalid_parameter<N: Into<String>, S: Into<String>>(name: N, reason: S) -> Self {
        Error::InvalidParameter {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display_with_hint() {
        let err = Error::connect_hint("refused", "check rack/slot");
        assert_eq!(err.to_string(), "Connection failed: refused (check rack/slot)");
    }

    #[test]
    fn test_connect_error_display_without_hint() {
        let err = Error::connect("timed out");
        assert_eq!(err.to_string(), "Connection failed: timed out");
    }

    #[test]
    fn test_not_connected_mentions_connect() {
        assert!(Error::NotConnected.to_string().contains("connect()"));
    }
}
