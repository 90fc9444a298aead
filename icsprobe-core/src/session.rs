//! Device session trait and related types
//!
//! A `DeviceSession` wraps exactly one protocol connection to a target
//! device. All operations against one session are strictly sequential;
//! the `&mut self` receivers enforce the single-in-flight-request
//! invariant at compile time.

use crate::{MemoryWindow, Result};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;

/// Wire protocol spoken by a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TransportKind {
    /// OPC-UA binary protocol (opc.tcp)
    OpcUa,
    /// Siemens S7comm over ISO-on-TCP
    S7,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::OpcUa => write!(f, "opcua"),
            TransportKind::S7 => write!(f, "s7"),
        }
    }
}

/// Connection state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SessionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Facts established while connecting, reported back to the caller
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    /// Which protocol the session speaks
    pub transport: TransportKind,
    /// Endpoint the session is connected to
    pub endpoint: String,
    /// Negotiated identity details (PDU size, acknowledge limits, ...)
    pub identity: String,
}

/// Capability surface shared by all protocol sessions.
///
/// Semantics every implementation upholds:
///
/// - `connect` is idempotent in effect: calling it while already
///   connected to the configured endpoint is a no-op success.
/// - `read`/`write` require `Connected` state and fail with
///   `Error::NotConnected` before any device I/O otherwise.
/// - `read` returns exactly `window.length` bytes or fails.
/// - `write` requires `data.len() == window.length`; a mismatch is a
///   caller error and the write is not attempted.
/// - `disconnect` always succeeds, including when never connected,
///   and is safe to call repeatedly.
/// - Transport errors are never retried inside the session; retry
///   policy belongs to callers.
#[async_trait]
pub trait DeviceSession: Send {
    /// Establish the protocol session to the configured endpoint
    async fn connect(&mut self) -> Result<SessionInfo>;

    /// Read `window.length` bytes at the window's block/offset
    async fn read(&mut self, window: &MemoryWindow) -> Result<Vec<u8>>;

    /// Write `data` to the window; `data.len()` must equal `window.length`
    async fn write(&mut self, window: &MemoryWindow, data: &[u8]) -> Result<()>;

    /// Tear the session down. Infallible and idempotent.
    async fn disconnect(&mut self);

    /// Current connection state
    fn state(&self) -> SessionState;

    /// Which protocol this session speaks
    fn transport(&self) -> TransportKind;

    /// Endpoint the session is configured for, if any
    fn current_endpoint(&self) -> Option<&str>;

    /// Convenience accessor over `state()`
    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }
}
