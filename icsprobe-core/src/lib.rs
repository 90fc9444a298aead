//! Icsprobe Core Library
//!
//! This crate provides the fundamental traits, types, and error handling
//! for the icsprobe ICS security testing toolkit.

pub mod error;
pub mod memory;
pub mod payload;
pub mod security;
pub mod session;
pub mod snapshot;

// Re-export commonly used types
pub use error::{Error, Result};
pub use memory::MemoryWindow;
pub use payload::{from_hex, generate, to_hex, PayloadPattern};
pub use security::{MessageSecurityMode, SecurityPolicy};
pub use session::{DeviceSession, SessionInfo, SessionState, TransportKind};
pub use snapshot::{FieldChange, FieldValue, ObservationSnapshot};
