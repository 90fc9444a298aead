//! Siemens S7comm protocol support
//!
//! Implements the client side of S7comm over ISO-on-TCP (RFC 1006):
//! COTP connection setup with rack/slot-derived TSAPs, PDU size
//! negotiation, and data block read/write.

pub mod packet;
pub mod session;

pub use session::{S7Config, S7Session};
