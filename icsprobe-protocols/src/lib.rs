//! Protocol session implementations for icsprobe
//!
//! Each protocol module carries a `packet` submodule with the binary
//! codec (build + parse) and a `session` submodule implementing the
//! [`icsprobe_core::DeviceSession`] capability surface over tokio TCP.

pub mod opcua;
pub mod s7;

pub use opcua::{CertificateBundle, OpcUaConfig, OpcUaSession};
pub use s7::{S7Config, S7Session};
