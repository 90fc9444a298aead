//! OPC-UA binary protocol support
//!
//! Implements the client side of the OPC-UA TCP binary protocol:
//! Hello/Acknowledge transport negotiation, OpenSecureChannel, and
//! Read/Write services addressing a ByteString variable through index
//! ranges. The wire path is complete for security policy `None`;
//! signed policies carry the policy URI and client certificate material
//! and surface the server's verdict as a connect error.

pub mod cert;
pub mod packet;
pub mod session;

pub use cert::CertificateBundle;
pub use session::{OpcUaConfig, OpcUaSession};
