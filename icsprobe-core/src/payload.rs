//! Deterministic test payload generation and hex rendering
//!
//! Payloads are the byte sequences written to PLC memory during effect
//! scanning and sustained attacks. Generation is pure: two calls with
//! identical arguments yield identical bytes.

use crate::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// Named payload pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadPattern {
    /// Every byte 0xFF
    AllMax,
    /// Every byte 0x00
    AllMin,
    /// 0xFF at even indices, 0x00 at odd indices (per byte, not per bit)
    Alternating,
}

impl PayloadPattern {
    /// Generate `length` bytes of this pattern
    pub fn generate(&self, length: usize) -> Vec<u8> {
        match self {
            PayloadPattern::AllMax => vec![0xFF; length],
            PayloadPattern::AllMin => vec![0x00; length],
            PayloadPattern::Alternating => (0..length)
                .map(|i| if i % 2 == 0 { 0xFF } else { 0x00 })
                .collect(),
        }
    }
}

impl FromStr for PayloadPattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all_max" => Ok(PayloadPattern::AllMax),
            "all_min" => Ok(PayloadPattern::AllMin),
            "alternating" => Ok(PayloadPattern::Alternating),
            other => Err(Error::InvalidPattern(other.to_string())),
        }
    }
}

impl fmt::Display for PayloadPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PayloadPattern::AllMax => "all_max",
            PayloadPattern::AllMin => "all_min",
            PayloadPattern::Alternating => "alternating",
        };
        write!(f, "{}", name)
    }
}

/// Generate a payload from a pattern name.
///
/// Unknown names fail with `InvalidPattern` regardless of length.
pub fn generate(pattern: &str, length: usize) -> Result<Vec<u8>> {
    let pattern: PayloadPattern = pattern.parse()?;
    Ok(pattern.generate(length))
}

/// Render bytes as an uppercase hex string, two characters per byte
pub fn to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Decode a hex string (case-insensitive, even length) into bytes
pub fn from_hex(s: &str) -> Result<Vec<u8>> {
    hex::decode(s).map_err(|e| Error::Payload(e.to_string()))
}
