//! PLC memory addressing

use crate::{Error, Result};
use serde::Serialize;
use std::fmt;

/// A contiguous byte range inside a PLC data area.
///
/// Offsets are zero-based. The window length is validated against the
/// device's addressable size by the session performing the I/O.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryWindow {
    /// Data block number (S7 DB number, or OPC-UA node id in the
    /// session's configured namespace)
    pub block: u16,
    /// Zero-based byte offset inside the block
    pub offset: u32,
    /// Number of bytes covered by the window
    pub length: u16,
}

impl MemoryWindow {
    /// Create a new memory window
    pub const fn new(block: u16, offset: u32, length: u16) -> Self {
        Self {
            block,
            offset,
            length,
        }
    }

    /// Single-byte window, the typical probe size for effect scanning
    pub const fn byte_at(block: u16, offset: u32) -> Self {
        Self::new(block, offset, 1)
    }

    /// First offset past the end of the window, clamped at `u32::MAX`
    pub fn end_offset(&self) -> u32 {
        self.offset.saturating_add(u32::from(self.length))
    }

    /// Validate the window for a device I/O operation.
    ///
    /// Zero-length windows and windows whose end would wrap the
    /// address space are rejected before any device I/O happens.
    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(Error::invalid_window(format!(
                "zero-length window at DB{} offset {}",
                self.block, self.offset
            )));
        }
        if self.offset.checked_add(u32::from(self.length)).is_none() {
            return Err(Error::invalid_window(format!(
                "window at DB{} offset {} length {} overflows the address space",
                self.block, self.offset, self.length
            )));
        }
        Ok(())
    }

    /// Validate that `data` matches the window length for a write.
    ///
    /// A mismatch is a caller error; the write is not attempted.
    pub fn validate_write(&self, data: &[u8]) -> Result<()> {
        self.validate()?;
        if data.len() != usize::from(self.length) {
            return Err(Error::invalid_window(format!(
                "write data is {} bytes but window length is {}",
                data.len(),
                self.length
            )));
        }
        Ok(())
    }
}

impl fmt::Display for MemoryWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DB{}[{}..{}]", self.block, self.offset, self.end_offset())
    }
}
