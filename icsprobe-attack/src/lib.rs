//! Memory-effect correlation and sustained write attacks
//!
//! Builds on the device sessions from `icsprobe-protocols`: the
//! scanner walks a range of PLC memory offsets and correlates each
//! write against an observed status feed, and the sustained attack
//! driver keeps a payload pinned into memory over time.

pub mod observer;
pub mod scanner;
pub mod sustain;

pub use observer::{HttpObservationSource, ObservationSource};
pub use scanner::{EffectRecord, EffectScanner, OffsetError, ScanConfig, ScanReport};
pub use sustain::{
    StatusSample, SustainConfig, SustainOutcome, SustainReport, SustainedWriteAttack,
};
