//! Memory-effect correlation scanner
//!
//! Walks a range of byte offsets in one PLC data block. For each
//! offset the scanner reads the original bytes, snapshots the status
//! feed, writes a probe payload, waits for the process to settle,
//! snapshots again, and restores the original bytes. Fields that
//! changed between the two snapshots tie that offset to externally
//! visible behavior.

use crate::observer::ObservationSource;
use icsprobe_core::{
    DeviceSession, Error, FieldValue, MemoryWindow, PayloadPattern, Result,
};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Scan tuning knobs
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Probe payload written at each offset
    pub pattern: PayloadPattern,
    /// Bytes probed per offset
    pub probe_size: u16,
    /// Wait between the write and the after-snapshot, giving the
    /// process time to react
    pub settle_delay: Duration,
    /// Numeric tolerance for snapshot comparison
    pub tolerance: f64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pattern: PayloadPattern::AllMax,
            probe_size: 1,
            settle_delay: Duration::from_millis(500),
            tolerance: 0.0,
        }
    }
}

/// One offset tied to one changed observation field
#[derive(Debug, Clone, Serialize)]
pub struct EffectRecord {
    pub offset: u32,
    pub field: String,
    pub baseline: FieldValue,
    pub after: FieldValue,
}

/// Write failure at one offset; the scan continues past it
#[derive(Debug, Clone, Serialize)]
pub struct OffsetError {
    pub offset: u32,
    pub error: String,
}

/// Outcome of one scan over a block range
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub block: u16,
    /// Offsets the scan reached, including ones whose write failed
    pub offsets_tested: u32,
    pub effects: Vec<EffectRecord>,
    pub errors: Vec<OffsetError>,
    /// Offsets whose original bytes could not be written back
    pub restore_failures: Vec<u32>,
    pub cancelled: bool,
}

impl ScanReport {
    fn new(block: u16) -> Self {
        Self {
            block,
            offsets_tested: 0,
            effects: Vec::new(),
            errors: Vec::new(),
            restore_failures: Vec::new(),
            cancelled: false,
        }
    }

    /// Effects grouped by offset: which fields reacted to which byte
    pub fn offset_map(&self) -> BTreeMap<u32, BTreeSet<String>> {
        let mut map: BTreeMap<u32, BTreeSet<String>> = BTreeMap::new();
        for effect in &self.effects {
            map.entry(effect.offset)
                .or_default()
                .insert(effect.field.clone());
        }
        map
    }
}

/// Offset-by-offset effect scanner.
///
/// Session read failures and baseline snapshot failures abort the scan;
/// without a trustworthy original value or baseline there is nothing
/// meaningful to correlate, and continuing risks leaving the device in
/// an unrestored state.
pub struct EffectScanner {
    config: ScanConfig,
    cancel: Arc<AtomicBool>,
}

impl EffectScanner {
    pub fn new(config: ScanConfig) -> Self {
        Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the scan at the next offset boundary
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Scan offsets `start..end` of `block`.
    ///
    /// Every tested offset is written and then restored to its original
    /// bytes before the next offset is touched, so at most `probe_size`
    /// bytes are ever modified at a time.
    pub async fn scan<S, O>(
        &self,
        session: &mut S,
        observer: &O,
        block: u16,
        start: u32,
        end: u32,
    ) -> Result<ScanReport>
    where
        S: DeviceSession + ?Sized,
        O: ObservationSource + ?Sized,
    {
        if start > end {
            return Err(Error::invalid_parameter(
                "range",
                format!("start {} must not be above end {}", start, end),
            ));
        }
        if self.config.probe_size == 0 {
            return Err(Error::invalid_parameter("probe_size", "must be at least 1"));
        }

        let payload = self
            .config
            .pattern
            .generate(usize::from(self.config.probe_size));
        let mut report = ScanReport::new(block);
        info!(
            block,
            start,
            end,
            pattern = %self.config.pattern,
            observer = observer.endpoint(),
            "starting effect scan"
        );

        for offset in start..end {
            if self.cancel.load(Ordering::Relaxed) {
                info!(offset, "scan cancelled");
                report.cancelled = true;
                break;
            }

            let window = MemoryWindow::new(block, offset, self.config.probe_size);
            let original = session.read(&window).await?;
            let baseline = observer.fetch().await?;

            if let Err(e) = session.write(&window, &payload).await {
                warn!(%window, error = %e, "probe write failed, skipping offset");
                report.errors.push(OffsetError {
                    offset,
                    error: e.to_string(),
                });
                report.offsets_tested += 1;
                continue;
            }

            tokio::time::sleep(self.config.settle_delay).await;

            let after = match observer.fetch().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    // the probe payload is still in device memory; put
                    // the original bytes back before giving up
                    if session.write(&window, &original).await.is_err() {
                        report.restore_failures.push(offset);
                        warn!(%window, "could not restore original bytes before abort");
                    }
                    return Err(e);
                }
            };

            if let Err(restore_err) = session.write(&window, &original).await {
                warn!(%window, error = %restore_err, "could not restore original bytes");
                report.restore_failures.push(offset);
            }

            for change in baseline.diff(&after, self.config.tolerance) {
                debug!(offset, field = %change.field, "effect detected");
                report.effects.push(EffectRecord {
                    offset,
                    field: change.field,
                    baseline: change.baseline,
                    after: change.after,
                });
            }
            report.offsets_tested += 1;
        }

        info!(
            offsets_tested = report.offsets_tested,
            effects = report.effects.len(),
            errors = report.errors.len(),
            "effect scan finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use icsprobe_core::{
        ObservationSnapshot, SessionInfo, SessionState, TransportKind,
    };
    use serde_json::json;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;

    fn fast_config() -> ScanConfig {
        ScanConfig {
            settle_delay: Duration::ZERO,
            ..ScanConfig::default()
        }
    }

    /// In-memory device; write failures are injected by 1-based call
    /// number so probe writes and restore writes can fail separately.
    struct MockSession {
        memory: Arc<Mutex<HashMap<(u16, u32), u8>>>,
        connected: bool,
        fail_reads: bool,
        fail_write_calls: HashSet<usize>,
        write_calls: AtomicUsize,
    }

    impl MockSession {
        fn new() -> Self {
            Self {
                memory: Arc::new(Mutex::new(HashMap::new())),
                connected: true,
                fail_reads: false,
                fail_write_calls: HashSet::new(),
                write_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DeviceSession for MockSession {
        async fn connect(&mut self) -> Result<SessionInfo> {
            self.connected = true;
            Ok(SessionInfo {
                transport: TransportKind::S7,
                endpoint: "mock:102".into(),
                identity: "mock".into(),
            })
        }

        async fn read(&mut self, window: &MemoryWindow) -> Result<Vec<u8>> {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            if self.fail_reads {
                return Err(Error::protocol("read refused"));
            }
            window.validate()?;
            let memory = self.memory.lock().unwrap();
            Ok((0..window.length)
                .map(|i| {
                    memory
                        .get(&(window.block, window.offset + u32::from(i)))
                        .copied()
                        .unwrap_or(0)
                })
                .collect())
        }

        async fn write(&mut self, window: &MemoryWindow, data: &[u8]) -> Result<()> {
            if !self.connected {
                return Err(Error::NotConnected);
            }
            window.validate_write(data)?;
            let call = self.write_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_write_calls.contains(&call) {
                return Err(Error::protocol("write refused"));
            }
            let mut memory = self.memory.lock().unwrap();
            for (i, byte) in data.iter().enumerate() {
                memory.insert((window.block, window.offset + i as u32), *byte);
            }
            Ok(())
        }

        async fn disconnect(&mut self) {
            self.connected = false;
        }

        fn state(&self) -> SessionState {
            if self.connected {
                SessionState::Connected
            } else {
                SessionState::Disconnected
            }
        }

        fn transport(&self) -> TransportKind {
            TransportKind::S7
        }

        fn current_endpoint(&self) -> Option<&str> {
            Some("mock:102")
        }
    }

    /// Reports an alarm whenever one watched device byte is nonzero
    struct WatchingObserver {
        memory: Arc<Mutex<HashMap<(u16, u32), u8>>>,
        watch: (u16, u32),
        fail_fetch_calls: HashSet<usize>,
        fetch_calls: AtomicUsize,
    }

    impl WatchingObserver {
        fn new(memory: Arc<Mutex<HashMap<(u16, u32), u8>>>, watch: (u16, u32)) -> Self {
            Self {
                memory,
                watch,
                fail_fetch_calls: HashSet::new(),
                fetch_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ObservationSource for WatchingObserver {
        async fn fetch(&self) -> Result<ObservationSnapshot> {
            let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_fetch_calls.contains(&call) {
                return Err(Error::fetch("status endpoint down"));
            }
            let alarm = {
                let memory = self.memory.lock().unwrap();
                memory.get(&self.watch).copied().unwrap_or(0) != 0
            };
            Ok(
                ObservationSnapshot::from_json(&json!({"alarm": alarm, "pressure": 4.2}))
                    .unwrap(),
            )
        }

        fn endpoint(&self) -> &str {
            "mock://status"
        }
    }

    #[tokio::test]
    async fn test_scan_ties_offset_to_changed_field() {
        let mut session = MockSession::new();
        let observer = WatchingObserver::new(session.memory.clone(), (1, 10));
        let scanner = EffectScanner::new(fast_config());

        let report = scanner
            .scan(&mut session, &observer, 1, 8, 12)
            .await
            .unwrap();

        assert_eq!(report.offsets_tested, 4);
        assert_eq!(report.effects.len(), 1);
        assert_eq!(report.effects[0].offset, 10);
        assert_eq!(report.effects[0].field, "alarm");
        assert_eq!(report.effects[0].baseline, FieldValue::Bool(false));
        assert_eq!(report.effects[0].after, FieldValue::Bool(true));
        assert!(report.errors.is_empty());
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn test_scan_restores_every_offset() {
        let mut session = MockSession::new();
        {
            let mut memory = session.memory.lock().unwrap();
            memory.insert((1, 9), 0x42);
            memory.insert((1, 10), 0x07);
        }
        let observer = WatchingObserver::new(session.memory.clone(), (1, 10));
        let scanner = EffectScanner::new(fast_config());

        scanner
            .scan(&mut session, &observer, 1, 8, 12)
            .await
            .unwrap();

        let memory = session.memory.lock().unwrap();
        assert_eq!(memory.get(&(1, 8)).copied().unwrap_or(0), 0);
        assert_eq!(memory.get(&(1, 9)), Some(&0x42));
        assert_eq!(memory.get(&(1, 10)), Some(&0x07));
        assert_eq!(memory.get(&(1, 11)).copied().unwrap_or(0), 0);
    }

    #[tokio::test]
    async fn test_static_feed_yields_no_effects() {
        let mut session = MockSession::new();
        // watch a byte outside the scanned range
        let observer = WatchingObserver::new(session.memory.clone(), (9, 0));
        let scanner = EffectScanner::new(fast_config());

        let report = scanner
            .scan(&mut session, &observer, 1, 0, 4)
            .await
            .unwrap();

        assert_eq!(report.offsets_tested, 4);
        assert!(report.effects.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_recorded_and_scan_continues() {
        let mut session = MockSession::new();
        // write call 1 is the probe at the first offset
        session.fail_write_calls.insert(1);
        let observer = WatchingObserver::new(session.memory.clone(), (1, 2));
        let scanner = EffectScanner::new(fast_config());

        let report = scanner
            .scan(&mut session, &observer, 1, 0, 4)
            .await
            .unwrap();

        assert_eq!(report.offsets_tested, 4);
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].offset, 0);
        assert_eq!(report.effects.len(), 1);
        assert_eq!(report.effects[0].offset, 2);
    }

    #[tokio::test]
    async fn test_read_failure_aborts_scan() {
        let mut session = MockSession::new();
        session.fail_reads = true;
        let observer = WatchingObserver::new(session.memory.clone(), (1, 0));
        let scanner = EffectScanner::new(fast_config());

        let result = scanner.scan(&mut session, &observer, 1, 0, 4).await;
        assert!(matches!(result, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn test_disconnected_session_aborts_scan() {
        let mut session = MockSession::new();
        session.connected = false;
        let observer = WatchingObserver::new(session.memory.clone(), (1, 0));
        let scanner = EffectScanner::new(fast_config());

        let result = scanner.scan(&mut session, &observer, 1, 0, 4).await;
        assert!(matches!(result, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_restore_failure_is_recorded() {
        let mut session = MockSession::new();
        // write call 2 is the restore at the first offset
        session.fail_write_calls.insert(2);
        let observer = WatchingObserver::new(session.memory.clone(), (9, 0));
        let scanner = EffectScanner::new(fast_config());

        let report = scanner
            .scan(&mut session, &observer, 1, 0, 2)
            .await
            .unwrap();

        assert_eq!(report.restore_failures, vec![0]);
        assert_eq!(report.offsets_tested, 2);
    }

    #[tokio::test]
    async fn test_after_fetch_failure_restores_then_aborts() {
        let mut session = MockSession::new();
        session.memory.lock().unwrap().insert((1, 0), 0x11);
        let mut observer = WatchingObserver::new(session.memory.clone(), (9, 0));
        // fetch 1 is the baseline, fetch 2 the after-snapshot
        observer.fail_fetch_calls.insert(2);
        let scanner = EffectScanner::new(fast_config());

        let result = scanner.scan(&mut session, &observer, 1, 0, 4).await;
        assert!(matches!(result, Err(Error::Fetch(_))));
        assert_eq!(session.memory.lock().unwrap().get(&(1, 0)), Some(&0x11));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let mut session = MockSession::new();
        let observer = WatchingObserver::new(session.memory.clone(), (1, 0));
        let scanner = EffectScanner::new(fast_config());
        scanner.cancel_flag().store(true, Ordering::Relaxed);

        let report = scanner
            .scan(&mut session, &observer, 1, 0, 100)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.offsets_tested, 0);
    }

    #[tokio::test]
    async fn test_empty_range_yields_empty_report() {
        let mut session = MockSession::new();
        let observer = WatchingObserver::new(session.memory.clone(), (1, 0));
        let scanner = EffectScanner::new(fast_config());

        // [5, 5) covers no offsets; no device I/O or fetch happens
        let report = scanner.scan(&mut session, &observer, 1, 5, 5).await.unwrap();
        assert_eq!(report.offsets_tested, 0);
        assert!(report.effects.is_empty());
        assert!(!report.cancelled);
        assert_eq!(observer.fetch_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reversed_range_rejected() {
        let mut session = MockSession::new();
        let observer = WatchingObserver::new(session.memory.clone(), (1, 0));
        let scanner = EffectScanner::new(fast_config());

        let result = scanner.scan(&mut session, &observer, 1, 6, 5).await;
        assert!(matches!(result, Err(Error::InvalidParameter { .. })));
    }

    #[tokio::test]
    async fn test_offset_map_groups_fields() {
        let report = ScanReport {
            block: 1,
            offsets_tested: 3,
            effects: vec![
                EffectRecord {
                    offset: 4,
                    field: "alarm".into(),
                    baseline: FieldValue::Bool(false),
                    after: FieldValue::Bool(true),
                },
                EffectRecord {
                    offset: 4,
                    field: "pressure".into(),
                    baseline: FieldValue::Number(1.0),
                    after: FieldValue::Number(9.0),
                },
                EffectRecord {
                    offset: 7,
                    field: "alarm".into(),
                    baseline: FieldValue::Bool(false),
                    after: FieldValue::Bool(true),
                },
            ],
            errors: Vec::new(),
            restore_failures: Vec::new(),
            cancelled: false,
        };

        let map = report.offset_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map[&4].len(), 2);
        assert!(map[&7].contains("alarm"));
    }
}
