//! Stats Register — the single owner of all live counters.
//!
//! Counters are plain atomics bumped from the orchestrator and the pipeline
//! completion paths. Throughput is measured over a 60-second sliding window
//! of twelve 5-second buckets; a 30-point history (one sample per ≥3 s)
//! feeds the dashboard sparkline. Persistence is debounced: mutations mark
//! the register dirty, and a background task batches everything into one
//! UPDATE of the singleton row at most every five seconds.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::store::StatsStore;
use crate::types::StatsSnapshot;

/// Bucket width of the TPM window.
const TPM_BUCKET_MS: i64 = 5_000;

/// Number of buckets (60 s window).
const TPM_BUCKETS: usize = 12;

/// Minimum spacing between history samples.
const HISTORY_SAMPLE_MS: i64 = 3_000;

/// History ring size.
const HISTORY_POINTS: usize = 30;

/// Debounce interval for counter persistence.
const PERSIST_DEBOUNCE: Duration = Duration::from_secs(5);

/// Which upload pipeline a counter mutation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineKind {
    Clear,
    Encrypted,
}

impl PipelineKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::Encrypted => "encrypted",
        }
    }
}

/// One point of the TPM history.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TpmSample {
    pub at_ms: i64,
    pub tpm: u64,
}

/// Sliding 60-second throughput window.
struct TpmWindow {
    buckets: [u64; TPM_BUCKETS],
    /// Epoch (now_ms / bucket width) of the bucket currently receiving hits
    current_epoch: i64,
}

impl TpmWindow {
    fn new(now_ms: i64) -> Self {
        Self {
            buckets: [0; TPM_BUCKETS],
            current_epoch: now_ms.div_euclid(TPM_BUCKET_MS),
        }
    }

    /// Rotate expired buckets, clearing each one as it becomes current.
    fn rotate(&mut self, now_ms: i64) {
        let epoch = now_ms.div_euclid(TPM_BUCKET_MS);
        let advanced = (epoch - self.current_epoch).clamp(0, TPM_BUCKETS as i64);
        for step in 1..=advanced {
            let idx = (self.current_epoch + step).rem_euclid(TPM_BUCKETS as i64) as usize;
            self.buckets[idx] = 0;
        }
        if epoch > self.current_epoch {
            self.current_epoch = epoch;
        }
    }

    fn bump(&mut self, now_ms: i64) {
        self.rotate(now_ms);
        let idx = self.current_epoch.rem_euclid(TPM_BUCKETS as i64) as usize;
        self.buckets[idx] += 1;
    }

    fn sum(&mut self, now_ms: i64) -> u64 {
        self.rotate(now_ms);
        self.buckets.iter().sum()
    }
}

/// The counter register.
pub struct StatsRegister {
    total_polls: AtomicU64,
    clear_attempted: AtomicU64,
    clear_succeeded: AtomicU64,
    clear_failed: AtomicU64,
    clear_retries: AtomicU64,
    enc_attempted: AtomicU64,
    enc_succeeded: AtomicU64,
    enc_failed: AtomicU64,
    enc_retries: AtomicU64,
    aircraft_new: AtomicU64,
    aircraft_updated: AtomicU64,
    aircraft_reappeared: AtomicU64,
    peak_tpm: AtomicU64,

    /// Minute keys counted optimistically on successful encrypted uploads
    keys_saved: AtomicU64,
    /// Share-service POST failures (live observable, never persisted)
    keyshare_errors: AtomicU64,

    system_start_ms: i64,
    tpm: Mutex<TpmWindow>,
    history: Mutex<VecDeque<TpmSample>>,
    last_history_ms: AtomicI64,

    dirty: AtomicBool,
    persist_notify: Notify,
}

impl StatsRegister {
    pub fn new(system_start_ms: i64) -> Self {
        Self {
            total_polls: AtomicU64::new(0),
            clear_attempted: AtomicU64::new(0),
            clear_succeeded: AtomicU64::new(0),
            clear_failed: AtomicU64::new(0),
            clear_retries: AtomicU64::new(0),
            enc_attempted: AtomicU64::new(0),
            enc_succeeded: AtomicU64::new(0),
            enc_failed: AtomicU64::new(0),
            enc_retries: AtomicU64::new(0),
            aircraft_new: AtomicU64::new(0),
            aircraft_updated: AtomicU64::new(0),
            aircraft_reappeared: AtomicU64::new(0),
            peak_tpm: AtomicU64::new(0),
            keys_saved: AtomicU64::new(0),
            keyshare_errors: AtomicU64::new(0),
            system_start_ms,
            tpm: Mutex::new(TpmWindow::new(system_start_ms)),
            history: Mutex::new(VecDeque::with_capacity(HISTORY_POINTS)),
            last_history_ms: AtomicI64::new(i64::MIN),
            dirty: AtomicBool::new(false),
            persist_notify: Notify::new(),
        }
    }

    /// Overwrite every persisted counter from a snapshot (restore path).
    /// `system_start_ms` is deliberately untouched.
    pub fn load_snapshot(&self, snapshot: &StatsSnapshot) {
        self.total_polls.store(snapshot.total_polls, Ordering::Relaxed);
        self.clear_attempted.store(snapshot.clear_attempted, Ordering::Relaxed);
        self.clear_succeeded.store(snapshot.clear_succeeded, Ordering::Relaxed);
        self.clear_failed.store(snapshot.clear_failed, Ordering::Relaxed);
        self.clear_retries.store(snapshot.clear_retries, Ordering::Relaxed);
        self.enc_attempted.store(snapshot.enc_attempted, Ordering::Relaxed);
        self.enc_succeeded.store(snapshot.enc_succeeded, Ordering::Relaxed);
        self.enc_failed.store(snapshot.enc_failed, Ordering::Relaxed);
        self.enc_retries.store(snapshot.enc_retries, Ordering::Relaxed);
        self.aircraft_new.store(snapshot.aircraft_new, Ordering::Relaxed);
        self.aircraft_updated.store(snapshot.aircraft_updated, Ordering::Relaxed);
        self.aircraft_reappeared.store(snapshot.aircraft_reappeared, Ordering::Relaxed);
        self.peak_tpm.store(snapshot.peak_tpm, Ordering::Relaxed);
    }

    /// Freeze the persisted counter set.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_polls: self.total_polls.load(Ordering::Relaxed),
            clear_attempted: self.clear_attempted.load(Ordering::Relaxed),
            clear_succeeded: self.clear_succeeded.load(Ordering::Relaxed),
            clear_failed: self.clear_failed.load(Ordering::Relaxed),
            clear_retries: self.clear_retries.load(Ordering::Relaxed),
            enc_attempted: self.enc_attempted.load(Ordering::Relaxed),
            enc_succeeded: self.enc_succeeded.load(Ordering::Relaxed),
            enc_failed: self.enc_failed.load(Ordering::Relaxed),
            enc_retries: self.enc_retries.load(Ordering::Relaxed),
            aircraft_new: self.aircraft_new.load(Ordering::Relaxed),
            aircraft_updated: self.aircraft_updated.load(Ordering::Relaxed),
            aircraft_reappeared: self.aircraft_reappeared.load(Ordering::Relaxed),
            peak_tpm: self.peak_tpm.load(Ordering::Relaxed),
        }
    }

    // ------------------------------------------------------------------
    // Counter mutations
    // ------------------------------------------------------------------

    pub fn record_poll(&self) {
        self.total_polls.fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn record_aircraft(&self, new: u64, updated: u64, reappeared: u64) {
        self.aircraft_new.fetch_add(new, Ordering::Relaxed);
        self.aircraft_updated.fetch_add(updated, Ordering::Relaxed);
        self.aircraft_reappeared.fetch_add(reappeared, Ordering::Relaxed);
        if new + updated + reappeared > 0 {
            self.mark_dirty();
        }
    }

    /// First attempt of an upload job.
    pub fn record_attempt(&self, kind: PipelineKind) {
        match kind {
            PipelineKind::Clear => &self.clear_attempted,
            PipelineKind::Encrypted => &self.enc_attempted,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    /// Successful upload: counter plus a TPM window hit.
    pub fn record_success(&self, kind: PipelineKind, now_ms: i64) {
        match kind {
            PipelineKind::Clear => &self.clear_succeeded,
            PipelineKind::Encrypted => &self.enc_succeeded,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.record_tpm(now_ms);
        self.mark_dirty();
    }

    pub fn record_failure(&self, kind: PipelineKind) {
        match kind {
            PipelineKind::Clear => &self.clear_failed,
            PipelineKind::Encrypted => &self.enc_failed,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn record_retry(&self, kind: PipelineKind) {
        match kind {
            PipelineKind::Clear => &self.clear_retries,
            PipelineKind::Encrypted => &self.enc_retries,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.mark_dirty();
    }

    pub fn record_key_saved(&self) {
        self.keys_saved.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_keyshare_error(&self) {
        self.keyshare_errors.fetch_add(1, Ordering::Relaxed);
    }

    // ------------------------------------------------------------------
    // Throughput window
    // ------------------------------------------------------------------

    /// Register one transaction in the sliding window, refresh `peak_tpm`,
    /// and append a history point when the sampling interval has elapsed.
    pub fn record_tpm(&self, now_ms: i64) {
        let current = {
            let mut window = match self.tpm.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            window.bump(now_ms);
            window.buckets.iter().sum::<u64>()
        };

        self.peak_tpm.fetch_max(current, Ordering::Relaxed);

        let last = self.last_history_ms.load(Ordering::Relaxed);
        if now_ms.saturating_sub(last) >= HISTORY_SAMPLE_MS
            && self
                .last_history_ms
                .compare_exchange(last, now_ms, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            let mut history = match self.history.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if history.len() >= HISTORY_POINTS {
                history.pop_front();
            }
            history.push_back(TpmSample {
                at_ms: now_ms,
                tpm: current,
            });
        }
    }

    /// Transactions in the last 60 seconds.
    pub fn current_tpm(&self, now_ms: i64) -> u64 {
        let mut window = match self.tpm.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        window.sum(now_ms)
    }

    pub fn tpm_history(&self) -> Vec<TpmSample> {
        let history = match self.history.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        history.iter().copied().collect()
    }

    pub fn peak_tpm(&self) -> u64 {
        self.peak_tpm.load(Ordering::Relaxed)
    }

    pub fn keys_saved(&self) -> u64 {
        self.keys_saved.load(Ordering::Relaxed)
    }

    pub fn keyshare_errors(&self) -> u64 {
        self.keyshare_errors.load(Ordering::Relaxed)
    }

    pub fn system_start_ms(&self) -> i64 {
        self.system_start_ms
    }

    // ------------------------------------------------------------------
    // Debounced persistence
    // ------------------------------------------------------------------

    /// Mark the register dirty and nudge the persister task.
    pub fn schedule_persist(&self) {
        self.mark_dirty();
    }

    fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Relaxed);
        self.persist_notify.notify_one();
    }

    /// Clear and report the dirty flag.
    fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::Relaxed)
    }
}

/// Background task: waits for a dirty mark, debounces further writes for
/// five seconds, then flushes the whole counter set in one UPDATE.
pub async fn run_stats_persister(
    register: std::sync::Arc<StatsRegister>,
    store: std::sync::Arc<StatsStore>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                // Final flush so a clean shutdown loses nothing.
                if register.take_dirty() {
                    flush(&register, &store).await;
                }
                return;
            }
            () = register.persist_notify.notified() => {}
        }

        tokio::select! {
            () = cancel.cancelled() => {
                if register.take_dirty() {
                    flush(&register, &store).await;
                }
                return;
            }
            () = tokio::time::sleep(PERSIST_DEBOUNCE) => {}
        }

        if register.take_dirty() {
            flush(&register, &store).await;
        }
    }
}

async fn flush(register: &StatsRegister, store: &StatsStore) {
    let snapshot = register.snapshot();
    let now_ms = chrono::Utc::now().timestamp_millis();
    match store.save(&snapshot, now_ms).await {
        Ok(()) => debug!("Persisted system stats"),
        Err(e) => warn!(error = %e, "Failed to persist system stats"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_converge() {
        let register = StatsRegister::new(0);
        register.record_attempt(PipelineKind::Clear);
        register.record_success(PipelineKind::Clear, 1_000);
        register.record_attempt(PipelineKind::Clear);
        register.record_retry(PipelineKind::Clear);
        register.record_failure(PipelineKind::Clear);

        let snap = register.snapshot();
        assert_eq!(snap.clear_attempted, 2);
        assert_eq!(snap.clear_succeeded + snap.clear_failed, 2);
        assert_eq!(snap.clear_retries, 1);
    }

    #[test]
    fn test_tpm_window_counts_last_minute() {
        let register = StatsRegister::new(0);
        for i in 0..5 {
            register.record_tpm(i * 1_000);
        }
        assert_eq!(register.current_tpm(5_000), 5);

        // 61 seconds later, every bucket has expired.
        assert_eq!(register.current_tpm(66_000), 0);
    }

    #[test]
    fn test_tpm_expiry_is_gradual() {
        let register = StatsRegister::new(0);
        register.record_tpm(1_000); // bucket 0
        register.record_tpm(31_000); // bucket 6

        assert_eq!(register.current_tpm(31_000), 2);
        // 62 s: the first hit has left the window, the second remains.
        assert_eq!(register.current_tpm(62_000), 1);
    }

    #[test]
    fn test_peak_tpm_tracks_maximum() {
        let register = StatsRegister::new(0);
        register.record_tpm(0);
        register.record_tpm(100);
        register.record_tpm(200);
        assert_eq!(register.peak_tpm(), 3);

        // Window expires, peak is sticky.
        assert_eq!(register.current_tpm(120_000), 0);
        assert_eq!(register.peak_tpm(), 3);
    }

    #[test]
    fn test_history_sampling_is_spaced() {
        let register = StatsRegister::new(0);
        register.record_tpm(0);
        register.record_tpm(1_000); // within 3 s of the first sample
        register.record_tpm(4_000); // past the spacing

        let history = register.tpm_history();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].at_ms, 0);
        assert_eq!(history[1].at_ms, 4_000);
    }

    #[test]
    fn test_load_snapshot_roundtrip() {
        let register = StatsRegister::new(42);
        let snapshot = StatsSnapshot {
            total_polls: 10,
            clear_attempted: 4,
            clear_succeeded: 3,
            clear_failed: 1,
            clear_retries: 2,
            enc_attempted: 4,
            enc_succeeded: 4,
            enc_failed: 0,
            enc_retries: 0,
            aircraft_new: 7,
            aircraft_updated: 5,
            aircraft_reappeared: 1,
            peak_tpm: 9,
        };
        register.load_snapshot(&snapshot);
        assert_eq!(register.snapshot(), snapshot);
        assert_eq!(register.system_start_ms(), 42);
    }
}
