//! Upload Pipeline — slotted bounded-concurrency queue with retry/backoff.
//!
//! Two identical instances run side by side (clear and encrypted), each
//! with its own FIFO queue, five worker slots managed as a free-list,
//! per-slot progress, and counters that converge on
//! `attempted == succeeded + failed` whenever the pipeline is quiet.
//!
//! The dispatch loop is non-reentrant: a processor flag stops nested
//! invocations, and every completed job releases its slot and re-enters
//! dispatch. The upload payload is prepared exactly once per job, before
//! the retry loop, so retries resubmit identical bytes — for the encrypted
//! pipeline this pins the IV, minute key, and data hash across attempts.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use super::arweave::ArchiveClient;
use super::uploaders::BatchUploader;
use crate::stats::{PipelineKind, StatsRegister};
use crate::types::Batch;

/// Worker slots per pipeline.
const MAX_CONCURRENT: usize = 5;

/// Attempts per job, counting the first.
const MAX_RETRIES: u32 = 5;

/// Backoff ceiling.
const BACKOFF_CAP_MS: u64 = 16_000;

/// `min(1000 · 2^(attempt-1), 16000)` milliseconds.
fn backoff(attempt: u32) -> Duration {
    let exp = 1_000u64.saturating_mul(1u64 << (attempt.saturating_sub(1)).min(10));
    Duration::from_millis(exp.min(BACKOFF_CAP_MS))
}

/// Upload job errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Will not heal on retry — bad tags, unencodable batch.
    #[error("fatal: {0}")]
    Fatal(String),
    /// Transient network or gateway trouble.
    #[error("retryable: {0}")]
    Retryable(String),
}

impl UploadError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl From<super::arweave::ArchiveError> for UploadError {
    fn from(e: super::arweave::ArchiveError) -> Self {
        if e.is_fatal() {
            Self::Fatal(e.to_string())
        } else {
            Self::Retryable(e.to_string())
        }
    }
}

impl From<crate::encode::EncodeError> for UploadError {
    fn from(e: crate::encode::EncodeError) -> Self {
        Self::Fatal(e.to_string())
    }
}

impl From<crate::crypto::CryptoError> for UploadError {
    fn from(e: crate::crypto::CryptoError) -> Self {
        Self::Fatal(e.to_string())
    }
}

/// Lifecycle of a worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Uploading,
    Retrying,
    Completed,
    Failed,
}

/// Progress of one worker slot.
#[derive(Debug, Clone)]
pub struct SlotProgress {
    pub started: Instant,
    pub percent: u8,
    pub status: SlotStatus,
}

/// One bounded-concurrency upload pipeline.
pub struct UploadPipeline<U: BatchUploader> {
    kind: PipelineKind,
    archive: Arc<ArchiveClient>,
    uploader: U,
    stats: Arc<StatsRegister>,
    queue: Mutex<VecDeque<Batch>>,
    free_slots: Mutex<Vec<u8>>,
    progress: Mutex<HashMap<u8, SlotProgress>>,
    dispatching: AtomicBool,
    active_uploads: AtomicUsize,
}

impl<U: BatchUploader> UploadPipeline<U> {
    pub fn new(
        kind: PipelineKind,
        archive: Arc<ArchiveClient>,
        uploader: U,
        stats: Arc<StatsRegister>,
    ) -> Arc<Self> {
        Arc::new(Self {
            kind,
            archive,
            uploader,
            stats,
            queue: Mutex::new(VecDeque::new()),
            free_slots: Mutex::new((1..=MAX_CONCURRENT as u8).rev().collect()),
            progress: Mutex::new(HashMap::new()),
            dispatching: AtomicBool::new(false),
            active_uploads: AtomicUsize::new(0),
        })
    }

    /// Queue a batch and kick the dispatch loop.
    pub fn enqueue(self: &Arc<Self>, batch: Batch) {
        {
            let mut queue = lock(&self.queue);
            queue.push_back(batch);
        }
        self.dispatch();
    }

    /// Drain the queue into free slots. Safe to call from anywhere; nested
    /// calls return immediately.
    pub fn dispatch(self: &Arc<Self>) {
        loop {
            if self.dispatching.swap(true, Ordering::SeqCst) {
                return;
            }

            loop {
                let Some(slot) = lock(&self.free_slots).pop() else {
                    break;
                };
                let Some(batch) = lock(&self.queue).pop_front() else {
                    lock(&self.free_slots).push(slot);
                    break;
                };

                self.active_uploads.fetch_add(1, Ordering::SeqCst);
                self.set_progress(slot, SlotStatus::Uploading, 0);

                let this = Arc::clone(self);
                tokio::spawn(async move {
                    this.run_job(slot, batch).await;
                    lock(&this.free_slots).push(slot);
                    this.active_uploads.fetch_sub(1, Ordering::SeqCst);
                    this.stats.schedule_persist();
                    this.dispatch();
                });
            }

            self.dispatching.store(false, Ordering::SeqCst);

            // A job that completed while we were draining saw the processor
            // flag and bailed; pick its work up instead of stalling it until
            // the next enqueue.
            let work_waiting =
                lock(&self.queue).front().is_some() && !lock(&self.free_slots).is_empty();
            if !work_waiting {
                return;
            }
        }
    }

    /// Execute one job with retry/backoff. Counter contract: `attempted`
    /// bumps exactly once per job; every quiet moment satisfies
    /// `attempted == succeeded + failed`.
    async fn run_job(&self, slot: u8, batch: Batch) {
        self.stats.record_attempt(self.kind);

        let prepared = match self.uploader.prepare(&batch).await {
            Ok(prepared) => prepared,
            Err(e) => {
                warn!(
                    pipeline = self.kind.as_str(),
                    batch_id = %batch.batch_id,
                    error = %e,
                    "Batch preparation failed — dropping"
                );
                self.stats.record_failure(self.kind);
                self.set_progress(slot, SlotStatus::Failed, 100);
                return;
            }
        };
        self.set_progress(slot, SlotStatus::Uploading, 25);

        let mut attempt: u32 = 1;
        loop {
            match self.archive.upload(&prepared.bytes, &prepared.tags).await {
                Ok(tx_id) => {
                    let now_ms = chrono::Utc::now().timestamp_millis();
                    self.stats.record_success(self.kind, now_ms);
                    self.set_progress(slot, SlotStatus::Completed, 100);
                    info!(
                        pipeline = self.kind.as_str(),
                        batch_id = %batch.batch_id,
                        tx_id = %tx_id,
                        aircraft = batch.items.len(),
                        "Batch archived"
                    );
                    self.uploader.on_success(&batch, &prepared, &tx_id).await;
                    return;
                }
                Err(e) if e.is_fatal() => {
                    warn!(
                        pipeline = self.kind.as_str(),
                        batch_id = %batch.batch_id,
                        error = %e,
                        "Fatal upload error — dropping batch"
                    );
                    self.stats.record_failure(self.kind);
                    self.set_progress(slot, SlotStatus::Failed, 100);
                    return;
                }
                Err(e) => {
                    if attempt < MAX_RETRIES {
                        let wait = backoff(attempt);
                        self.stats.record_retry(self.kind);
                        self.set_progress(slot, SlotStatus::Retrying, 25);
                        debug!(
                            pipeline = self.kind.as_str(),
                            batch_id = %batch.batch_id,
                            attempt = attempt,
                            backoff_ms = wait.as_millis() as u64,
                            error = %e,
                            "Upload failed — backing off"
                        );
                        tokio::time::sleep(wait).await;
                        attempt += 1;
                    } else {
                        warn!(
                            pipeline = self.kind.as_str(),
                            batch_id = %batch.batch_id,
                            attempts = attempt,
                            error = %e,
                            "Upload attempts exhausted — dropping batch"
                        );
                        self.stats.record_failure(self.kind);
                        self.set_progress(slot, SlotStatus::Failed, 100);
                        return;
                    }
                }
            }
        }
    }

    fn set_progress(&self, slot: u8, status: SlotStatus, percent: u8) {
        let mut progress = lock(&self.progress);
        // A fresh claim restarts the slot clock; later calls only advance it.
        if status == SlotStatus::Uploading && percent == 0 {
            progress.insert(
                slot,
                SlotProgress {
                    started: Instant::now(),
                    percent,
                    status,
                },
            );
            return;
        }
        if let Some(entry) = progress.get_mut(&slot) {
            entry.status = status;
            entry.percent = percent;
        }
    }

    /// Batches waiting for a slot.
    pub fn queue_len(&self) -> usize {
        lock(&self.queue).len()
    }

    /// Jobs currently holding a slot.
    pub fn active_uploads(&self) -> usize {
        self.active_uploads.load(Ordering::SeqCst)
    }

    /// Queue empty and every slot free.
    pub fn is_idle(&self) -> bool {
        self.queue_len() == 0 && self.active_uploads() == 0
    }

    /// Current slot progress, for the stats view.
    pub fn progress_snapshot(&self) -> Vec<(u8, SlotProgress)> {
        let progress = lock(&self.progress);
        let mut entries: Vec<(u8, SlotProgress)> =
            progress.iter().map(|(k, v)| (*k, v.clone())).collect();
        entries.sort_by_key(|(slot, _)| *slot);
        entries
    }

    pub fn kind(&self) -> PipelineKind {
        self.kind
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_sequence() {
        assert_eq!(backoff(1), Duration::from_millis(1_000));
        assert_eq!(backoff(2), Duration::from_millis(2_000));
        assert_eq!(backoff(3), Duration::from_millis(4_000));
        assert_eq!(backoff(4), Duration::from_millis(8_000));
        assert_eq!(backoff(5), Duration::from_millis(16_000));
        assert_eq!(backoff(6), Duration::from_millis(16_000));
        assert_eq!(backoff(12), Duration::from_millis(16_000));
    }

    #[test]
    fn test_upload_error_classification() {
        assert!(UploadError::Fatal("bad tag".into()).is_fatal());
        assert!(!UploadError::Retryable("503".into()).is_fatal());
    }
}
