//! Orchestrator — the single task that owns the poll loop.
//!
//! Every 500 ms: fetch each enabled antenna feed, classify the observations
//! against the state cache, buffer the change events, then flush the
//! batcher and hand every batch to both pipelines. All state-cache
//! mutations happen here, which is what lets the cache go lockless.
//!
//! The loop never stops for a bad tick — fetch errors skip the antenna,
//! batch failures stay inside the pipelines. Cancellation halts polling,
//! lets in-flight uploads finish, and drops whatever is still queued.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::batcher::{Batcher, PackageUuidRegistry};
use super::classifier::classify;
use super::state_cache::StateCache;
use crate::acquisition::FeedClient;
use crate::stats::StatsRegister;
use crate::store::TrackStore;
use crate::types::ChangeKind;
use crate::upload::{ClearUploader, EncryptedUploader, UploadPipeline};

/// Poll cadence; a cycle running longer than this logs a warning.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Owns the poll loop and all tracker state.
pub struct Orchestrator {
    feeds: Vec<FeedClient>,
    cache: StateCache,
    batcher: Batcher,
    registry: Arc<PackageUuidRegistry>,
    clear_pipeline: Arc<UploadPipeline<ClearUploader>>,
    encrypted_pipeline: Arc<UploadPipeline<EncryptedUploader>>,
    stats: Arc<StatsRegister>,
    tracks: Arc<TrackStore>,
    cancel: CancellationToken,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        feeds: Vec<FeedClient>,
        registry: Arc<PackageUuidRegistry>,
        clear_pipeline: Arc<UploadPipeline<ClearUploader>>,
        encrypted_pipeline: Arc<UploadPipeline<EncryptedUploader>>,
        stats: Arc<StatsRegister>,
        tracks: Arc<TrackStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            feeds,
            cache: StateCache::new(),
            batcher: Batcher::new(),
            registry,
            clear_pipeline,
            encrypted_pipeline,
            stats,
            tracks,
            cancel,
        }
    }

    /// Run until cancelled.
    pub async fn run(mut self) {
        info!(
            antennas = self.feeds.len(),
            interval_ms = POLL_INTERVAL.as_millis() as u64,
            "Tracker started"
        );

        let mut interval = tokio::time::interval(POLL_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    info!("Tracker shutdown signal received");
                    break;
                }
                _ = interval.tick() => {}
            }

            let started = Instant::now();
            self.tick().await;

            let elapsed = started.elapsed();
            if elapsed > POLL_INTERVAL {
                warn!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Poll cycle overran its interval"
                );
            }
        }

        info!(
            cached_aircraft = self.cache.len(),
            queued_clear = self.clear_pipeline.queue_len(),
            queued_encrypted = self.encrypted_pipeline.queue_len(),
            "Tracker stopped — queued batches dropped, in-flight uploads finishing"
        );
    }

    /// One poll cycle: fetch → classify → batch → flush to both pipelines.
    async fn tick(&mut self) {
        let now_ms = chrono::Utc::now().timestamp_millis();

        for feed in &self.feeds {
            let snapshot = match feed.fetch().await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!(antenna = %feed.antenna_id(), error = %e, "Feed poll failed — skipping tick");
                    continue;
                }
            };
            self.stats.record_poll();

            // Cache misses may be returning aircraft whose entry was already
            // evicted; one bulk status lookup tells them apart from new ones.
            // A failed lookup degrades those to NEW rather than stalling the
            // tick.
            let unknown: Vec<String> = snapshot
                .aircraft
                .iter()
                .filter(|o| !o.hex.is_empty() && self.cache.get(&o.hex).is_none())
                .map(|o| o.hex.clone())
                .collect::<HashSet<String>>()
                .into_iter()
                .collect();
            let returning = if unknown.is_empty() {
                HashSet::new()
            } else {
                match self.tracks.out_of_range_hexes(&unknown).await {
                    Ok(set) => set,
                    Err(e) => {
                        warn!(error = %e, "Track status lookup failed — returning aircraft will classify as new");
                        HashSet::new()
                    }
                }
            };

            let outcome = classify(
                &snapshot,
                &mut self.cache,
                feed.antenna_id(),
                now_ms,
                &returning,
            );
            self.stats.record_aircraft(
                outcome.count_of(ChangeKind::New),
                outcome.count_of(ChangeKind::Updated),
                outcome.count_of(ChangeKind::Reappeared),
            );

            if !outcome.out_of_range.is_empty() {
                debug!(
                    antenna = %feed.antenna_id(),
                    count = outcome.out_of_range.len(),
                    "Aircraft out of range"
                );
                let tracks = Arc::clone(&self.tracks);
                let hexes = outcome.out_of_range;
                tokio::spawn(async move {
                    if let Err(e) = tracks.bulk_mark_out_of_range(&hexes, now_ms).await {
                        warn!(error = %e, "Failed to flip tracks out of range");
                    }
                });
            }

            for event in outcome.events {
                self.batcher.push(event);
            }
        }

        // Flush: each batch goes to both pipelines, which race independently.
        for batch in self.batcher.drain(&self.registry) {
            debug!(
                batch_id = %batch.batch_id,
                aircraft = batch.items.len(),
                "Dispatching batch to both pipelines"
            );
            self.clear_pipeline.enqueue(batch.clone());
            self.encrypted_pipeline.enqueue(batch);
        }
    }
}
