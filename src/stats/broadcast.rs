//! Live stats view — the payload pushed to dashboard subscribers.
//!
//! Building a view touches every counter, both pipelines, and the track
//! count, so the assembled payload is cached for up to 500 ms and shared
//! across bursts of subscribers via an atomic swap.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::Serialize;

use super::register::{StatsRegister, TpmSample};
use crate::store::TrackStore;
use crate::types::StatsSnapshot;
use crate::upload::{ClearUploader, EncryptedUploader, UploadPipeline};

/// Maximum age of a cached view.
const VIEW_CACHE_MS: i64 = 500;

/// One pipeline's live numbers.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PipelineView {
    pub active_uploads: usize,
    pub queued: usize,
}

/// The broadcast payload.
#[derive(Debug, Clone, Serialize)]
pub struct StatsView {
    pub counters: StatsSnapshot,
    pub current_tpm: u64,
    pub peak_tpm: u64,
    pub tpm_history: Vec<TpmSample>,
    pub keys_saved: u64,
    pub keyshare_errors: u64,
    pub clear_pipeline: PipelineView,
    pub encrypted_pipeline: PipelineView,
    pub total_tracks: i64,
    pub system_start_time: i64,
    pub generated_at: i64,
}

struct CachedView {
    generated_at: i64,
    view: StatsView,
}

/// Assembles and caches the live stats view.
pub struct StatsBroadcaster {
    register: Arc<StatsRegister>,
    tracks: Arc<TrackStore>,
    clear_pipeline: Arc<UploadPipeline<ClearUploader>>,
    encrypted_pipeline: Arc<UploadPipeline<EncryptedUploader>>,
    cached: ArcSwapOption<CachedView>,
}

impl StatsBroadcaster {
    pub fn new(
        register: Arc<StatsRegister>,
        tracks: Arc<TrackStore>,
        clear_pipeline: Arc<UploadPipeline<ClearUploader>>,
        encrypted_pipeline: Arc<UploadPipeline<EncryptedUploader>>,
    ) -> Self {
        Self {
            register,
            tracks,
            clear_pipeline,
            encrypted_pipeline,
            cached: ArcSwapOption::const_empty(),
        }
    }

    /// Current stats view, rebuilt at most every 500 ms.
    pub async fn get_stats(&self) -> StatsView {
        let now_ms = chrono::Utc::now().timestamp_millis();

        if let Some(cached) = self.cached.load_full() {
            if now_ms - cached.generated_at < VIEW_CACHE_MS {
                return cached.view.clone();
            }
        }

        let view = self.build_view(now_ms).await;
        self.cached.store(Some(Arc::new(CachedView {
            generated_at: now_ms,
            view: view.clone(),
        })));
        view
    }

    async fn build_view(&self, now_ms: i64) -> StatsView {
        let total_tracks = self.tracks.total_tracks().await.unwrap_or(0);

        StatsView {
            counters: self.register.snapshot(),
            current_tpm: self.register.current_tpm(now_ms),
            peak_tpm: self.register.peak_tpm(),
            tpm_history: self.register.tpm_history(),
            keys_saved: self.register.keys_saved(),
            keyshare_errors: self.register.keyshare_errors(),
            clear_pipeline: PipelineView {
                active_uploads: self.clear_pipeline.active_uploads(),
                queued: self.clear_pipeline.queue_len(),
            },
            encrypted_pipeline: PipelineView {
                active_uploads: self.encrypted_pipeline.active_uploads(),
                queued: self.encrypted_pipeline.queue_len(),
            },
            total_tracks,
            system_start_time: self.register.system_start_ms(),
            generated_at: now_ms,
        }
    }
}
