//! The two batch uploaders — clear Parquet and encrypted package.
//!
//! `prepare()` runs once per job, before the pipeline's retry loop, and
//! yields the exact bytes and tags every attempt resubmits. `on_success()`
//! runs after the success counter is bumped; its database writes and
//! key-share shipment are fire-and-forget, so a slow or failing peripheral
//! never blocks or un-counts an upload.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::tags::{clear_batch_tags, encrypted_batch_tags, Tag};
use crate::crypto::{Encryptor, KeyShareClient};
use crate::encode::encode_batch;
use crate::stats::StatsRegister;
use crate::store::{
    ArchiveRecordStore, NewArchiveRecord, NewEncryptedArchiveRecord, TrackStore, TrackUpsert,
};
use crate::tracker::PackageUuidRegistry;
use crate::types::Batch;
use crate::upload::pipeline::UploadError;

/// A payload ready for (repeated) submission.
pub struct PreparedUpload {
    pub bytes: Vec<u8>,
    pub tags: Vec<Tag>,
    /// Package UUID actually carried by the tags (the encrypted side may
    /// have fallen back to a fresh one)
    pub package_uuid: String,
    /// Minute-key UUID stamped on the tags
    pub key_uuid: String,
    /// SHA-256 of the plaintext, encrypted side only
    pub data_hash: Option<String>,
    pub file_size_kb: f64,
    /// The raw minute key, shipped to the share service on success
    pub raw_key: Option<[u8; 32]>,
}

/// Seam between the pipeline and the two upload flavours.
#[async_trait]
pub trait BatchUploader: Send + Sync + 'static {
    /// Build the submission payload. Runs once per job; failures are fatal
    /// for the batch.
    async fn prepare(&self, batch: &Batch) -> Result<PreparedUpload, UploadError>;

    /// Post-success peripherals (database rows, key escrow). Must not fail
    /// the upload — errors stay inside.
    async fn on_success(&self, batch: &Batch, prepared: &PreparedUpload, tx_id: &str);
}

// ============================================================================
// Clear pipeline
// ============================================================================

/// Encodes a batch to Parquet and archives it in the clear.
pub struct ClearUploader {
    encryptor: Arc<Encryptor>,
    records: Arc<ArchiveRecordStore>,
    tracks: Arc<TrackStore>,
}

impl ClearUploader {
    pub fn new(
        encryptor: Arc<Encryptor>,
        records: Arc<ArchiveRecordStore>,
        tracks: Arc<TrackStore>,
    ) -> Self {
        Self {
            encryptor,
            records,
            tracks,
        }
    }
}

#[async_trait]
impl BatchUploader for ClearUploader {
    async fn prepare(&self, batch: &Batch) -> Result<PreparedUpload, UploadError> {
        let encoded = encode_batch(batch)?;
        let now_ms = chrono::Utc::now().timestamp_millis();
        let key_uuid = self.encryptor.minute_key(now_ms)?.key_uuid;
        let tags = clear_batch_tags(batch, &encoded, &key_uuid, now_ms);

        Ok(PreparedUpload {
            file_size_kb: encoded.file_size_kb,
            bytes: encoded.bytes,
            tags,
            package_uuid: batch.package_uuid.clone(),
            key_uuid,
            data_hash: None,
            raw_key: None,
        })
    }

    async fn on_success(&self, batch: &Batch, prepared: &PreparedUpload, tx_id: &str) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = NewArchiveRecord {
            tx_id: tx_id.to_string(),
            source: batch.source.clone(),
            timestamp: batch.snapshot_seconds * 1000,
            aircraft_count: batch.items.len() as i64,
            file_size_kb: prepared.file_size_kb,
            format: "Parquet".to_string(),
            icao_addresses: batch.icao_addresses(),
            package_uuid: prepared.package_uuid.clone(),
        };
        let upserts: Vec<TrackUpsert> = batch
            .items
            .iter()
            .map(|item| TrackUpsert::from_item(item, tx_id))
            .collect();

        let records = Arc::clone(&self.records);
        let tracks = Arc::clone(&self.tracks);
        tokio::spawn(async move {
            if let Err(e) = records.insert_clear(&record, now_ms).await {
                warn!(error = %e, "Failed to insert archive record");
            }
            if let Err(e) = tracks.bulk_upsert(&upserts, now_ms).await {
                warn!(error = %e, "Failed to upsert aircraft tracks");
            }
        });
    }
}

// ============================================================================
// Encrypted pipeline
// ============================================================================

/// Encodes, encrypts with the minute key, and archives the sealed copy.
pub struct EncryptedUploader {
    encryptor: Arc<Encryptor>,
    keyshare: Arc<KeyShareClient>,
    registry: Arc<PackageUuidRegistry>,
    records: Arc<ArchiveRecordStore>,
    stats: Arc<StatsRegister>,
}

impl EncryptedUploader {
    pub fn new(
        encryptor: Arc<Encryptor>,
        keyshare: Arc<KeyShareClient>,
        registry: Arc<PackageUuidRegistry>,
        records: Arc<ArchiveRecordStore>,
        stats: Arc<StatsRegister>,
    ) -> Self {
        Self {
            encryptor,
            keyshare,
            registry,
            records,
            stats,
        }
    }
}

#[async_trait]
impl BatchUploader for EncryptedUploader {
    async fn prepare(&self, batch: &Batch) -> Result<PreparedUpload, UploadError> {
        let encoded = encode_batch(batch)?;

        // Recover the UUID the clear pipeline registered for this batch id;
        // an evicted mapping degrades to a fresh UUID rather than a stall.
        let package_uuid = self.registry.resolve(&batch.batch_id);

        let now_ms = chrono::Utc::now().timestamp_millis();
        let package = self
            .encryptor
            .encrypt(&encoded.bytes, &package_uuid, now_ms)?;
        let tags = encrypted_batch_tags(
            batch,
            &encoded,
            &package_uuid,
            &package.key_uuid,
            &package.data_hash,
            now_ms,
        );
        debug!(
            batch_id = %batch.batch_id,
            key_uuid = %package.key_uuid,
            plaintext = package.size,
            sealed = package.encrypted.len(),
            "Encrypted batch package"
        );

        Ok(PreparedUpload {
            file_size_kb: encoded.file_size_kb,
            bytes: package.encrypted,
            tags,
            package_uuid,
            key_uuid: package.key_uuid,
            data_hash: Some(package.data_hash),
            raw_key: Some(package.raw_key),
        })
    }

    async fn on_success(&self, batch: &Batch, prepared: &PreparedUpload, tx_id: &str) {
        // Key escrow is optimistic: the saved-keys counter moves with the
        // upload, and share-service trouble only feeds its own observable.
        self.stats.record_key_saved();
        if let Some(raw_key) = prepared.raw_key {
            let keyshare = Arc::clone(&self.keyshare);
            let stats = Arc::clone(&self.stats);
            let key_uuid = prepared.key_uuid.clone();
            tokio::spawn(async move {
                if let Err(e) = keyshare.store_key(&key_uuid, &raw_key).await {
                    stats.record_keyshare_error();
                    warn!(key_uuid = %key_uuid, error = %e, "Key-share store failed");
                }
            });
        }

        let now_ms = chrono::Utc::now().timestamp_millis();
        let record = NewEncryptedArchiveRecord {
            record: NewArchiveRecord {
                tx_id: tx_id.to_string(),
                source: batch.source.clone(),
                timestamp: batch.snapshot_seconds * 1000,
                aircraft_count: batch.items.len() as i64,
                file_size_kb: prepared.file_size_kb,
                format: "Parquet".to_string(),
                icao_addresses: batch.icao_addresses(),
                package_uuid: prepared.package_uuid.clone(),
            },
            data_hash: prepared.data_hash.clone().unwrap_or_default(),
            encryption_algorithm: "AES-256-GCM".to_string(),
        };

        let records = Arc::clone(&self.records);
        tokio::spawn(async move {
            if let Err(e) = records.insert_encrypted(&record, now_ms).await {
                warn!(error = %e, "Failed to insert encrypted archive record");
            }
        });
    }
}
