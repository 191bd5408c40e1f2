//! Archive tag construction and sanitisation.
//!
//! Tags are the only index the archive network offers, so their shape is a
//! wire contract: values carry no C0/C1 control characters, an empty value
//! becomes `"unknown"`, and the combined name+value budget per upload stays
//! under 4096 bytes.

use chrono::{TimeZone, Utc};

use crate::encode::EncodedBatch;
use crate::types::Batch;

/// Combined name+value byte budget per upload.
const TAG_BUDGET_BYTES: usize = 4096;

/// Application name stamped on every upload.
pub const APP_NAME: &str = "DeradNetworkBackup";

/// One name/value tag.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: &str, value: impl AsRef<str>) -> Self {
        Self {
            name: name.to_string(),
            value: sanitize_tag_value(value.as_ref()),
        }
    }
}

/// Tag validation errors — fatal for the batch that carries them.
#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("tag list exceeds {TAG_BUDGET_BYTES} byte budget: {0} bytes")]
    BudgetExceeded(usize),
    #[error("tag has an empty name")]
    EmptyName,
}

/// Strip C0/C1 control characters; an empty result becomes `"unknown"`.
pub fn sanitize_tag_value(value: &str) -> String {
    let cleaned: String = value
        .chars()
        .filter(|c| !c.is_control() && !('\u{80}'..='\u{9f}').contains(c))
        .collect();
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        "unknown".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Check the tag budget and name shape.
pub fn validate_tags(tags: &[Tag]) -> Result<(), TagError> {
    let mut total = 0usize;
    for tag in tags {
        if tag.name.is_empty() {
            return Err(TagError::EmptyName);
        }
        total += tag.name.len() + tag.value.len();
    }
    if total >= TAG_BUDGET_BYTES {
        return Err(TagError::BudgetExceeded(total));
    }
    Ok(())
}

/// Tag list for a clear (Parquet) batch upload.
pub fn clear_batch_tags(
    batch: &Batch,
    encoded: &EncodedBatch,
    key_uuid: &str,
    now_ms: i64,
) -> Vec<Tag> {
    let mut tags = vec![
        Tag::new("Content-Type", "application/parquet"),
        Tag::new("App-Name", APP_NAME),
        Tag::new("Timestamp", upload_timestamp(now_ms)),
        Tag::new("Format", "Parquet"),
        Tag::new("Schema-Version", "2.0"),
        Tag::new("Schema-Type", "batch-aircraft"),
        Tag::new("Aircraft-Count", batch.items.len().to_string()),
        Tag::new("File-Size-KB", format!("{:.2}", encoded.file_size_kb)),
        Tag::new("Data-Format", "aviation-realtime-batch"),
        Tag::new("Batch-Timestamp", batch.snapshot_seconds.to_string()),
        Tag::new("Package-UUID", &batch.package_uuid),
        Tag::new("Encryption-Key-UUID", key_uuid),
        Tag::new("Encrypted", "false"),
    ];
    push_aircraft_tags(&mut tags, batch);
    tags
}

/// Tag list for an encrypted batch upload.
pub fn encrypted_batch_tags(
    batch: &Batch,
    encoded: &EncodedBatch,
    package_uuid: &str,
    key_uuid: &str,
    data_hash: &str,
    now_ms: i64,
) -> Vec<Tag> {
    let mut tags = vec![
        Tag::new("Content-Type", "application/octet-stream"),
        Tag::new("App-Name", APP_NAME),
        Tag::new("Timestamp", upload_timestamp(now_ms)),
        Tag::new("Format", "Parquet"),
        Tag::new("Schema-Version", "2.0"),
        Tag::new("Schema-Type", "batch-aircraft"),
        Tag::new("Aircraft-Count", batch.items.len().to_string()),
        Tag::new("File-Size-KB", format!("{:.2}", encoded.file_size_kb)),
        Tag::new("Data-Format", "aviation-realtime-batch"),
        Tag::new("Batch-Timestamp", batch.snapshot_seconds.to_string()),
        Tag::new("Package-UUID", package_uuid),
        Tag::new("Encryption-Key-UUID", key_uuid),
        Tag::new("Encrypted", "true"),
        Tag::new("Encryption-Algorithm", "AES-256-GCM"),
        Tag::new("Data-Hash", data_hash),
    ];
    push_aircraft_tags(&mut tags, batch);
    tags
}

/// One `ICAO` tag per aircraft and one `Callsign` tag per aircraft that
/// reported a flight id.
fn push_aircraft_tags(tags: &mut Vec<Tag>, batch: &Batch) {
    for item in &batch.items {
        tags.push(Tag::new("ICAO", &item.hex));
    }
    for item in &batch.items {
        if let Some(callsign) = item.observation.callsign() {
            tags.push(Tag::new("Callsign", callsign));
        }
    }
}

/// `yyyymmddHHMM` upload timestamp.
fn upload_timestamp(now_ms: i64) -> String {
    Utc.timestamp_millis_opt(now_ms)
        .single()
        .map(|t| t.format("%Y%m%d%H%M").to_string())
        .unwrap_or_else(|| "000000000000".to_string())
}
