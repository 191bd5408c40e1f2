//! Change events and upload batches.

use serde::{Deserialize, Serialize};

use super::observation::AircraftObservation;

/// Maximum aircraft per archive batch.
pub const MAX_AIRCRAFT_PER_BATCH: usize = 30;

/// Classification of a single observation against the state cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeKind {
    /// Hex never seen before (or evicted long ago)
    New,
    /// Fingerprint differs from the cached state
    Updated,
    /// Hex returned after more than the reappear threshold
    Reappeared,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeKind::New => write!(f, "new"),
            ChangeKind::Updated => write!(f, "updated"),
            ChangeKind::Reappeared => write!(f, "reappeared"),
        }
    }
}

/// A change event emitted by the classifier, consumed by the batcher.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub hex: String,
    pub observation: AircraftObservation,
    /// Feed timestamp of the poll that produced this event, unix seconds
    pub snapshot_seconds: i64,
    /// Receiver message total reported by that poll
    pub total_messages: i64,
    /// Antenna that observed the aircraft
    pub source: String,
}

/// One member of an archive batch.
#[derive(Debug, Clone)]
pub struct BatchItem {
    pub hex: String,
    pub observation: AircraftObservation,
    pub snapshot_seconds: i64,
    pub total_messages: i64,
}

/// A size-capped, ordered group of change events bound for both pipelines.
///
/// `package_uuid` identifies the clear/encrypted pair; `batch_id` is the
/// deterministic key the encrypted pipeline uses to find it.
#[derive(Debug, Clone)]
pub struct Batch {
    pub items: Vec<BatchItem>,
    pub package_uuid: String,
    pub batch_id: String,
    pub snapshot_seconds: i64,
    /// Antenna the first member was observed by
    pub source: String,
}

impl Batch {
    /// Deterministic batch identity: `{snapshot_seconds}-{first_hex}-{ordinal}`.
    pub fn batch_id_for(snapshot_seconds: i64, first_hex: &str, ordinal: usize) -> String {
        format!("{snapshot_seconds}-{first_hex}-{ordinal}")
    }

    /// ICAO addresses of every member, in batch order.
    pub fn icao_addresses(&self) -> Vec<String> {
        self.items.iter().map(|i| i.hex.clone()).collect()
    }
}
