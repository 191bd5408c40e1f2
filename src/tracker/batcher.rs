//! Batcher — groups change events into size-capped upload batches.
//!
//! Events accumulate during a tick; `drain()` splits them into ordered
//! chunks of at most [`MAX_AIRCRAFT_PER_BATCH`] aircraft. Each chunk gets a
//! fresh v4 package UUID and a deterministic batch id, and the pair is
//! recorded in a bounded registry so the encrypted pipeline can recover the
//! UUID of its clear twin by batch id.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;
use uuid::Uuid;

use crate::types::{Batch, BatchItem, ChangeEvent, MAX_AIRCRAFT_PER_BATCH};

/// How long a batch-id → package-UUID mapping is kept.
const REGISTRY_TTL: Duration = Duration::from_secs(5 * 60);

/// Append-only event buffer, drained once per tick.
#[derive(Debug, Default)]
pub struct Batcher {
    buffer: Vec<ChangeEvent>,
}

impl Batcher {
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    pub fn push(&mut self, event: ChangeEvent) {
        self.buffer.push(event);
    }

    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Split the buffered events into batches, registering each package UUID.
    ///
    /// Order is preserved; the buffer is left empty. Events without a hex
    /// never reach the buffer (the classifier drops them), so every batch
    /// member satisfies the non-empty-hex invariant.
    pub fn drain(&mut self, registry: &PackageUuidRegistry) -> Vec<Batch> {
        if self.buffer.is_empty() {
            return Vec::new();
        }

        let events = std::mem::take(&mut self.buffer);
        let mut batches = Vec::with_capacity(events.len().div_ceil(MAX_AIRCRAFT_PER_BATCH));

        for (ordinal, chunk) in events.chunks(MAX_AIRCRAFT_PER_BATCH).enumerate() {
            let snapshot_seconds = chunk[0].snapshot_seconds;
            let first_hex = chunk[0].hex.clone();
            let source = chunk[0].source.clone();
            let batch_id = Batch::batch_id_for(snapshot_seconds, &first_hex, ordinal);
            let package_uuid = Uuid::new_v4().to_string();
            registry.record(&batch_id, &package_uuid);

            batches.push(Batch {
                items: chunk
                    .iter()
                    .map(|e| BatchItem {
                        hex: e.hex.clone(),
                        observation: e.observation.clone(),
                        snapshot_seconds: e.snapshot_seconds,
                        total_messages: e.total_messages,
                    })
                    .collect(),
                package_uuid,
                batch_id,
                snapshot_seconds,
                source,
            });
        }

        batches
    }
}

/// Bounded map coupling a batch id to the package UUID the clear pipeline
/// generated for it. Entries expire after five minutes; a lookup that finds
/// nothing falls back to a fresh UUID, trading the coupling guarantee for
/// liveness under pathological lag.
#[derive(Debug, Default)]
pub struct PackageUuidRegistry {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl PackageUuidRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Record a batch-id → package-UUID pair, pruning expired entries.
    pub fn record(&self, batch_id: &str, package_uuid: &str) {
        let mut entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let now = Instant::now();
        entries.retain(|_, (_, at)| now.duration_since(*at) < REGISTRY_TTL);
        entries.insert(
            batch_id.to_string(),
            (package_uuid.to_string(), now),
        );
    }

    /// Resolve the package UUID for a batch id, generating a fresh one when
    /// the mapping has been evicted.
    pub fn resolve(&self, batch_id: &str) -> String {
        let entries = match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match entries.get(batch_id) {
            Some((uuid, at)) if at.elapsed() < REGISTRY_TTL => uuid.clone(),
            _ => {
                drop(entries);
                let fresh = Uuid::new_v4().to_string();
                warn!(
                    batch_id = %batch_id,
                    "Package UUID mapping evicted — falling back to a fresh UUID"
                );
                fresh
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AircraftObservation, ChangeKind};

    fn event(hex: &str) -> ChangeEvent {
        ChangeEvent {
            kind: ChangeKind::New,
            hex: hex.to_string(),
            observation: AircraftObservation {
                hex: hex.to_string(),
                ..AircraftObservation::default()
            },
            snapshot_seconds: 1_751_069_515,
            total_messages: 1,
            source: "ant-1".to_string(),
        }
    }

    #[test]
    fn test_drain_empty_buffer() {
        let mut batcher = Batcher::new();
        let registry = PackageUuidRegistry::new();
        assert!(batcher.drain(&registry).is_empty());
    }

    #[test]
    fn test_splits_forty_five_into_thirty_and_fifteen() {
        let mut batcher = Batcher::new();
        let registry = PackageUuidRegistry::new();
        for i in 0..45 {
            batcher.push(event(&format!("{i:06x}")));
        }

        let batches = batcher.drain(&registry);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].items.len(), 30);
        assert_eq!(batches[1].items.len(), 15);
        assert_eq!(batcher.pending(), 0);

        // Order preserved across the split
        assert_eq!(batches[0].items[0].hex, "000000");
        assert_eq!(batches[1].items[0].hex, format!("{:06x}", 30));

        // Distinct UUIDs per chunk, deterministic ids
        assert_ne!(batches[0].package_uuid, batches[1].package_uuid);
        assert_eq!(batches[0].batch_id, "1751069515-000000-0");
        assert_eq!(batches[1].batch_id, format!("1751069515-{:06x}-1", 30));
    }

    #[test]
    fn test_registry_resolves_recorded_uuid() {
        let mut batcher = Batcher::new();
        let registry = PackageUuidRegistry::new();
        batcher.push(event("48436b"));

        let batches = batcher.drain(&registry);
        assert_eq!(
            registry.resolve(&batches[0].batch_id),
            batches[0].package_uuid
        );
    }

    #[test]
    fn test_registry_falls_back_to_fresh_uuid() {
        let registry = PackageUuidRegistry::new();
        let a = registry.resolve("1751069515-48436b-0");
        let b = registry.resolve("1751069515-48436b-0");
        assert_ne!(a, b);
    }

    #[test]
    fn test_registry_prunes_on_record() {
        let registry = PackageUuidRegistry::new();
        registry.record("a", "uuid-a");
        registry.record("b", "uuid-b");
        assert_eq!(registry.len(), 2);
    }
}
