//! State Cache — last-observed state per aircraft.
//!
//! A plain map owned by the orchestrator task; every lookup and mutation
//! happens from that single task, so no lock is held around it. Entries age
//! out when an aircraft stays silent past the reappear threshold.

use std::collections::HashMap;

use crate::types::AircraftObservation;

/// Dwell time after which a silent aircraft is evicted and a returning one
/// is classified as reappeared rather than updated.
pub const REAPPEAR_THRESHOLD_MS: i64 = 5 * 60 * 1000;

/// Cached state for one aircraft.
#[derive(Debug, Clone)]
pub struct StateEntry {
    pub hex: String,
    pub last_hash: u64,
    pub last_seen_ms: i64,
    pub last_uploaded_ms: i64,
    pub last_observation: AircraftObservation,
}

/// In-memory map of aircraft state, keyed by ICAO hex.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: HashMap<String, StateEntry>,
}

impl StateCache {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, hex: &str) -> Option<&StateEntry> {
        self.entries.get(hex)
    }

    pub fn get_mut(&mut self, hex: &str) -> Option<&mut StateEntry> {
        self.entries.get_mut(hex)
    }

    /// Insert or overwrite the entry for `hex`.
    pub fn put(&mut self, entry: StateEntry) {
        self.entries.insert(entry.hex.clone(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every entry that was not seen this tick and whose silence
    /// exceeds the reappear threshold. Returns the evicted hexes, which the
    /// caller flips to out-of-range in one bulk database update.
    pub fn evict_stale(&mut self, seen_this_tick: &dyn Fn(&str) -> bool, now_ms: i64) -> Vec<String> {
        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(hex, entry)| {
                !seen_this_tick(hex) && now_ms - entry.last_seen_ms > REAPPEAR_THRESHOLD_MS
            })
            .map(|(hex, _)| hex.clone())
            .collect();

        for hex in &stale {
            self.entries.remove(hex);
        }
        stale
    }
}
