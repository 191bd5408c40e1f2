//! Change Classifier — per-poll diff of the feed against the state cache.
//!
//! Walks the observation list in feed order, emitting NEW / UPDATED /
//! REAPPEARED events for the batcher and silently bumping `last_seen` for
//! unchanged aircraft. After the walk, cache entries silent past the
//! reappear threshold are evicted and collected for one bulk out-of-range
//! database update.
//!
//! The cache alone cannot tell a returning aircraft from a brand-new one:
//! under the continuous poll loop an entry is evicted on the first tick
//! past the reappear threshold, before the aircraft comes back. The caller
//! therefore supplies the set of this tick's unknown hexes whose persistent
//! track is `out_of_range`; a cache miss on one of those classifies as
//! REAPPEARED rather than NEW.

use std::collections::HashSet;

use tracing::warn;

use super::fingerprint::fingerprint;
use super::state_cache::{StateCache, StateEntry, REAPPEAR_THRESHOLD_MS};
use crate::types::{ChangeEvent, ChangeKind, FeedSnapshot};

/// Result of classifying one poll.
#[derive(Debug, Default)]
pub struct TickOutcome {
    /// Batchable change events, in feed order
    pub events: Vec<ChangeEvent>,
    /// Hexes evicted this tick, to be bulk-flipped to out-of-range
    pub out_of_range: Vec<String>,
    /// Observations dropped for a missing or duplicate hex
    pub dropped: u64,
}

impl TickOutcome {
    /// Events of the given kind.
    pub fn count_of(&self, kind: ChangeKind) -> u64 {
        self.events.iter().filter(|e| e.kind == kind).count() as u64
    }
}

/// Classify one feed snapshot against the cache.
///
/// `now_ms` is the wall clock of this tick; the cache is mutated in place.
/// `source` names the antenna the snapshot came from. `out_of_range_tracks`
/// holds the hexes among this tick's cache misses whose persistent track is
/// currently `out_of_range` — those classify as REAPPEARED on return.
pub fn classify(
    snapshot: &FeedSnapshot,
    cache: &mut StateCache,
    source: &str,
    now_ms: i64,
    out_of_range_tracks: &HashSet<String>,
) -> TickOutcome {
    let snapshot_seconds = snapshot.snapshot_seconds();
    let mut outcome = TickOutcome::default();
    let mut seen_this_tick: HashSet<String> = HashSet::with_capacity(snapshot.aircraft.len());

    for obs in &snapshot.aircraft {
        if obs.hex.is_empty() {
            warn!("Dropping observation without hex");
            outcome.dropped += 1;
            continue;
        }
        if !seen_this_tick.insert(obs.hex.clone()) {
            warn!(hex = %obs.hex, "Duplicate hex within one feed response — dropping");
            outcome.dropped += 1;
            continue;
        }

        let hash = fingerprint(obs);
        let kind = match cache.get(&obs.hex) {
            None if out_of_range_tracks.contains(&obs.hex) => Some(ChangeKind::Reappeared),
            None => Some(ChangeKind::New),
            Some(entry) => {
                let elapsed = now_ms - entry.last_seen_ms;
                if elapsed > REAPPEAR_THRESHOLD_MS {
                    Some(ChangeKind::Reappeared)
                } else if hash != entry.last_hash {
                    Some(ChangeKind::Updated)
                } else {
                    None
                }
            }
        };

        match kind {
            Some(kind) => {
                cache.put(StateEntry {
                    hex: obs.hex.clone(),
                    last_hash: hash,
                    last_seen_ms: now_ms,
                    last_uploaded_ms: now_ms,
                    last_observation: obs.clone(),
                });
                outcome.events.push(ChangeEvent {
                    kind,
                    hex: obs.hex.clone(),
                    observation: obs.clone(),
                    snapshot_seconds,
                    total_messages: snapshot.messages,
                    source: source.to_string(),
                });
            }
            None => {
                // Unchanged: keep the entry alive, nothing to upload.
                if let Some(entry) = cache.get_mut(&obs.hex) {
                    entry.last_seen_ms = now_ms;
                }
            }
        }
    }

    outcome.out_of_range = cache.evict_stale(&|hex| seen_this_tick.contains(hex), now_ms);
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AircraftObservation;

    fn obs(hex: &str, alt: i64) -> AircraftObservation {
        serde_json::from_value(serde_json::json!({
            "hex": hex,
            "flight": "TEST1",
            "lat": 40.0,
            "lon": 47.0,
            "alt_baro": alt,
        }))
        .unwrap()
    }

    fn snapshot(aircraft: Vec<AircraftObservation>) -> FeedSnapshot {
        FeedSnapshot {
            now: 1_751_069_515.0,
            messages: 1,
            aircraft,
        }
    }

    #[test]
    fn test_first_sighting_is_new() {
        let mut cache = StateCache::new();
        let outcome = classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 1_000, &HashSet::new());

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, ChangeKind::New);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_identical_repoll_is_silent() {
        let mut cache = StateCache::new();
        classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 1_000, &HashSet::new());
        let outcome = classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 1_100, &HashSet::new());

        assert!(outcome.events.is_empty());
        assert_eq!(cache.get("48436b").unwrap().last_seen_ms, 1_100);
    }

    #[test]
    fn test_field_change_is_updated() {
        let mut cache = StateCache::new();
        classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 1_000, &HashSet::new());
        let outcome = classify(&snapshot(vec![obs("48436b", 37200)]), &mut cache, "ant-1", 1_500, &HashSet::new());

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, ChangeKind::Updated);
    }

    #[test]
    fn test_evicted_hex_with_out_of_range_track_reappears() {
        // The entry was evicted ticks ago; only the persistent track still
        // remembers the aircraft.
        let mut cache = StateCache::new();
        let gone: HashSet<String> = ["48436b".to_string()].into_iter().collect();

        let outcome = classify(
            &snapshot(vec![obs("48436b", 37000)]),
            &mut cache,
            "ant-1",
            1_000,
            &gone,
        );

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, ChangeKind::Reappeared);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_return_after_threshold_is_reappeared() {
        let mut cache = StateCache::new();
        classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 0, &HashSet::new());

        let later = REAPPEAR_THRESHOLD_MS + 60_000;
        let outcome = classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", later, &HashSet::new());

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.events[0].kind, ChangeKind::Reappeared);
    }

    #[test]
    fn test_silent_expired_entry_goes_out_of_range() {
        let mut cache = StateCache::new();
        classify(&snapshot(vec![obs("48436b", 37000)]), &mut cache, "ant-1", 0, &HashSet::new());

        let later = REAPPEAR_THRESHOLD_MS + 60_000;
        let outcome = classify(&snapshot(vec![]), &mut cache, "ant-1", later, &HashSet::new());

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.out_of_range, vec!["48436b".to_string()]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_duplicate_hex_dropped() {
        let mut cache = StateCache::new();
        let outcome = classify(
            &snapshot(vec![obs("48436b", 37000), obs("48436b", 38000)]),
            &mut cache,
            "ant-1",
            1_000,
            &HashSet::new(),
        );

        assert_eq!(outcome.events.len(), 1);
        assert_eq!(outcome.dropped, 1);
        // First occurrence wins
        assert_eq!(
            cache.get("48436b").unwrap().last_observation.alt_baro_ft(),
            Some(37000.0)
        );
    }

    #[test]
    fn test_missing_hex_dropped() {
        let mut cache = StateCache::new();
        let outcome = classify(
            &snapshot(vec![AircraftObservation::default()]),
            &mut cache,
            "ant-1",
            1_000,
            &HashSet::new(),
        );

        assert!(outcome.events.is_empty());
        assert_eq!(outcome.dropped, 1);
        assert!(cache.is_empty());
    }
}
