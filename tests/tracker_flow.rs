//! Tracker regression: classification, re-poll idempotence, reappearance,
//! and batch splitting — the poll-loop semantics without any network.

use std::collections::HashSet;

use aerovault::tracker::{Batcher, PackageUuidRegistry, StateCache, REAPPEAR_THRESHOLD_MS};
use aerovault::{classify, ChangeKind, FeedSnapshot};

fn feed(now: f64, aircraft: Vec<serde_json::Value>) -> FeedSnapshot {
    serde_json::from_value(serde_json::json!({
        "now": now,
        "messages": 17,
        "aircraft": aircraft,
    }))
    .expect("feed json")
}

fn klm855(alt_baro: i64) -> serde_json::Value {
    serde_json::json!({
        "hex": "48436b",
        "flight": "KLM855",
        "lat": 40.9258,
        "lon": 47.0615,
        "alt_baro": alt_baro,
        "gs": 575.3,
        "track": 77.65,
        "squawk": "6025",
        "emergency": "none"
    })
}

fn none() -> HashSet<String> {
    HashSet::new()
}

#[test]
fn cold_start_produces_one_new_batch() {
    let mut cache = StateCache::new();
    let mut batcher = Batcher::new();
    let registry = PackageUuidRegistry::new();

    let outcome = classify(
        &feed(1_751_069_515.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        1_751_069_515_000,
        &none(),
    );
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].kind, ChangeKind::New);
    assert_eq!(outcome.events[0].total_messages, 17);

    for event in outcome.events {
        batcher.push(event);
    }
    let batches = batcher.drain(&registry);
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].items.len(), 1);
    assert_eq!(batches[0].batch_id, "1751069515-48436b-0");
    assert_eq!(batches[0].source, "ant-1");

    // The encrypted side recovers the same package UUID by batch id.
    assert_eq!(
        registry.resolve(&batches[0].batch_id),
        batches[0].package_uuid
    );
}

#[test]
fn identical_repoll_is_idempotent() {
    let mut cache = StateCache::new();
    let snapshot = feed(1_751_069_515.0, vec![klm855(37_000)]);

    let first = classify(&snapshot, &mut cache, "ant-1", 1_751_069_515_000, &none());
    assert_eq!(first.events.len(), 1);

    // Same response 100 ms later: no events, just a seen-time bump.
    let second = classify(&snapshot, &mut cache, "ant-1", 1_751_069_515_100, &none());
    assert!(second.events.is_empty());
    assert!(second.out_of_range.is_empty());
    assert_eq!(
        cache.get("48436b").map(|e| e.last_seen_ms),
        Some(1_751_069_515_100)
    );
}

#[test]
fn field_change_produces_update() {
    let mut cache = StateCache::new();
    classify(
        &feed(1_751_069_515.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        1_751_069_515_000,
        &none(),
    );

    let outcome = classify(
        &feed(1_751_069_516.0, vec![klm855(37_200)]),
        &mut cache,
        "ant-1",
        1_751_069_516_000,
        &none(),
    );
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].kind, ChangeKind::Updated);
}

#[test]
fn six_minute_gap_reappears_after_eviction() {
    let t0 = 1_751_069_515_000i64;
    let mut cache = StateCache::new();
    classify(
        &feed(1_751_069_515.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        t0,
        &none(),
    );

    // Six minutes of empty polls: the entry ages out and the hex joins the
    // bulk out-of-range update exactly once.
    let t1 = t0 + REAPPEAR_THRESHOLD_MS + 60_000;
    let silent = classify(&feed(1_751_069_875.0, vec![]), &mut cache, "ant-1", t1, &none());
    assert_eq!(silent.out_of_range, vec!["48436b".to_string()]);
    assert!(cache.is_empty());

    // The aircraft returns. The orchestrator hands the classifier the track
    // statuses for this tick's cache misses (here, the hex just flipped),
    // and the return classifies as REAPPEARED, not NEW.
    let gone: HashSet<String> = silent.out_of_range.into_iter().collect();
    let back = classify(
        &feed(1_751_069_876.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        t1 + 1_000,
        &gone,
    );
    assert_eq!(back.events.len(), 1);
    assert_eq!(back.events[0].kind, ChangeKind::Reappeared);
}

#[test]
fn stale_entry_seen_again_is_reappeared() {
    let t0 = 1_751_069_515_000i64;
    let mut cache = StateCache::new();
    classify(
        &feed(1_751_069_515.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        t0,
        &none(),
    );

    // No intermediate empty poll, so the entry is still cached when the
    // aircraft shows up past the threshold.
    let t1 = t0 + REAPPEAR_THRESHOLD_MS + 60_000;
    let outcome = classify(
        &feed(1_751_069_876.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        t1,
        &none(),
    );
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].kind, ChangeKind::Reappeared);
}

#[test]
fn forty_five_changes_split_into_two_batches() {
    let mut cache = StateCache::new();
    let mut batcher = Batcher::new();
    let registry = PackageUuidRegistry::new();

    let aircraft: Vec<serde_json::Value> = (0..45)
        .map(|i| {
            serde_json::json!({
                "hex": format!("{i:06x}"),
                "lat": 40.0 + i as f64 * 0.01,
                "lon": 47.0,
                "alt_baro": 30_000 + i,
            })
        })
        .collect();

    let outcome = classify(
        &feed(1_751_069_515.0, aircraft),
        &mut cache,
        "ant-1",
        1_751_069_515_000,
        &none(),
    );
    assert_eq!(outcome.events.len(), 45);

    for event in outcome.events {
        batcher.push(event);
    }
    let batches = batcher.drain(&registry);
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0].items.len(), 30);
    assert_eq!(batches[1].items.len(), 15);
    assert_ne!(batches[0].package_uuid, batches[1].package_uuid);
}

#[test]
fn cache_stays_bounded_by_live_aircraft() {
    let mut cache = StateCache::new();
    let mut now = 0i64;

    // A rolling population: each tick sees 10 aircraft, shifted by one.
    for tick in 0..100i64 {
        let aircraft: Vec<serde_json::Value> = (tick..tick + 10)
            .map(|i| serde_json::json!({ "hex": format!("{i:06x}"), "alt_baro": 30_000 }))
            .collect();
        now = tick * REAPPEAR_THRESHOLD_MS / 2;
        classify(
            &feed(now as f64 / 1000.0, aircraft),
            &mut cache,
            "ant-1",
            now,
            &none(),
        );
    }

    // Live set (10) plus entries still inside the reappear window.
    assert!(cache.len() <= 10 + 10 * 2, "cache grew to {}", cache.len());

    // One final far-future empty poll clears everything.
    classify(
        &feed(0.0, vec![]),
        &mut cache,
        "ant-1",
        now + REAPPEAR_THRESHOLD_MS * 2,
        &none(),
    );
    assert!(cache.is_empty());
}
