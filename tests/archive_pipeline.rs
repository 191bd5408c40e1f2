//! End-to-end pipeline regression against an in-process gateway: the
//! dual-upload flow, package-UUID coupling, data-hash integrity, track
//! rollups, retry/backoff, and counter convergence.

mod common;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use sha2::{Digest, Sha256};

use aerovault::stats::{PipelineKind, StatsRegister};
use aerovault::store::{create_pool, run_migrations, ArchiveRecordStore, TrackStore};
use aerovault::tracker::{Batcher, PackageUuidRegistry, StateCache};
use aerovault::upload::{ArchiveClient, UploadPipeline};
use aerovault::{classify, Batch, ClearUploader, EncryptedUploader, Encryptor, KeyShareClient};

use common::{feed, klm855, FakeGateway};

struct Stack {
    gateway: FakeGateway,
    stats: Arc<StatsRegister>,
    records: Arc<ArchiveRecordStore>,
    tracks: Arc<TrackStore>,
    registry: Arc<PackageUuidRegistry>,
    encryptor: Arc<Encryptor>,
    clear: Arc<UploadPipeline<ClearUploader>>,
    encrypted: Arc<UploadPipeline<EncryptedUploader>>,
    _tmp: tempfile::TempDir,
}

async fn build_stack(fail_first: usize) -> Stack {
    let gateway = FakeGateway::spawn(fail_first).await;
    let wallet = common::test_wallet();
    let archive = Arc::new(ArchiveClient::new(&gateway.url, wallet));

    let tmp = tempfile::tempdir().expect("tempdir");
    let db_path = tmp.path().join("test.db");
    let pool = create_pool(db_path.to_str().expect("utf8 path"))
        .await
        .expect("pool");
    run_migrations(&pool).await.expect("migrations");

    let stats = Arc::new(StatsRegister::new(0));
    let records = Arc::new(ArchiveRecordStore::new(pool.clone()));
    let tracks = Arc::new(TrackStore::new(pool));
    let registry = Arc::new(PackageUuidRegistry::new());
    let encryptor = Arc::new(Encryptor::new([7u8; 32]));
    // Unroutable share service: escrow failures must stay non-blocking.
    let keyshare = Arc::new(KeyShareClient::new("http://127.0.0.1:1"));

    let clear = UploadPipeline::new(
        PipelineKind::Clear,
        Arc::clone(&archive),
        ClearUploader::new(
            Arc::clone(&encryptor),
            Arc::clone(&records),
            Arc::clone(&tracks),
        ),
        Arc::clone(&stats),
    );
    let encrypted = UploadPipeline::new(
        PipelineKind::Encrypted,
        Arc::clone(&archive),
        EncryptedUploader::new(
            Arc::clone(&encryptor),
            keyshare,
            Arc::clone(&registry),
            Arc::clone(&records),
            Arc::clone(&stats),
        ),
        Arc::clone(&stats),
    );

    Stack {
        gateway,
        stats,
        records,
        tracks,
        registry,
        encryptor,
        clear,
        encrypted,
        _tmp: tmp,
    }
}

/// Classify one feed snapshot and drain it into batches.
fn batches_from(
    cache: &mut StateCache,
    registry: &PackageUuidRegistry,
    aircraft: Vec<serde_json::Value>,
    now_s: f64,
) -> Vec<Batch> {
    let outcome = classify(
        &feed(now_s, aircraft),
        cache,
        "ant-1",
        (now_s * 1000.0) as i64,
        &HashSet::new(),
    );
    let mut batcher = Batcher::new();
    for event in outcome.events {
        batcher.push(event);
    }
    batcher.drain(registry)
}

/// Wait until both pipelines are idle and the fire-and-forget writes have
/// had a moment to land.
async fn settle(stack: &Stack, timeout: Duration) {
    let deadline = Instant::now() + timeout;
    while !(stack.clear.is_idle() && stack.encrypted.is_idle()) {
        assert!(Instant::now() < deadline, "pipelines did not go idle");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    tokio::time::sleep(Duration::from_millis(300)).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cold_start_uploads_pair_with_shared_uuid() {
    let stack = build_stack(0).await;
    let mut cache = StateCache::new();

    let batches = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_000)],
        1_751_069_515.0,
    );
    assert_eq!(batches.len(), 1);

    stack.clear.enqueue(batches[0].clone());
    stack.encrypted.enqueue(batches[0].clone());
    settle(&stack, Duration::from_secs(10)).await;

    // Counters converge on exactly one success per pipeline.
    let snap = stack.stats.snapshot();
    assert_eq!(snap.clear_attempted, 1);
    assert_eq!(snap.clear_succeeded, 1);
    assert_eq!(snap.clear_failed, 0);
    assert_eq!(snap.enc_attempted, 1);
    assert_eq!(snap.enc_succeeded, 1);
    assert_eq!(snap.enc_failed, 0);

    // Both gateway copies landed, carrying the same package UUID and the
    // same minute key UUID.
    let uploads = stack.gateway.uploads();
    assert_eq!(uploads.len(), 2);
    let clear_copy = uploads
        .iter()
        .find(|u| u.tag("Encrypted") == Some("false"))
        .expect("clear copy");
    let sealed_copy = uploads
        .iter()
        .find(|u| u.tag("Encrypted") == Some("true"))
        .expect("encrypted copy");

    assert_eq!(clear_copy.tag("Package-UUID"), sealed_copy.tag("Package-UUID"));
    assert_eq!(
        clear_copy.tag("Encryption-Key-UUID"),
        sealed_copy.tag("Encryption-Key-UUID")
    );
    assert_eq!(clear_copy.tag("Content-Type"), Some("application/parquet"));
    assert_eq!(
        sealed_copy.tag("Content-Type"),
        Some("application/octet-stream")
    );
    assert_eq!(sealed_copy.tag("Encryption-Algorithm"), Some("AES-256-GCM"));
    assert_eq!(clear_copy.tags_named("ICAO"), vec!["48436b"]);
    assert_eq!(clear_copy.tags_named("Callsign"), vec!["KLM855"]);

    // The clear payload is a Parquet file.
    assert_eq!(&clear_copy.data[0..4], b"PAR1");

    // Data-Hash is the SHA-256 of the sealed copy's plaintext.
    let key_uuid = sealed_copy.tag("Encryption-Key-UUID").expect("key uuid");
    let plaintext = stack
        .encryptor
        .decrypt(&sealed_copy.data, key_uuid)
        .expect("decrypt");
    assert_eq!(
        sealed_copy.tag("Data-Hash"),
        Some(hex::encode(Sha256::digest(&plaintext)).as_str())
    );

    // Both archive tables got a row; the track rollup counts one upload.
    assert_eq!(stack.records.clear_count().await.expect("count"), 1);
    assert_eq!(stack.records.encrypted_count().await.expect("count"), 1);
    let track = stack
        .tracks
        .get("48436b")
        .await
        .expect("query")
        .expect("track row");
    assert_eq!(track.upload_count, 1);
    assert_eq!(track.total_updates, 0);
    assert_eq!(track.status, "active");
    assert_eq!(track.callsign.as_deref(), Some("KLM855"));
    assert!(track.first_seen_ms <= track.last_seen_ms);
    assert!(track.last_seen_ms <= track.last_uploaded_ms);

    // Every touched slot settled in the completed state.
    for (_, progress) in stack.clear.progress_snapshot() {
        assert_eq!(progress.status, aerovault::upload::SlotStatus::Completed);
        assert_eq!(progress.percent, 100);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn altitude_change_bumps_track_counters() {
    let stack = build_stack(0).await;
    let mut cache = StateCache::new();

    let first = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_000)],
        1_751_069_515.0,
    );
    stack.clear.enqueue(first[0].clone());
    stack.encrypted.enqueue(first[0].clone());
    settle(&stack, Duration::from_secs(10)).await;

    let second = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_200)],
        1_751_069_516.0,
    );
    assert_eq!(second.len(), 1, "altitude change must produce a batch");
    stack.clear.enqueue(second[0].clone());
    stack.encrypted.enqueue(second[0].clone());
    settle(&stack, Duration::from_secs(10)).await;

    let track = stack
        .tracks
        .get("48436b")
        .await
        .expect("query")
        .expect("track row");
    assert_eq!(track.upload_count, 2);
    assert_eq!(track.total_updates, 1);

    let snap = stack.stats.snapshot();
    assert_eq!(snap.clear_succeeded, 2);
    assert_eq!(snap.enc_succeeded, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn forty_five_aircraft_make_four_uploads() {
    let stack = build_stack(0).await;
    let mut cache = StateCache::new();

    let aircraft: Vec<serde_json::Value> = (0..45)
        .map(|i| serde_json::json!({ "hex": format!("{i:06x}"), "alt_baro": 30_000 + i }))
        .collect();
    let batches = batches_from(&mut cache, &stack.registry, aircraft, 1_751_069_515.0);
    assert_eq!(batches.len(), 2);

    for batch in &batches {
        stack.clear.enqueue(batch.clone());
        stack.encrypted.enqueue(batch.clone());
    }
    settle(&stack, Duration::from_secs(15)).await;

    let snap = stack.stats.snapshot();
    assert_eq!(snap.clear_succeeded + snap.clear_failed, 2);
    assert_eq!(snap.enc_succeeded + snap.enc_failed, 2);
    assert_eq!(stack.gateway.uploads().len(), 4);
    assert_eq!(stack.tracks.total_tracks().await.expect("count"), 45);
}

#[tokio::test(flavor = "multi_thread")]
async fn out_of_range_return_classifies_reappeared() {
    let stack = build_stack(0).await;
    let mut cache = StateCache::new();

    // First sighting archives the aircraft and creates its track row.
    let batches = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_000)],
        1_751_069_515.0,
    );
    stack.clear.enqueue(batches[0].clone());
    settle(&stack, Duration::from_secs(10)).await;

    // Silence past the threshold: the cache entry is evicted and the track
    // flipped, exactly what the orchestrator's eviction path does.
    stack
        .tracks
        .bulk_mark_out_of_range(&["48436b".to_string()], 1_751_069_915_000)
        .await
        .expect("flip");
    cache = StateCache::new();

    // On the return tick the orchestrator resolves its cache misses through
    // the track store and feeds the result to the classifier.
    let returning = stack
        .tracks
        .out_of_range_hexes(&["48436b".to_string()])
        .await
        .expect("status lookup");
    let outcome = classify(
        &feed(1_751_069_875.0, vec![klm855(37_000)]),
        &mut cache,
        "ant-1",
        1_751_069_875_000,
        &returning,
    );
    assert_eq!(outcome.events.len(), 1);
    assert_eq!(outcome.events[0].kind, aerovault::ChangeKind::Reappeared);
}

#[tokio::test(flavor = "multi_thread")]
async fn three_failures_then_success_backs_off() {
    // Gateway rejects the first three submissions with 503.
    let stack = build_stack(3).await;
    let mut cache = StateCache::new();

    let batches = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_000)],
        1_751_069_515.0,
    );

    let started = Instant::now();
    stack.clear.enqueue(batches[0].clone());
    settle(&stack, Duration::from_secs(30)).await;
    let elapsed = started.elapsed();

    // Backoff schedule 1 s, 2 s, 4 s before the fourth attempt lands.
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert_eq!(stack.gateway.submissions(), 4);

    let snap = stack.stats.snapshot();
    assert_eq!(snap.clear_attempted, 1);
    assert_eq!(snap.clear_succeeded, 1);
    assert_eq!(snap.clear_failed, 0);
    assert_eq!(snap.clear_retries, 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn exhausted_retries_count_one_failure() {
    // More failures than the pipeline will tolerate.
    let stack = build_stack(100).await;
    let mut cache = StateCache::new();

    let batches = batches_from(
        &mut cache,
        &stack.registry,
        vec![klm855(37_000)],
        1_751_069_515.0,
    );
    stack.clear.enqueue(batches[0].clone());
    settle(&stack, Duration::from_secs(40)).await;

    // Five attempts: the first plus four retries, then the batch drops.
    assert_eq!(stack.gateway.submissions(), 5);
    let snap = stack.stats.snapshot();
    assert_eq!(snap.clear_attempted, 1);
    assert_eq!(snap.clear_succeeded, 0);
    assert_eq!(snap.clear_failed, 1);
    assert_eq!(snap.clear_retries, 4);
}
