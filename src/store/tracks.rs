//! Track Store — per-aircraft persistent rollups.
//!
//! Both pipelines upsert after every successful upload, possibly for
//! overlapping hex sets at the same moment, so the save must be a true
//! upsert. The flow per bulk call: one `SELECT … WHERE hex IN (…)` to
//! partition updates from inserts (and log the split), then one multi-row
//! `INSERT … ON CONFLICT(hex) DO UPDATE` that survives the race.

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use tracing::debug;

use crate::types::BatchItem;

/// How long the `total_tracks` count is served from cache.
const COUNT_CACHE_TTL: Duration = Duration::from_secs(5);

/// One aircraft's contribution to a bulk upsert.
#[derive(Debug, Clone)]
pub struct TrackUpsert {
    pub hex: String,
    pub callsign: Option<String>,
    pub registration: Option<String>,
    pub aircraft_type: Option<String>,
    pub last_lat: Option<f64>,
    pub last_lon: Option<f64>,
    pub last_alt_baro_ft: Option<i64>,
    pub tx_id: String,
}

impl TrackUpsert {
    /// Build an upsert from a batch member and the transaction that
    /// archived it.
    pub fn from_item(item: &BatchItem, tx_id: &str) -> Self {
        let obs = &item.observation;
        Self {
            hex: item.hex.clone(),
            callsign: obs.callsign().map(str::to_string),
            registration: obs.r.clone(),
            aircraft_type: obs.t.clone(),
            last_lat: obs.lat,
            last_lon: obs.lon,
            last_alt_baro_ft: obs.alt_baro_ft().map(|v| v as i64),
            tx_id: tx_id.to_string(),
        }
    }
}

/// Per-aircraft rollup store.
pub struct TrackStore {
    pool: SqlitePool,
    cached_count: Mutex<Option<(Instant, i64)>>,
}

impl TrackStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cached_count: Mutex::new(None),
        }
    }

    /// Bulk upsert after a successful batch upload.
    pub async fn bulk_upsert(
        &self,
        items: &[TrackUpsert],
        now_ms: i64,
    ) -> Result<(), sqlx::Error> {
        if items.is_empty() {
            return Ok(());
        }

        // Step 1: one SELECT for the whole hex set.
        let mut select: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT hex FROM aircraft_tracks WHERE hex IN (");
        let mut separated = select.separated(", ");
        for item in items {
            separated.push_bind(&item.hex);
        }
        select.push(")");
        let existing: HashSet<String> = select
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("hex"))
            .collect();

        // Step 2: partition, for observability only — the save below is an
        // upsert either way, which is what survives two in-flight batches
        // carrying the same hex.
        let to_update = items.iter().filter(|i| existing.contains(&i.hex)).count();
        debug!(
            updates = to_update,
            inserts = items.len() - to_update,
            "Bulk track upsert"
        );

        // Step 3: single multi-row save with upsert semantics.
        let mut upsert: QueryBuilder<Sqlite> = QueryBuilder::new(
            "INSERT INTO aircraft_tracks \
             (hex, callsign, registration, aircraft_type, first_seen_ms, last_seen_ms, \
              last_uploaded_ms, last_tx_id, upload_count, total_updates, status, \
              last_lat, last_lon, last_alt_baro_ft) ",
        );
        upsert.push_values(items, |mut row, item| {
            row.push_bind(&item.hex)
                .push_bind(&item.callsign)
                .push_bind(&item.registration)
                .push_bind(&item.aircraft_type)
                .push_bind(now_ms)
                .push_bind(now_ms)
                .push_bind(now_ms)
                .push_bind(&item.tx_id)
                .push_bind(1i64)
                .push_bind(0i64)
                .push_bind("active")
                .push_bind(item.last_lat)
                .push_bind(item.last_lon)
                .push_bind(item.last_alt_baro_ft);
        });
        upsert.push(
            " ON CONFLICT(hex) DO UPDATE SET \
             callsign = COALESCE(excluded.callsign, callsign), \
             registration = COALESCE(excluded.registration, registration), \
             aircraft_type = COALESCE(excluded.aircraft_type, aircraft_type), \
             last_seen_ms = excluded.last_seen_ms, \
             last_uploaded_ms = excluded.last_uploaded_ms, \
             last_tx_id = excluded.last_tx_id, \
             upload_count = upload_count + 1, \
             total_updates = total_updates + 1, \
             status = 'active', \
             last_lat = COALESCE(excluded.last_lat, last_lat), \
             last_lon = COALESCE(excluded.last_lon, last_lon), \
             last_alt_baro_ft = COALESCE(excluded.last_alt_baro_ft, last_alt_baro_ft)",
        );
        upsert.build().execute(&self.pool).await?;
        Ok(())
    }

    /// Which of the given hexes currently have an `out_of_range` track.
    ///
    /// The classifier asks this once per tick for its cache misses: an
    /// aircraft whose entry was evicted still has a persistent track, and
    /// its return must classify as reappeared rather than new.
    pub async fn out_of_range_hexes(
        &self,
        hexes: &[String],
    ) -> Result<HashSet<String>, sqlx::Error> {
        if hexes.is_empty() {
            return Ok(HashSet::new());
        }

        let mut select: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT hex FROM aircraft_tracks WHERE status = 'out_of_range' AND hex IN (",
        );
        let mut separated = select.separated(", ");
        for hex in hexes {
            separated.push_bind(hex);
        }
        select.push(")");

        Ok(select
            .build()
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(|row| row.get::<String, _>("hex"))
            .collect())
    }

    /// Bulk status flip for aircraft the state cache evicted.
    pub async fn bulk_mark_out_of_range(
        &self,
        hexes: &[String],
        now_ms: i64,
    ) -> Result<u64, sqlx::Error> {
        if hexes.is_empty() {
            return Ok(0);
        }

        let mut update: QueryBuilder<Sqlite> = QueryBuilder::new(
            "UPDATE aircraft_tracks SET status = 'out_of_range', last_seen_ms = ",
        );
        update.push_bind(now_ms);
        update.push(" WHERE hex IN (");
        let mut separated = update.separated(", ");
        for hex in hexes {
            separated.push_bind(hex);
        }
        update.push(")");

        let result = update.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Total track count, served from a 5-second cache.
    pub async fn total_tracks(&self) -> Result<i64, sqlx::Error> {
        {
            let cached = match self.cached_count.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if let Some((at, count)) = *cached {
                if at.elapsed() < COUNT_CACHE_TTL {
                    return Ok(count);
                }
            }
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM aircraft_tracks")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get("n");

        let mut cached = match self.cached_count.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *cached = Some((Instant::now(), count));
        Ok(count)
    }

    /// Fetch one track row (tests and diagnostics).
    pub async fn get(&self, hex: &str) -> Result<Option<TrackRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT hex, callsign, first_seen_ms, last_seen_ms, last_uploaded_ms, \
             last_tx_id, upload_count, total_updates, status \
             FROM aircraft_tracks WHERE hex = ?",
        )
        .bind(hex)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TrackRow {
            hex: row.get("hex"),
            callsign: row.get("callsign"),
            first_seen_ms: row.get("first_seen_ms"),
            last_seen_ms: row.get("last_seen_ms"),
            last_uploaded_ms: row.get("last_uploaded_ms"),
            last_tx_id: row.get("last_tx_id"),
            upload_count: row.get("upload_count"),
            total_updates: row.get("total_updates"),
            status: row.get("status"),
        }))
    }
}

/// A persisted track row.
#[derive(Debug, Clone)]
pub struct TrackRow {
    pub hex: String,
    pub callsign: Option<String>,
    pub first_seen_ms: i64,
    pub last_seen_ms: i64,
    pub last_uploaded_ms: i64,
    pub last_tx_id: Option<String>,
    pub upload_count: i64,
    pub total_updates: i64,
    pub status: String,
}
