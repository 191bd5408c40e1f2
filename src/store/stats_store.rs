//! Singleton counter row access.
//!
//! Exactly one row lives in `system_stats`; its id is captured at boot and
//! every later write is a single UPDATE against it.

use std::sync::atomic::{AtomicI64, Ordering};

use sqlx::{Row, SqlitePool};
use tracing::info;

use crate::types::StatsSnapshot;

/// The persisted counter row.
#[derive(Debug, Clone)]
pub struct StatsRow {
    pub id: i64,
    pub snapshot: StatsSnapshot,
    pub system_start_time: i64,
    pub updated_at: i64,
}

/// Access to the singleton `system_stats` row.
pub struct StatsStore {
    pool: SqlitePool,
    /// Row id captured at boot; 0 until `ensure_row` has run.
    row_id: AtomicI64,
}

impl StatsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            row_id: AtomicI64::new(0),
        }
    }

    /// Load the singleton row, if present.
    pub async fn load(&self) -> Result<Option<StatsRow>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT id, total_polls, clear_attempted, clear_succeeded, clear_failed, \
             clear_retries, enc_attempted, enc_succeeded, enc_failed, enc_retries, \
             aircraft_new, aircraft_updated, aircraft_reappeared, peak_tpm, \
             system_start_time, updated_at \
             FROM system_stats ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| StatsRow {
            id: row.get("id"),
            snapshot: StatsSnapshot {
                total_polls: row.get::<i64, _>("total_polls") as u64,
                clear_attempted: row.get::<i64, _>("clear_attempted") as u64,
                clear_succeeded: row.get::<i64, _>("clear_succeeded") as u64,
                clear_failed: row.get::<i64, _>("clear_failed") as u64,
                clear_retries: row.get::<i64, _>("clear_retries") as u64,
                enc_attempted: row.get::<i64, _>("enc_attempted") as u64,
                enc_succeeded: row.get::<i64, _>("enc_succeeded") as u64,
                enc_failed: row.get::<i64, _>("enc_failed") as u64,
                enc_retries: row.get::<i64, _>("enc_retries") as u64,
                aircraft_new: row.get::<i64, _>("aircraft_new") as u64,
                aircraft_updated: row.get::<i64, _>("aircraft_updated") as u64,
                aircraft_reappeared: row.get::<i64, _>("aircraft_reappeared") as u64,
                peak_tpm: row.get::<i64, _>("peak_tpm") as u64,
            },
            system_start_time: row.get("system_start_time"),
            updated_at: row.get("updated_at"),
        }))
    }

    /// Capture the singleton row id, inserting a zeroed row when none exists.
    ///
    /// `system_start_time` is always reset to this boot's wall clock.
    pub async fn ensure_row(&self, system_start_ms: i64) -> Result<i64, sqlx::Error> {
        if let Some(existing) = self.load().await? {
            sqlx::query("UPDATE system_stats SET system_start_time = ? WHERE id = ?")
                .bind(system_start_ms)
                .bind(existing.id)
                .execute(&self.pool)
                .await?;
            self.row_id.store(existing.id, Ordering::Relaxed);
            return Ok(existing.id);
        }

        let result = sqlx::query(
            "INSERT INTO system_stats (system_start_time, updated_at) VALUES (?, ?)",
        )
        .bind(system_start_ms)
        .bind(system_start_ms)
        .execute(&self.pool)
        .await?;

        let id = result.last_insert_rowid();
        self.row_id.store(id, Ordering::Relaxed);
        info!(id = id, "Created system stats row");
        Ok(id)
    }

    /// Persist the whole counter set in one UPDATE.
    pub async fn save(&self, snapshot: &StatsSnapshot, now_ms: i64) -> Result<(), sqlx::Error> {
        let id = self.row_id.load(Ordering::Relaxed);
        sqlx::query(
            "UPDATE system_stats SET \
             total_polls = ?, clear_attempted = ?, clear_succeeded = ?, clear_failed = ?, \
             clear_retries = ?, enc_attempted = ?, enc_succeeded = ?, enc_failed = ?, \
             enc_retries = ?, aircraft_new = ?, aircraft_updated = ?, \
             aircraft_reappeared = ?, peak_tpm = ?, updated_at = ? \
             WHERE id = ?",
        )
        .bind(snapshot.total_polls as i64)
        .bind(snapshot.clear_attempted as i64)
        .bind(snapshot.clear_succeeded as i64)
        .bind(snapshot.clear_failed as i64)
        .bind(snapshot.clear_retries as i64)
        .bind(snapshot.enc_attempted as i64)
        .bind(snapshot.enc_succeeded as i64)
        .bind(snapshot.enc_failed as i64)
        .bind(snapshot.enc_retries as i64)
        .bind(snapshot.aircraft_new as i64)
        .bind(snapshot.aircraft_updated as i64)
        .bind(snapshot.aircraft_reappeared as i64)
        .bind(snapshot.peak_tpm as i64)
        .bind(now_ms)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
