//! Archive record inserts — one row per uploaded batch copy.
//!
//! The `icao_addresses` column stores the member list as JSON text. Read
//! paths belong to the operator pagination surface, which lives outside
//! this crate; the write path here is fire-and-forget from the pipelines.

use sqlx::{Row, SqlitePool};

/// A clear-copy archive row.
#[derive(Debug, Clone)]
pub struct NewArchiveRecord {
    pub tx_id: String,
    pub source: String,
    /// Batch snapshot time, unix milliseconds
    pub timestamp: i64,
    pub aircraft_count: i64,
    pub file_size_kb: f64,
    pub format: String,
    pub icao_addresses: Vec<String>,
    pub package_uuid: String,
}

/// An encrypted-copy archive row.
#[derive(Debug, Clone)]
pub struct NewEncryptedArchiveRecord {
    pub record: NewArchiveRecord,
    pub data_hash: String,
    pub encryption_algorithm: String,
}

/// Insert access to both archive tables.
pub struct ArchiveRecordStore {
    pool: SqlitePool,
}

impl ArchiveRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert_clear(
        &self,
        record: &NewArchiveRecord,
        now_ms: i64,
    ) -> Result<i64, sqlx::Error> {
        let icao_json = serde_json::to_string(&record.icao_addresses).unwrap_or_default();
        let result = sqlx::query(
            "INSERT INTO archive_records \
             (tx_id, source, timestamp, aircraft_count, file_size_kb, format, \
              icao_addresses, package_uuid, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.tx_id)
        .bind(&record.source)
        .bind(record.timestamp)
        .bind(record.aircraft_count)
        .bind(record.file_size_kb)
        .bind(&record.format)
        .bind(icao_json)
        .bind(&record.package_uuid)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    pub async fn insert_encrypted(
        &self,
        record: &NewEncryptedArchiveRecord,
        now_ms: i64,
    ) -> Result<i64, sqlx::Error> {
        let icao_json =
            serde_json::to_string(&record.record.icao_addresses).unwrap_or_default();
        let result = sqlx::query(
            "INSERT INTO encrypted_archive_records \
             (tx_id, source, timestamp, aircraft_count, file_size_kb, format, \
              icao_addresses, package_uuid, data_hash, encryption_algorithm, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.record.tx_id)
        .bind(&record.record.source)
        .bind(record.record.timestamp)
        .bind(record.record.aircraft_count)
        .bind(record.record.file_size_kb)
        .bind(&record.record.format)
        .bind(icao_json)
        .bind(&record.record.package_uuid)
        .bind(&record.data_hash)
        .bind(&record.encryption_algorithm)
        .bind(now_ms)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Row count of the clear table.
    pub async fn clear_count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM archive_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }

    /// Row count of the encrypted table.
    pub async fn encrypted_count(&self) -> Result<i64, sqlx::Error> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM encrypted_archive_records")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get("n"))
    }
}
