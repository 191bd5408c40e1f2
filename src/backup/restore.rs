//! Restore On Start — reconcile local counters with the newest archived
//! snapshot.
//!
//! Runs once at boot, before the live register initialises. The newest
//! snapshot owned by this wallet is fetched through the gateway's GraphQL
//! surface, decrypted with the fixed snapshot key id, and merged:
//!
//! - no local row        → the backup counters are written in
//! - local row is newer  → local wins, backup ignored
//! - local row is older  → the 13 counters are overwritten
//!
//! `system_start_time` is never taken from a backup — every boot resets it.

use tracing::{info, warn};

use super::snapshot::{SnapshotDocument, SNAPSHOT_KEY_ID};
use crate::crypto::{CryptoError, Encryptor};
use crate::store::StatsStore;
use crate::upload::{ArchiveClient, ArchiveError, TagFilter, APP_NAME};

/// Restore errors.
#[derive(Debug, thiserror::Error)]
pub enum RestoreError {
    #[error(transparent)]
    Archive(#[from] ArchiveError),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("snapshot document parse failed: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What the reconciliation decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// No snapshot found on the network
    NoBackup,
    /// Local row was newer than the snapshot
    KeptLocal,
    /// Counters were taken from the snapshot
    Restored,
}

/// Fetch, decrypt, and reconcile the newest snapshot. Also captures the
/// singleton row id (inserting the row when absent) and resets
/// `system_start_time` to `boot_ms`.
pub async fn restore_on_start(
    archive: &ArchiveClient,
    encryptor: &Encryptor,
    store: &StatsStore,
    boot_ms: i64,
) -> Result<RestoreOutcome, RestoreError> {
    // Local state before the row is (re)initialised for this boot.
    let local = store.load().await?;
    store.ensure_row(boot_ms).await?;

    let filters = [
        TagFilter {
            name: "App-Name".to_string(),
            value: APP_NAME.to_string(),
        },
        TagFilter {
            name: "Type".to_string(),
            value: "stats-backup".to_string(),
        },
    ];
    let Some(tx_id) = archive.query_latest(&filters).await? else {
        info!("No stats snapshot found on the archive network");
        return Ok(RestoreOutcome::NoBackup);
    };

    let sealed = archive.download(&tx_id).await?;
    let plaintext = encryptor.decrypt(&sealed, SNAPSHOT_KEY_ID)?;
    let document: SnapshotDocument = serde_json::from_slice(&plaintext)?;

    match local {
        Some(row) if row.updated_at >= document.timestamp => {
            info!(
                local_updated_at = row.updated_at,
                backup_timestamp = document.timestamp,
                "Local counters newer than snapshot — keeping local"
            );
            Ok(RestoreOutcome::KeptLocal)
        }
        Some(_) | None => {
            store.save(&document.stats, boot_ms).await?;
            info!(
                tx_id = %tx_id,
                backup_timestamp = document.timestamp,
                "Counters restored from archived snapshot"
            );
            Ok(RestoreOutcome::Restored)
        }
    }
}

/// Log-and-continue wrapper: a dead gateway must not stop the node from
/// booting with whatever local state it has.
pub async fn restore_on_start_best_effort(
    archive: &ArchiveClient,
    encryptor: &Encryptor,
    store: &StatsStore,
    boot_ms: i64,
) -> RestoreOutcome {
    match restore_on_start(archive, encryptor, store, boot_ms).await {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(error = %e, "Snapshot restore failed — continuing with local counters");
            // The row may not have been initialised if the failure came first.
            if let Err(e) = store.ensure_row(boot_ms).await {
                warn!(error = %e, "Failed to initialise stats row after restore failure");
            }
            RestoreOutcome::NoBackup
        }
    }
}
