//! Counter self-preservation — periodic encrypted snapshots to the archive
//! network, and boot-time restore from the newest one.

mod restore;
mod snapshot;

pub use restore::{
    restore_on_start, restore_on_start_best_effort, RestoreError, RestoreOutcome,
};
pub use snapshot::{
    backup_once, run_snapshot_backup, BackupError, SnapshotDocument, SNAPSHOT_KEY_ID,
};
