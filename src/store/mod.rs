//! Local persistence — SQLite archive records, aircraft tracks, and the
//! singleton counter row.

mod archive_records;
mod db;
mod stats_store;
mod tracks;

pub use archive_records::{ArchiveRecordStore, NewArchiveRecord, NewEncryptedArchiveRecord};
pub use db::{create_pool, run_migrations};
#[cfg(test)]
pub(crate) use db::memory_pool;
pub use stats_store::{StatsRow, StatsStore};
pub use tracks::{TrackRow, TrackStore, TrackUpsert};
