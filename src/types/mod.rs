//! Core data types shared across the ingest and archive pipeline.

mod events;
mod observation;
mod stats;

pub use events::{Batch, BatchItem, ChangeEvent, ChangeKind, MAX_AIRCRAFT_PER_BATCH};
pub use observation::{AircraftObservation, FeedSnapshot};
pub use stats::StatsSnapshot;
