//! AeroVault: aircraft-telemetry ingest and permanent archive
//!
//! Receiver-node engine that polls a live ADS-B aircraft feed, detects
//! per-aircraft changes, and archives every change batch twice — once in
//! the clear as Parquet, once authenticated-encrypted — on a
//! content-addressed permanent-storage network.
//!
//! ## Architecture
//!
//! - **Tracker**: poll loop, fingerprint diffing, state cache, batching
//! - **Encode**: fixed aviation Parquet schema, LZ4, tmpfs scratch files
//! - **Crypto**: minute-rotated HKDF/AES-256-GCM keys, key-share escrow
//! - **Upload**: two 5-slot retry pipelines and the signed gateway client
//! - **Store**: SQLite archive records, per-aircraft tracks, counter row
//! - **Stats**: live counters, TPM window, snapshot backup and restore

pub mod acquisition;
pub mod api;
pub mod backup;
pub mod config;
pub mod crypto;
pub mod encode;
pub mod registration;
pub mod stats;
pub mod store;
pub mod tracker;
pub mod types;
pub mod upload;

// Re-export the node configuration
pub use config::AppConfig;

// Re-export commonly used types
pub use types::{
    AircraftObservation, Batch, BatchItem, ChangeEvent, ChangeKind, FeedSnapshot, StatsSnapshot,
    MAX_AIRCRAFT_PER_BATCH,
};

// Re-export the tracker surface
pub use tracker::{classify, fingerprint, Orchestrator, PackageUuidRegistry, StateCache};

// Re-export crypto services
pub use crypto::{Encryptor, KeyShareClient};

// Re-export the upload surface
pub use upload::{ArchiveClient, ClearUploader, EncryptedUploader, UploadPipeline, Wallet};

// Re-export stats services
pub use stats::{PipelineKind, StatsBroadcaster, StatsRegister};
