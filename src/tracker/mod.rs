//! Real-time aircraft tracking — fingerprinting, state, classification,
//! batching, and the poll loop that drives them.

mod batcher;
mod classifier;
mod fingerprint;
mod orchestrator;
mod state_cache;

pub use batcher::{Batcher, PackageUuidRegistry};
pub use classifier::{classify, TickOutcome};
pub use fingerprint::fingerprint;
pub use orchestrator::Orchestrator;
pub use state_cache::{StateCache, StateEntry, REAPPEAR_THRESHOLD_MS};
