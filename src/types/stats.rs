//! Serializable counter snapshot.
//!
//! The live register (`stats::StatsRegister`) owns the atomic counters; this
//! struct is the frozen view used for persistence, the snapshot backup
//! document, and restore reconciliation. The 13 counters here are exactly
//! the set the snapshot backup carries.

use serde::{Deserialize, Serialize};

/// Frozen view of the system counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Feed polls performed
    pub total_polls: u64,

    /// Clear pipeline accounting
    pub clear_attempted: u64,
    pub clear_succeeded: u64,
    pub clear_failed: u64,
    pub clear_retries: u64,

    /// Encrypted pipeline accounting
    pub enc_attempted: u64,
    pub enc_succeeded: u64,
    pub enc_failed: u64,
    pub enc_retries: u64,

    /// Aircraft accounting
    pub aircraft_new: u64,
    pub aircraft_updated: u64,
    pub aircraft_reappeared: u64,

    /// Highest transactions-per-minute observed
    pub peak_tpm: u64,
}

impl StatsSnapshot {
    /// Total uploads attempted across both pipelines.
    pub fn total_attempted(&self) -> u64 {
        self.clear_attempted + self.enc_attempted
    }

    /// Total uploads succeeded across both pipelines.
    pub fn total_succeeded(&self) -> u64 {
        self.clear_succeeded + self.enc_succeeded
    }
}
