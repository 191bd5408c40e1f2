//! Fingerprinter — fast change detection for aircraft observations.
//!
//! Hashes a fixed projection of the observation with xxHash64. The projection
//! covers the fields whose movement means "this aircraft changed":
//! `lat|lon|alt_baro|alt_geom|gs|track|baro_rate|squawk|emergency|flight`.
//! Missing fields render as empty substrings, so presence changes also
//! change the hash. Not cryptographic, deterministic by construction.

use serde_json::Value;
use xxhash_rust::xxh64::xxh64;

use crate::types::AircraftObservation;

/// 64-bit fingerprint over the observation's tracked fields.
pub fn fingerprint(obs: &AircraftObservation) -> u64 {
    let canonical = canonical_projection(obs);
    xxh64(canonical.as_bytes(), 0)
}

/// The canonical `|`-joined projection string the fingerprint hashes.
fn canonical_projection(obs: &AircraftObservation) -> String {
    format!(
        "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
        fmt_num(obs.lat),
        fmt_num(obs.lon),
        fmt_alt(obs.alt_baro.as_ref()),
        fmt_num(obs.alt_geom),
        fmt_num(obs.gs),
        fmt_num(obs.track),
        fmt_num(obs.baro_rate),
        obs.squawk.as_deref().unwrap_or(""),
        obs.emergency.as_deref().unwrap_or(""),
        obs.flight.as_deref().unwrap_or(""),
    )
}

fn fmt_num(v: Option<f64>) -> String {
    v.map(|n| n.to_string()).unwrap_or_default()
}

fn fmt_alt(v: Option<&Value>) -> String {
    match v {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}
