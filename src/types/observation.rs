//! Aircraft feed records.
//!
//! The feed is a readsb-style `aircraft.json`: a bag of optional fields per
//! aircraft, keyed by short wire names. Fields the archive schema does not
//! know about are ignored during parsing. `alt_baro` is special-cased as a
//! raw JSON value because the feed emits the literal string `"ground"` for
//! aircraft on the surface.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One poll of the aircraft feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedSnapshot {
    /// Feed-reported wall clock, unix seconds
    pub now: f64,
    /// Total messages decoded by the receiver since start
    #[serde(default)]
    pub messages: i64,
    /// Live aircraft table
    #[serde(default)]
    pub aircraft: Vec<AircraftObservation>,
}

impl FeedSnapshot {
    /// Feed timestamp truncated to whole seconds.
    pub fn snapshot_seconds(&self) -> i64 {
        self.now as i64
    }
}

/// A single aircraft state record as observed by the receiver.
///
/// All fields except `hex` are optional; the struct tolerates unknown extra
/// fields. Numeric fields keep the feed's units (feet, knots, degrees).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AircraftObservation {
    /// 24-bit ICAO address, lowercase hex — the aircraft identity
    #[serde(default)]
    pub hex: String,

    /// Position-source discriminator (`adsb_icao`, `mlat`, `tisb_icao`, …)
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub source_type: Option<String>,

    /// Callsign, space-padded on the wire
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flight: Option<String>,

    /// Registration (tail number)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub r: Option<String>,

    /// ICAO type code (e.g. `B738`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Long type description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,

    /// Emitter category (`A0`–`D7`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,

    /// Barometric altitude in feet, or the literal string `"ground"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_baro: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_geom: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baro_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geom_rate: Option<f64>,

    /// Ground speed in knots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gs: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ias: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tas: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mach: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mag_heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<f64>,

    /// Wind direction in degrees (derived by the receiver)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wd: Option<f64>,
    /// Wind speed in knots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ws: Option<f64>,
    /// Outside air temperature, °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oat: Option<f64>,
    /// Total air temperature, °C
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tat: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_qnh: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_heading: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_altitude_mcp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nav_altitude_fms: Option<f64>,

    /// Transponder code as a string (leading zeros matter)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub squawk: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub emergency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spi: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<Value>,

    /// ADS-B protocol version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nic: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nac_p: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nac_v: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sil: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sil_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gva: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sda: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nic_baro: Option<i32>,
    /// Radius of containment in meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rc: Option<i32>,

    /// Messages received from this aircraft
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<i64>,
    /// Seconds since any message was received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen: Option<f64>,
    /// Seconds since the last position update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_pos: Option<f64>,
    /// Signal strength, dBFS
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,

    /// Distance from the receiver, nautical miles
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst: Option<f64>,
    /// Bearing from the receiver, degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<f64>,

    /// Aircraft-database flags bitfield
    #[serde(rename = "dbFlags", default, skip_serializing_if = "Option::is_none")]
    pub db_flags: Option<i32>,
}

impl AircraftObservation {
    /// Trimmed callsign, None when absent or blank.
    pub fn callsign(&self) -> Option<&str> {
        self.flight
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// Barometric altitude in feet; None for `"ground"` or absent.
    pub fn alt_baro_ft(&self) -> Option<f64> {
        match &self.alt_baro {
            Some(Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_readsb_record() {
        let json = serde_json::json!({
            "hex": "48436b",
            "type": "adsb_icao",
            "flight": "KLM855  ",
            "r": "PH-BHA",
            "t": "B789",
            "alt_baro": 37000,
            "gs": 575.3,
            "track": 77.65,
            "squawk": "6025",
            "emergency": "none",
            "lat": 40.9258,
            "lon": 47.0615,
            "messages": 4123,
            "seen": 0.2,
            "rssi": -21.5,
            "some_future_field": {"nested": true}
        });

        let obs: AircraftObservation = serde_json::from_value(json).unwrap();
        assert_eq!(obs.hex, "48436b");
        assert_eq!(obs.callsign(), Some("KLM855"));
        assert_eq!(obs.alt_baro_ft(), Some(37000.0));
        assert_eq!(obs.source_type.as_deref(), Some("adsb_icao"));
    }

    #[test]
    fn test_ground_altitude_is_none() {
        let obs: AircraftObservation =
            serde_json::from_value(serde_json::json!({"hex": "abc123", "alt_baro": "ground"}))
                .unwrap();
        assert_eq!(obs.alt_baro_ft(), None);
    }

    #[test]
    fn test_feed_snapshot_seconds_truncates() {
        let snap = FeedSnapshot {
            now: 1_751_069_515.8,
            messages: 1,
            aircraft: Vec::new(),
        };
        assert_eq!(snap.snapshot_seconds(), 1_751_069_515);
    }
}
