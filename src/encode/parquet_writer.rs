//! Parquet batch writer.
//!
//! Rows are precomputed from every observation first, then appended column
//! by column. The file is written to tmpfs when the host has one
//! (`/dev/shm`), read back into memory immediately after close, and deleted
//! as soon as the bytes are resident — nothing lingers on disk.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int32Builder, Int64Builder, StringBuilder,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use tracing::debug;

use super::sanitize::{safe_boolean, safe_f64, safe_i32, safe_number, safe_string};
use super::schema::aviation_schema;
use crate::types::{Batch, BatchItem};

/// Encoding errors.
#[derive(Debug, thiserror::Error)]
pub enum EncodeError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
    #[error("parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),
    #[error("refusing to encode an empty batch")]
    EmptyBatch,
}

/// An encoded batch, fully resident in memory.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub bytes: Vec<u8>,
    pub file_size_kb: f64,
    pub row_count: usize,
}

/// One precomputed row, field order matching [`aviation_schema`].
#[derive(Debug, Default)]
struct Row {
    snapshot_timestamp: i64,
    icao_address: String,
    snapshot_total_messages: i32,
    callsign: Option<String>,
    registration: Option<String>,
    aircraft_type: Option<String>,
    type_description: Option<String>,
    emitter_category: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    position_source: Option<String>,
    altitude_baro_ft: Option<i32>,
    altitude_geom_ft: Option<i32>,
    vertical_rate_baro_fpm: Option<i32>,
    vertical_rate_geom_fpm: Option<i32>,
    ground_speed_kts: Option<f64>,
    indicated_airspeed_kts: Option<i32>,
    true_airspeed_kts: Option<i32>,
    mach_number: Option<f64>,
    track_degrees: Option<f64>,
    track_rate_deg_sec: Option<f64>,
    magnetic_heading_degrees: Option<f64>,
    true_heading_degrees: Option<f64>,
    roll_degrees: Option<f64>,
    wind_direction_degrees: Option<i32>,
    wind_speed_kts: Option<i32>,
    outside_air_temp_c: Option<i32>,
    total_air_temp_c: Option<i32>,
    nav_qnh_mb: Option<f64>,
    nav_heading_degrees: Option<f64>,
    nav_altitude_mcp_ft: Option<i32>,
    nav_altitude_fms_ft: Option<i32>,
    squawk_code: Option<String>,
    emergency_status: Option<String>,
    spi_flag: Option<bool>,
    alert_flag: Option<bool>,
    adsb_version: Option<i32>,
    navigation_integrity_category: Option<i32>,
    navigation_accuracy_position: Option<i32>,
    navigation_accuracy_velocity: Option<i32>,
    source_integrity_level: Option<i32>,
    geometric_vertical_accuracy: Option<i32>,
    system_design_assurance: Option<i32>,
    nic_baro: Option<i32>,
    radius_of_containment: Option<i32>,
    source_integrity_level_type: Option<String>,
    messages_received: Option<i64>,
    last_seen_seconds: Option<f64>,
    last_position_seen_seconds: Option<f64>,
    rssi_dbm: Option<f64>,
    distance_from_receiver_nm: Option<f64>,
    bearing_from_receiver_degrees: Option<f64>,
    database_flags: Option<i32>,
}

impl Row {
    fn from_item(item: &BatchItem) -> Self {
        let obs = &item.observation;
        Self {
            snapshot_timestamp: item.snapshot_seconds * 1000,
            icao_address: item.hex.clone(),
            snapshot_total_messages: item.total_messages as i32,
            callsign: safe_string(obs.flight.as_deref()),
            registration: safe_string(obs.r.as_deref()),
            aircraft_type: safe_string(obs.t.as_deref()),
            type_description: safe_string(obs.desc.as_deref()),
            emitter_category: safe_string(obs.category.as_deref()),
            latitude: safe_f64(obs.lat),
            longitude: safe_f64(obs.lon),
            position_source: safe_string(obs.source_type.as_deref()),
            altitude_baro_ft: safe_number(obs.alt_baro.as_ref()).map(|v| v as i32),
            altitude_geom_ft: safe_i32(obs.alt_geom),
            vertical_rate_baro_fpm: safe_i32(obs.baro_rate),
            vertical_rate_geom_fpm: safe_i32(obs.geom_rate),
            ground_speed_kts: safe_f64(obs.gs),
            indicated_airspeed_kts: safe_i32(obs.ias),
            true_airspeed_kts: safe_i32(obs.tas),
            mach_number: safe_f64(obs.mach),
            track_degrees: safe_f64(obs.track),
            track_rate_deg_sec: safe_f64(obs.track_rate),
            magnetic_heading_degrees: safe_f64(obs.mag_heading),
            true_heading_degrees: safe_f64(obs.true_heading),
            roll_degrees: safe_f64(obs.roll),
            wind_direction_degrees: safe_i32(obs.wd),
            wind_speed_kts: safe_i32(obs.ws),
            outside_air_temp_c: safe_i32(obs.oat),
            total_air_temp_c: safe_i32(obs.tat),
            nav_qnh_mb: safe_f64(obs.nav_qnh),
            nav_heading_degrees: safe_f64(obs.nav_heading),
            nav_altitude_mcp_ft: safe_i32(obs.nav_altitude_mcp),
            nav_altitude_fms_ft: safe_i32(obs.nav_altitude_fms),
            squawk_code: safe_string(obs.squawk.as_deref()),
            emergency_status: safe_string(obs.emergency.as_deref()),
            spi_flag: safe_boolean(obs.spi.as_ref()),
            alert_flag: safe_boolean(obs.alert.as_ref()),
            adsb_version: obs.version,
            navigation_integrity_category: obs.nic,
            navigation_accuracy_position: obs.nac_p,
            navigation_accuracy_velocity: obs.nac_v,
            source_integrity_level: obs.sil,
            geometric_vertical_accuracy: obs.gva,
            system_design_assurance: obs.sda,
            nic_baro: obs.nic_baro,
            radius_of_containment: obs.rc,
            source_integrity_level_type: safe_string(obs.sil_type.as_deref()),
            messages_received: obs.messages,
            last_seen_seconds: safe_f64(obs.seen),
            last_position_seen_seconds: safe_f64(obs.seen_pos),
            rssi_dbm: safe_f64(obs.rssi),
            distance_from_receiver_nm: safe_f64(obs.dst),
            bearing_from_receiver_degrees: safe_f64(obs.dir),
            database_flags: obs.db_flags,
        }
    }
}

/// Encode a batch into an in-memory Parquet file.
pub fn encode_batch(batch: &Batch) -> Result<EncodedBatch, EncodeError> {
    if batch.items.is_empty() {
        return Err(EncodeError::EmptyBatch);
    }

    let rows: Vec<Row> = batch.items.iter().map(Row::from_item).collect();
    let record_batch = build_record_batch(&rows)?;

    let path = scratch_path(&batch.batch_id);
    let result = write_and_read_back(&path, &record_batch);
    // The scratch file must not outlive this call, success or not.
    let _ = std::fs::remove_file(&path);
    let bytes = result?;

    let encoded = EncodedBatch {
        file_size_kb: bytes.len() as f64 / 1024.0,
        row_count: rows.len(),
        bytes,
    };
    debug!(
        batch_id = %batch.batch_id,
        rows = encoded.row_count,
        kb = format!("{:.2}", encoded.file_size_kb),
        "Encoded batch"
    );
    Ok(encoded)
}

fn write_and_read_back(path: &PathBuf, record_batch: &RecordBatch) -> Result<Vec<u8>, EncodeError> {
    let file = File::create(path)?;
    let props = WriterProperties::builder()
        .set_compression(Compression::LZ4_RAW)
        .build();
    let mut writer = ArrowWriter::try_new(file, record_batch.schema(), Some(props))?;
    writer.write(record_batch)?;
    writer.close()?;

    Ok(std::fs::read(path)?)
}

/// Scratch location for the transient Parquet file: tmpfs when available.
fn scratch_path(batch_id: &str) -> PathBuf {
    let shm = PathBuf::from("/dev/shm");
    let dir = if shm.is_dir() {
        shm
    } else {
        std::env::temp_dir()
    };
    dir.join(format!("aerovault-{batch_id}.parquet"))
}

fn build_record_batch(rows: &[Row]) -> Result<RecordBatch, arrow::error::ArrowError> {
    let mut snapshot_timestamp = Int64Builder::new();
    let mut icao_address = StringBuilder::new();
    let mut snapshot_total_messages = Int32Builder::new();
    let mut callsign = StringBuilder::new();
    let mut registration = StringBuilder::new();
    let mut aircraft_type = StringBuilder::new();
    let mut type_description = StringBuilder::new();
    let mut emitter_category = StringBuilder::new();
    let mut latitude = Float64Builder::new();
    let mut longitude = Float64Builder::new();
    let mut position_source = StringBuilder::new();
    let mut altitude_baro_ft = Int32Builder::new();
    let mut altitude_geom_ft = Int32Builder::new();
    let mut vertical_rate_baro_fpm = Int32Builder::new();
    let mut vertical_rate_geom_fpm = Int32Builder::new();
    let mut ground_speed_kts = Float64Builder::new();
    let mut indicated_airspeed_kts = Int32Builder::new();
    let mut true_airspeed_kts = Int32Builder::new();
    let mut mach_number = Float64Builder::new();
    let mut track_degrees = Float64Builder::new();
    let mut track_rate_deg_sec = Float64Builder::new();
    let mut magnetic_heading_degrees = Float64Builder::new();
    let mut true_heading_degrees = Float64Builder::new();
    let mut roll_degrees = Float64Builder::new();
    let mut wind_direction_degrees = Int32Builder::new();
    let mut wind_speed_kts = Int32Builder::new();
    let mut outside_air_temp_c = Int32Builder::new();
    let mut total_air_temp_c = Int32Builder::new();
    let mut nav_qnh_mb = Float64Builder::new();
    let mut nav_heading_degrees = Float64Builder::new();
    let mut nav_altitude_mcp_ft = Int32Builder::new();
    let mut nav_altitude_fms_ft = Int32Builder::new();
    let mut squawk_code = StringBuilder::new();
    let mut emergency_status = StringBuilder::new();
    let mut spi_flag = BooleanBuilder::new();
    let mut alert_flag = BooleanBuilder::new();
    let mut adsb_version = Int32Builder::new();
    let mut navigation_integrity_category = Int32Builder::new();
    let mut navigation_accuracy_position = Int32Builder::new();
    let mut navigation_accuracy_velocity = Int32Builder::new();
    let mut source_integrity_level = Int32Builder::new();
    let mut geometric_vertical_accuracy = Int32Builder::new();
    let mut system_design_assurance = Int32Builder::new();
    let mut nic_baro = Int32Builder::new();
    let mut radius_of_containment = Int32Builder::new();
    let mut source_integrity_level_type = StringBuilder::new();
    let mut messages_received = Int64Builder::new();
    let mut last_seen_seconds = Float64Builder::new();
    let mut last_position_seen_seconds = Float64Builder::new();
    let mut rssi_dbm = Float64Builder::new();
    let mut distance_from_receiver_nm = Float64Builder::new();
    let mut bearing_from_receiver_degrees = Float64Builder::new();
    let mut database_flags = Int32Builder::new();

    for row in rows {
        snapshot_timestamp.append_value(row.snapshot_timestamp);
        icao_address.append_value(&row.icao_address);
        snapshot_total_messages.append_value(row.snapshot_total_messages);
        callsign.append_option(row.callsign.as_deref());
        registration.append_option(row.registration.as_deref());
        aircraft_type.append_option(row.aircraft_type.as_deref());
        type_description.append_option(row.type_description.as_deref());
        emitter_category.append_option(row.emitter_category.as_deref());
        latitude.append_option(row.latitude);
        longitude.append_option(row.longitude);
        position_source.append_option(row.position_source.as_deref());
        altitude_baro_ft.append_option(row.altitude_baro_ft);
        altitude_geom_ft.append_option(row.altitude_geom_ft);
        vertical_rate_baro_fpm.append_option(row.vertical_rate_baro_fpm);
        vertical_rate_geom_fpm.append_option(row.vertical_rate_geom_fpm);
        ground_speed_kts.append_option(row.ground_speed_kts);
        indicated_airspeed_kts.append_option(row.indicated_airspeed_kts);
        true_airspeed_kts.append_option(row.true_airspeed_kts);
        mach_number.append_option(row.mach_number);
        track_degrees.append_option(row.track_degrees);
        track_rate_deg_sec.append_option(row.track_rate_deg_sec);
        magnetic_heading_degrees.append_option(row.magnetic_heading_degrees);
        true_heading_degrees.append_option(row.true_heading_degrees);
        roll_degrees.append_option(row.roll_degrees);
        wind_direction_degrees.append_option(row.wind_direction_degrees);
        wind_speed_kts.append_option(row.wind_speed_kts);
        outside_air_temp_c.append_option(row.outside_air_temp_c);
        total_air_temp_c.append_option(row.total_air_temp_c);
        nav_qnh_mb.append_option(row.nav_qnh_mb);
        nav_heading_degrees.append_option(row.nav_heading_degrees);
        nav_altitude_mcp_ft.append_option(row.nav_altitude_mcp_ft);
        nav_altitude_fms_ft.append_option(row.nav_altitude_fms_ft);
        squawk_code.append_option(row.squawk_code.as_deref());
        emergency_status.append_option(row.emergency_status.as_deref());
        spi_flag.append_option(row.spi_flag);
        alert_flag.append_option(row.alert_flag);
        adsb_version.append_option(row.adsb_version);
        navigation_integrity_category.append_option(row.navigation_integrity_category);
        navigation_accuracy_position.append_option(row.navigation_accuracy_position);
        navigation_accuracy_velocity.append_option(row.navigation_accuracy_velocity);
        source_integrity_level.append_option(row.source_integrity_level);
        geometric_vertical_accuracy.append_option(row.geometric_vertical_accuracy);
        system_design_assurance.append_option(row.system_design_assurance);
        nic_baro.append_option(row.nic_baro);
        radius_of_containment.append_option(row.radius_of_containment);
        source_integrity_level_type.append_option(row.source_integrity_level_type.as_deref());
        messages_received.append_option(row.messages_received);
        last_seen_seconds.append_option(row.last_seen_seconds);
        last_position_seen_seconds.append_option(row.last_position_seen_seconds);
        rssi_dbm.append_option(row.rssi_dbm);
        distance_from_receiver_nm.append_option(row.distance_from_receiver_nm);
        bearing_from_receiver_degrees.append_option(row.bearing_from_receiver_degrees);
        database_flags.append_option(row.database_flags);
    }

    let arrays: Vec<ArrayRef> = vec![
        Arc::new(snapshot_timestamp.finish()),
        Arc::new(icao_address.finish()),
        Arc::new(snapshot_total_messages.finish()),
        Arc::new(callsign.finish()),
        Arc::new(registration.finish()),
        Arc::new(aircraft_type.finish()),
        Arc::new(type_description.finish()),
        Arc::new(emitter_category.finish()),
        Arc::new(latitude.finish()),
        Arc::new(longitude.finish()),
        Arc::new(position_source.finish()),
        Arc::new(altitude_baro_ft.finish()),
        Arc::new(altitude_geom_ft.finish()),
        Arc::new(vertical_rate_baro_fpm.finish()),
        Arc::new(vertical_rate_geom_fpm.finish()),
        Arc::new(ground_speed_kts.finish()),
        Arc::new(indicated_airspeed_kts.finish()),
        Arc::new(true_airspeed_kts.finish()),
        Arc::new(mach_number.finish()),
        Arc::new(track_degrees.finish()),
        Arc::new(track_rate_deg_sec.finish()),
        Arc::new(magnetic_heading_degrees.finish()),
        Arc::new(true_heading_degrees.finish()),
        Arc::new(roll_degrees.finish()),
        Arc::new(wind_direction_degrees.finish()),
        Arc::new(wind_speed_kts.finish()),
        Arc::new(outside_air_temp_c.finish()),
        Arc::new(total_air_temp_c.finish()),
        Arc::new(nav_qnh_mb.finish()),
        Arc::new(nav_heading_degrees.finish()),
        Arc::new(nav_altitude_mcp_ft.finish()),
        Arc::new(nav_altitude_fms_ft.finish()),
        Arc::new(squawk_code.finish()),
        Arc::new(emergency_status.finish()),
        Arc::new(spi_flag.finish()),
        Arc::new(alert_flag.finish()),
        Arc::new(adsb_version.finish()),
        Arc::new(navigation_integrity_category.finish()),
        Arc::new(navigation_accuracy_position.finish()),
        Arc::new(navigation_accuracy_velocity.finish()),
        Arc::new(source_integrity_level.finish()),
        Arc::new(geometric_vertical_accuracy.finish()),
        Arc::new(system_design_assurance.finish()),
        Arc::new(nic_baro.finish()),
        Arc::new(radius_of_containment.finish()),
        Arc::new(source_integrity_level_type.finish()),
        Arc::new(messages_received.finish()),
        Arc::new(last_seen_seconds.finish()),
        Arc::new(last_position_seen_seconds.finish()),
        Arc::new(rssi_dbm.finish()),
        Arc::new(distance_from_receiver_nm.finish()),
        Arc::new(bearing_from_receiver_degrees.finish()),
        Arc::new(database_flags.finish()),
    ];

    RecordBatch::try_new(aviation_schema(), arrays)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Batch;

    fn sample_batch() -> Batch {
        let obs: crate::types::AircraftObservation = serde_json::from_value(serde_json::json!({
            "hex": "48436b",
            "flight": "KLM855  ",
            "lat": 40.9258,
            "lon": 47.0615,
            "alt_baro": 37000,
            "gs": 575.3,
            "track": 77.65,
            "squawk": "6025",
            "emergency": "none",
            "spi": 0,
            "messages": 4123,
            "seen": 0.2,
            "rssi": -21.5
        }))
        .unwrap();

        Batch {
            items: vec![BatchItem {
                hex: "48436b".to_string(),
                observation: obs,
                snapshot_seconds: 1_751_069_515,
                total_messages: 1,
            }],
            package_uuid: "test-uuid".to_string(),
            batch_id: "1751069515-48436b-0".to_string(),
            snapshot_seconds: 1_751_069_515,
            source: "ant-1".to_string(),
        }
    }

    #[test]
    fn test_encode_produces_parquet_magic() {
        let encoded = encode_batch(&sample_batch()).unwrap();
        assert_eq!(encoded.row_count, 1);
        assert!(encoded.bytes.len() > 8);
        assert_eq!(&encoded.bytes[0..4], b"PAR1");
        assert_eq!(&encoded.bytes[encoded.bytes.len() - 4..], b"PAR1");
        assert!(encoded.file_size_kb > 0.0);
    }

    #[test]
    fn test_scratch_file_is_deleted() {
        let batch = sample_batch();
        encode_batch(&batch).unwrap();
        assert!(!scratch_path(&batch.batch_id).exists());
    }

    #[test]
    fn test_empty_batch_rejected() {
        let mut batch = sample_batch();
        batch.items.clear();
        assert!(matches!(encode_batch(&batch), Err(EncodeError::EmptyBatch)));
    }

    #[test]
    fn test_ground_altitude_encodes_as_null() {
        let mut batch = sample_batch();
        batch.items[0].observation.alt_baro = Some(serde_json::json!("ground"));
        // A null key column would fail RecordBatch validation; ground altitude
        // lands in a nullable column and must not.
        let encoded = encode_batch(&batch).unwrap();
        assert_eq!(encoded.row_count, 1);
    }
}
