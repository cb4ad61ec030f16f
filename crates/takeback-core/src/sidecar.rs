//! Parsed sidecar JSON records: declared title, capture timestamps, and the
//! two GPS blocks. Malformed files never fail the pipeline; they just
//! contribute no data.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::warn;

/// Epoch seconds for 2030-01-01; sidecar timestamps past this are suspect.
pub const MAX_SANE_TIMESTAMP: i64 = 1_893_456_000;
/// Sidecar timestamps before the epoch are equally suspect.
pub const MIN_SANE_TIMESTAMP: i64 = 0;

/// A coordinate is real unless both axes sit on Null Island. A zero
/// latitude (equator) or zero longitude (prime meridian) alone is valid.
pub fn gps_is_valid(lat: f64, lon: f64) -> bool {
    !(lat.abs() < 1e-4 && lon.abs() < 1e-4)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsCoord {
    pub lat: f64,
    pub lon: f64,
    pub alt: f64,
}

/// Which sidecar block a coordinate came from. `Exif` data was carried over
/// from the original camera EXIF and is preferred over service-derived
/// `Data`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoBlock {
    Exif,
    Data,
}

#[derive(Debug, Clone)]
pub struct SidecarRecord {
    pub path: PathBuf,
    json: Value,
}

impl SidecarRecord {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes = fs::read(path)?;
        let json: Value = serde_json::from_slice(&bytes)?;
        Ok(Self { path: path.to_path_buf(), json })
    }

    #[cfg(test)]
    pub fn from_value(path: &Path, json: Value) -> Self {
        Self { path: path.to_path_buf(), json }
    }

    /// The declared true original filename.
    pub fn title(&self) -> Option<&str> {
        self.json.get("title").and_then(Value::as_str)
    }

    /// Capture timestamp in Unix seconds: `photoTakenTime` preferred,
    /// `creationTime` as fallback. Values outside the sane range are still
    /// returned, with a warning.
    pub fn timestamp(&self) -> Option<i64> {
        let raw = non_empty_timestamp(&self.json, "photoTakenTime")
            .or_else(|| non_empty_timestamp(&self.json, "creationTime"))?;
        let seconds = parse_epoch(raw)?;

        if seconds < MIN_SANE_TIMESTAMP {
            warn!(
                sidecar = %self.path.display(),
                seconds,
                "sidecar timestamp predates 1970"
            );
        } else if seconds > MAX_SANE_TIMESTAMP {
            warn!(
                sidecar = %self.path.display(),
                seconds,
                "sidecar timestamp is after 2030"
            );
        }
        Some(seconds)
    }

    /// First valid coordinate among the GPS blocks, `geoDataExif` before
    /// `geoData`. A block whose values fail numeric conversion, or which
    /// sits on Null Island, is skipped in favor of the next one.
    pub fn valid_gps(&self) -> Option<(GpsCoord, GeoBlock)> {
        for (field, block) in [("geoDataExif", GeoBlock::Exif), ("geoData", GeoBlock::Data)] {
            let Some(geo) = self.json.get(field).filter(|v| v.is_object()) else {
                continue;
            };
            let Some(coord) = parse_geo_block(geo) else {
                continue;
            };
            if gps_is_valid(coord.lat, coord.lon) {
                return Some((coord, block));
            }
        }
        None
    }
}

fn non_empty_timestamp<'a>(json: &'a Value, field: &str) -> Option<&'a Value> {
    let ts = json.get(field)?.get("timestamp")?;
    match ts {
        Value::String(s) if s.is_empty() => None,
        Value::Null => None,
        other => Some(other),
    }
}

fn parse_epoch(value: &Value) -> Option<i64> {
    match value {
        Value::String(s) => s.trim().parse::<i64>().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

/// A missing axis defaults to 0 (and a lone present axis therefore keeps
/// the other at 0); any non-numeric value fails the whole block.
fn parse_geo_block(geo: &Value) -> Option<GpsCoord> {
    Some(GpsCoord {
        lat: parse_axis(geo.get("latitude"))?,
        lon: parse_axis(geo.get("longitude"))?,
        alt: parse_axis(geo.get("altitude"))?,
    })
}

fn parse_axis(value: Option<&Value>) -> Option<f64> {
    match value {
        None => Some(0.0),
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(json: Value) -> SidecarRecord {
        SidecarRecord::from_value(Path::new("test.json"), json)
    }

    #[test]
    fn gps_validity_predicate() {
        assert!(gps_is_valid(0.0, 100.0));
        assert!(gps_is_valid(51.5, 0.0));
        assert!(gps_is_valid(-33.9, 151.2));
        assert!(!gps_is_valid(0.0, 0.0));
        assert!(!gps_is_valid(0.00001, 0.00001));
    }

    #[test]
    fn timestamp_prefers_photo_taken_time() {
        let r = record(json!({
            "photoTakenTime": {"timestamp": "1589132340"},
            "creationTime": {"timestamp": "1700000000"},
        }));
        assert_eq!(r.timestamp(), Some(1_589_132_340));
    }

    #[test]
    fn timestamp_falls_back_to_creation_time() {
        let r = record(json!({"creationTime": {"timestamp": "1628503872"}}));
        assert_eq!(r.timestamp(), Some(1_628_503_872));

        let r = record(json!({
            "photoTakenTime": {"timestamp": ""},
            "creationTime": {"timestamp": "1628503872"},
        }));
        assert_eq!(r.timestamp(), Some(1_628_503_872));
    }

    #[test]
    fn timestamp_accepts_numeric_values() {
        let r = record(json!({"photoTakenTime": {"timestamp": 1589132340}}));
        assert_eq!(r.timestamp(), Some(1_589_132_340));
    }

    #[test]
    fn timestamp_out_of_range_still_returned() {
        let r = record(json!({"photoTakenTime": {"timestamp": "1993456000"}}));
        assert_eq!(r.timestamp(), Some(1_993_456_000));
        let r = record(json!({"photoTakenTime": {"timestamp": "-5"}}));
        assert_eq!(r.timestamp(), Some(-5));
    }

    #[test]
    fn timestamp_missing_or_garbage() {
        assert_eq!(record(json!({})).timestamp(), None);
        assert_eq!(
            record(json!({"photoTakenTime": {"timestamp": "soon"}})).timestamp(),
            None
        );
    }

    #[test]
    fn gps_prefers_geo_data_exif() {
        let r = record(json!({
            "geoDataExif": {"latitude": 51.5, "longitude": -0.12, "altitude": 11.0},
            "geoData": {"latitude": 48.8, "longitude": 2.35, "altitude": 35.0},
        }));
        let (coord, block) = r.valid_gps().unwrap();
        assert_eq!(block, GeoBlock::Exif);
        assert_eq!(coord.lat, 51.5);
    }

    #[test]
    fn null_island_block_falls_through() {
        let r = record(json!({
            "geoDataExif": {"latitude": 0.0, "longitude": 0.0, "altitude": 0.0},
            "geoData": {"latitude": -33.9, "longitude": 151.2, "altitude": 5.0},
        }));
        let (coord, block) = r.valid_gps().unwrap();
        assert_eq!(block, GeoBlock::Data);
        assert_eq!(coord.lon, 151.2);
    }

    #[test]
    fn string_coordinates_convert() {
        let r = record(json!({
            "geoData": {"latitude": "40.7128", "longitude": "-74.0060", "altitude": "10"},
        }));
        let (coord, block) = r.valid_gps().unwrap();
        assert_eq!(block, GeoBlock::Data);
        assert!((coord.lat - 40.7128).abs() < 1e-9);
        assert!((coord.lon + 74.0060).abs() < 1e-9);
    }

    #[test]
    fn unconvertible_block_tries_next_source() {
        let r = record(json!({
            "geoDataExif": {"latitude": "north-ish", "longitude": 10.0, "altitude": 0},
            "geoData": {"latitude": 10.0, "longitude": 20.0, "altitude": 0},
        }));
        let (coord, block) = r.valid_gps().unwrap();
        assert_eq!(block, GeoBlock::Data);
        assert_eq!(coord.lat, 10.0);
    }

    #[test]
    fn single_axis_defaults_other_to_zero() {
        // Preserved behavior: a lone longitude keeps latitude at 0, which is
        // a valid equator coordinate.
        let r = record(json!({"geoData": {"longitude": 100.0}}));
        let (coord, _) = r.valid_gps().unwrap();
        assert_eq!(coord.lat, 0.0);
        assert_eq!(coord.lon, 100.0);
        assert_eq!(coord.alt, 0.0);
    }

    #[test]
    fn no_gps_blocks_means_none() {
        assert!(record(json!({})).valid_gps().is_none());
        assert!(record(json!({"geoData": {}})).valid_gps().is_none());
    }

    #[test]
    fn title_accessor() {
        let r = record(json!({"title": "IMG_1234.JPG(15)"}));
        assert_eq!(r.title(), Some("IMG_1234.JPG(15)"));
        assert_eq!(record(json!({})).title(), None);
    }
}
