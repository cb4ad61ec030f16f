//! Per-file metadata resolution: one authoritative capture timestamp and one
//! authoritative GPS coordinate, each chosen by walking an ordered list of
//! candidate sources and taking the first present value. Reordering a chain
//! is a data change, not a control-flow change.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime};
use tracing::debug;

use crate::exiftool::MetadataTool;
use crate::matcher::MatchResult;
use crate::sidecar::{GeoBlock, GpsCoord, SidecarRecord};

/// Where the authoritative timestamp came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSource {
    Embedded,
    PrimaryJson,
    Supplemental,
}

/// Where the authoritative GPS coordinate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GpsSource {
    /// The file already carries valid GPS; it is kept, never overwritten.
    EmbeddedExisting,
    SupplementalGeoExif,
    SupplementalGeoData,
}

/// Outcome of resolution for one media file. `taken == None` is the
/// `Unresolved` terminal state: no source had a usable timestamp, and no
/// filesystem-timestamp fallback is ever consulted.
#[derive(Debug, Clone)]
pub struct ResolvedMetadata {
    pub taken: Option<(NaiveDateTime, TimestampSource)>,
    pub gps: Option<(GpsCoord, GpsSource)>,
}

impl ResolvedMetadata {
    pub fn is_resolved(&self) -> bool {
        self.taken.is_some()
    }

    /// True when the resolved timestamp must be written back into the file
    /// (it came from a sidecar, not from the file itself).
    pub fn needs_timestamp_write(&self) -> bool {
        matches!(
            self.taken,
            Some((_, TimestampSource::PrimaryJson)) | Some((_, TimestampSource::Supplemental))
        )
    }

    /// True when a sidecar-sourced GPS coordinate must be written back.
    pub fn needs_gps_write(&self) -> bool {
        matches!(
            self.gps,
            Some((_, GpsSource::SupplementalGeoExif)) | Some((_, GpsSource::SupplementalGeoData))
        )
    }
}

/// Resolve the authoritative timestamp and GPS for one media file from its
/// embedded metadata and matched sidecars.
pub fn resolve(path: &Path, matched: &MatchResult, tool: &dyn MetadataTool) -> ResolvedMetadata {
    let taken = resolve_timestamp(path, matched, tool);
    let gps = resolve_gps(path, matched, tool);
    debug!(
        media = %path.display(),
        source = ?taken.as_ref().map(|(_, s)| *s),
        gps = ?gps.as_ref().map(|(_, s)| *s),
        "resolved metadata"
    );
    ResolvedMetadata { taken, gps }
}

fn resolve_timestamp(
    path: &Path,
    matched: &MatchResult,
    tool: &dyn MetadataTool,
) -> Option<(NaiveDateTime, TimestampSource)> {
    let sources: Vec<(TimestampSource, Box<dyn Fn() -> Option<NaiveDateTime> + '_>)> = vec![
        (
            TimestampSource::Embedded,
            Box::new(|| tool.read_capture_timestamp(path)),
        ),
        (
            TimestampSource::PrimaryJson,
            Box::new(|| first_sidecar_timestamp(&matched.primary)),
        ),
        (
            TimestampSource::Supplemental,
            Box::new(|| first_sidecar_timestamp(&matched.supplemental)),
        ),
    ];

    for (source, read) in &sources {
        if let Some(taken) = read() {
            return Some((taken, *source));
        }
    }
    None
}

/// First timestamp found across sidecars in sorted-path order. Records that
/// fail to load or carry no timestamp contribute nothing.
fn first_sidecar_timestamp(paths: &[PathBuf]) -> Option<NaiveDateTime> {
    let mut sorted: Vec<&PathBuf> = paths.iter().collect();
    sorted.sort();
    for path in sorted {
        let Ok(record) = SidecarRecord::load(path) else {
            continue;
        };
        if let Some(seconds) = record.timestamp() {
            if let Some(dt) = DateTime::from_timestamp(seconds, 0) {
                return Some(dt.naive_utc());
            }
        }
    }
    None
}

fn resolve_gps(
    path: &Path,
    matched: &MatchResult,
    tool: &dyn MetadataTool,
) -> Option<(GpsCoord, GpsSource)> {
    // A file that already carries a valid coordinate wins outright; nothing
    // is ever written over it.
    let embedded = tool.read_gps(path);
    if embedded.present && embedded.valid {
        let coord = GpsCoord { lat: embedded.lat, lon: embedded.lon, alt: 0.0 };
        return Some((coord, GpsSource::EmbeddedExisting));
    }

    let mut sorted: Vec<&PathBuf> = matched.supplemental.iter().collect();
    sorted.sort();
    for sidecar in sorted {
        let Ok(record) = SidecarRecord::load(sidecar) else {
            continue;
        };
        if let Some((coord, block)) = record.valid_gps() {
            let source = match block {
                GeoBlock::Exif => GpsSource::SupplementalGeoExif,
                GeoBlock::Data => GpsSource::SupplementalGeoData,
            };
            return Some((coord, source));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exiftool::testing::FakeTool;
    use crate::exiftool::GpsReading;
    use std::fs;
    use tempfile::tempdir;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").unwrap()
    }

    fn sidecar_with_timestamp(dir: &Path, name: &str, epoch: i64) -> PathBuf {
        let path = dir.join(name);
        fs::write(
            &path,
            format!(r#"{{"photoTakenTime": {{"timestamp": "{epoch}"}}}}"#),
        )
        .unwrap();
        path
    }

    #[test]
    fn embedded_always_wins_over_sidecars() {
        let dir = tempdir().unwrap();
        let primary = sidecar_with_timestamp(dir.path(), "a.jpg.json", 1_622_505_600); // 2021-06-01
        let matched = MatchResult { primary: vec![primary], supplemental: vec![] };

        let tool = FakeTool { timestamp: Some(dt("2020-05-10 17:39:00")), ..Default::default() };
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);

        let (taken, source) = resolved.taken.unwrap();
        assert_eq!(source, TimestampSource::Embedded);
        assert_eq!(taken, dt("2020-05-10 17:39:00"));
        assert!(!resolved.needs_timestamp_write());
    }

    #[test]
    fn primary_json_fills_missing_embedded() {
        let dir = tempdir().unwrap();
        let primary = sidecar_with_timestamp(dir.path(), "a.jpg.json", 1_622_505_600);
        let matched = MatchResult { primary: vec![primary], supplemental: vec![] };

        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);

        let (taken, source) = resolved.taken.unwrap();
        assert_eq!(source, TimestampSource::PrimaryJson);
        assert_eq!(taken, dt("2021-06-01 00:00:00"));
        assert!(resolved.needs_timestamp_write());
    }

    #[test]
    fn supplemental_is_last_timestamp_resort() {
        let dir = tempdir().unwrap();
        let supp =
            sidecar_with_timestamp(dir.path(), "a.jpg.supplemental-metadata.json", 1_628_503_872);
        let matched = MatchResult { primary: vec![], supplemental: vec![supp] };

        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);

        let (taken, source) = resolved.taken.unwrap();
        assert_eq!(source, TimestampSource::Supplemental);
        assert_eq!(taken, dt("2021-08-09 10:11:12"));
    }

    #[test]
    fn no_source_means_unresolved() {
        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &MatchResult::default(), &tool);
        assert!(!resolved.is_resolved());
        assert!(resolved.taken.is_none());
    }

    #[test]
    fn supplemental_iteration_is_path_sorted() {
        let dir = tempdir().unwrap();
        let b = sidecar_with_timestamp(dir.path(), "b.jpg.sup.json", 2_000_000_000);
        let a = sidecar_with_timestamp(dir.path(), "a.jpg.sup.json", 1_000_000_000);
        // Deliberately unsorted input order.
        let matched = MatchResult { primary: vec![], supplemental: vec![b, a] };

        let tool = FakeTool::default();
        let resolved = resolve(Path::new("x.jpg"), &matched, &tool);
        let (taken, _) = resolved.taken.unwrap();
        assert_eq!(taken, DateTime::from_timestamp(1_000_000_000, 0).unwrap().naive_utc());
    }

    #[test]
    fn malformed_sidecar_is_skipped() {
        let dir = tempdir().unwrap();
        let broken = dir.path().join("a.jpg.json");
        fs::write(&broken, b"{ not json").unwrap();
        let good = sidecar_with_timestamp(dir.path(), "b.jpg.json", 1_628_503_872);
        let matched = MatchResult { primary: vec![broken, good], supplemental: vec![] };

        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);
        assert_eq!(resolved.taken.unwrap().1, TimestampSource::PrimaryJson);
    }

    #[test]
    fn valid_embedded_gps_is_kept() {
        let dir = tempdir().unwrap();
        let supp = dir.path().join("a.jpg.sup.json");
        fs::write(
            &supp,
            r#"{"geoDataExif": {"latitude": 1.0, "longitude": 2.0, "altitude": 3.0}}"#,
        )
        .unwrap();
        let matched = MatchResult { primary: vec![], supplemental: vec![supp] };

        let tool = FakeTool {
            gps: Some(GpsReading { present: true, valid: true, lat: 51.5, lon: -0.12 }),
            ..Default::default()
        };
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);

        let (coord, source) = resolved.gps.unwrap();
        assert_eq!(source, GpsSource::EmbeddedExisting);
        assert_eq!(coord.lat, 51.5);
        assert!(!resolved.needs_gps_write());
    }

    #[test]
    fn invalid_embedded_gps_is_replaced_from_supplemental() {
        let dir = tempdir().unwrap();
        let supp = dir.path().join("a.jpg.sup.json");
        fs::write(
            &supp,
            r#"{"geoData": {"latitude": "-33.9", "longitude": "151.2", "altitude": "5"}}"#,
        )
        .unwrap();
        let matched = MatchResult { primary: vec![], supplemental: vec![supp] };

        // Null Island in the file: present but invalid.
        let tool = FakeTool {
            gps: Some(GpsReading { present: true, valid: false, lat: 0.0, lon: 0.0 }),
            ..Default::default()
        };
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);

        let (coord, source) = resolved.gps.unwrap();
        assert_eq!(source, GpsSource::SupplementalGeoData);
        assert_eq!(coord.lon, 151.2);
        assert!(resolved.needs_gps_write());
    }

    #[test]
    fn geo_exif_block_outranks_geo_data() {
        let dir = tempdir().unwrap();
        let supp = dir.path().join("a.jpg.sup.json");
        fs::write(
            &supp,
            r#"{
                "geoDataExif": {"latitude": 1.5, "longitude": 2.5, "altitude": 0},
                "geoData": {"latitude": 9.9, "longitude": 9.9, "altitude": 0}
            }"#,
        )
        .unwrap();
        let matched = MatchResult { primary: vec![], supplemental: vec![supp] };

        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);
        let (coord, source) = resolved.gps.unwrap();
        assert_eq!(source, GpsSource::SupplementalGeoExif);
        assert_eq!(coord.lat, 1.5);
    }

    #[test]
    fn gps_resolution_is_independent_of_timestamp_outcome() {
        let dir = tempdir().unwrap();
        let supp = dir.path().join("a.jpg.sup.json");
        fs::write(
            &supp,
            r#"{"geoData": {"latitude": 10.0, "longitude": 20.0, "altitude": 0}}"#,
        )
        .unwrap();
        let matched = MatchResult { primary: vec![], supplemental: vec![supp] };

        // No timestamp anywhere, but GPS still resolves.
        let tool = FakeTool::default();
        let resolved = resolve(Path::new("a.jpg"), &matched, &tool);
        assert!(!resolved.is_resolved());
        assert!(resolved.gps.is_some());
    }
}
