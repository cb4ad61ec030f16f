//! The external metadata inspection/editing tool, behind a trait so the
//! engine never shells out directly.
//!
//! The real implementation drives ExifTool through an ordered list of
//! backends tried in sequence: the native binary first, then the
//! interpreter-hosted script, and (for capture-timestamp reads only) an
//! in-process EXIF parse as the last resort. First success wins. A failed
//! read means "no embedded data"; a failed write is reported to the caller,
//! who records it and moves on.

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::sync::LazyLock;

use chrono::NaiveDateTime;
use exif::{In, Reader, Tag};
use regex::Regex;
use tracing::{debug, warn};

use crate::config::ProjectConfig;
use crate::error::ProcessError;
use crate::sidecar::{gps_is_valid, GpsCoord};

static EXIF_DATETIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{4}:\d{2}:\d{2} \d{2}:\d{2}:\d{2})").unwrap());

/// Result of probing a file for embedded GPS. `present` means the tags
/// exist at all; `valid` additionally means they parse as numbers and are
/// not Null Island.
#[derive(Debug, Clone, Copy, Default)]
pub struct GpsReading {
    pub present: bool,
    pub valid: bool,
    pub lat: f64,
    pub lon: f64,
}

/// The reader/writer contract for embedded media metadata. Every operation
/// may fail independently.
pub trait MetadataTool {
    /// Embedded capture timestamp, if any. Read failures are "no data".
    fn read_capture_timestamp(&self, path: &Path) -> Option<NaiveDateTime>;

    /// Embedded GPS state.
    fn read_gps(&self, path: &Path) -> GpsReading;

    /// Stamp capture/create/modify timestamps into the file.
    fn write_timestamps(&self, path: &Path, taken: NaiveDateTime) -> anyhow::Result<()>;

    /// Embed a GPS coordinate into the file.
    fn write_gps(&self, path: &Path, coord: &GpsCoord) -> anyhow::Result<()>;

    /// Extension (dot included, lowercase) derived from file *content*, not
    /// the filename. None when the tool cannot tell.
    fn detect_true_extension(&self, path: &Path) -> Option<String>;
}

/// One way of invoking ExifTool.
#[derive(Debug, Clone)]
enum Backend {
    Native(PathBuf),
    Scripted { interpreter: PathBuf, script: PathBuf },
}

impl Backend {
    fn command(&self) -> Command {
        match self {
            Backend::Native(exe) => Command::new(exe),
            Backend::Scripted { interpreter, script } => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(script);
                cmd
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Backend::Native(exe) => exe.display().to_string(),
            Backend::Scripted { interpreter, script } => {
                format!("{} {}", interpreter.display(), script.display())
            }
        }
    }
}

/// ExifTool driven over subprocess boundaries, with the bundled native
/// binary preferred over the interpreter-hosted script.
pub struct ExifTool {
    backends: Vec<Backend>,
    /// Working directory for invocations, so a bundled tool finds its
    /// runtime files.
    work_dir: Option<PathBuf>,
}

impl ExifTool {
    /// Locate usable backends from the configured tool layout, falling back
    /// to an `exiftool` on PATH. Errors when nothing is usable; the caller
    /// treats that as a fatal precondition.
    pub fn discover(cfg: &ProjectConfig) -> Result<Self, ProcessError> {
        let mut backends = Vec::new();
        if cfg.exiftool_binary.exists() {
            backends.push(Backend::Native(cfg.exiftool_binary.clone()));
        }
        if cfg.exiftool_interpreter.exists() && cfg.exiftool_script.exists() {
            backends.push(Backend::Scripted {
                interpreter: cfg.exiftool_interpreter.clone(),
                script: cfg.exiftool_script.clone(),
            });
        }
        if backends.is_empty() && path_has_exiftool() {
            backends.push(Backend::Native(PathBuf::from("exiftool")));
        }
        if backends.is_empty() {
            return Err(ProcessError::MissingPrecondition(format!(
                "no usable ExifTool under {} and none on PATH",
                cfg.tools_dir.display()
            )));
        }
        let work_dir = cfg.exiftool_binary.parent().filter(|p| p.exists()).map(Path::to_path_buf);
        Ok(Self { backends, work_dir })
    }

    fn run_backend(&self, backend: &Backend, args: &[&str]) -> std::io::Result<Output> {
        let mut cmd = backend.command();
        cmd.args(args);
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd.output()
    }

    /// Run a mutating invocation: each backend in order, first clean exit
    /// wins.
    fn run_write(&self, args: &[&str]) -> anyhow::Result<()> {
        let mut attempts = Vec::new();
        for backend in &self.backends {
            match self.run_backend(backend, args) {
                Ok(output) if output.status.success() => return Ok(()),
                Ok(output) => attempts.push(format!(
                    "{}: rc={:?} stderr={}",
                    backend.describe(),
                    output.status.code(),
                    String::from_utf8_lossy(&output.stderr).trim()
                )),
                Err(err) => attempts.push(format!("{}: {err}", backend.describe())),
            }
        }
        Err(ProcessError::ToolFailure(attempts.join("; ")).into())
    }

    /// Run a read-only invocation. Non-zero exits with usable stdout are
    /// accepted; the tool exits non-zero on routine warnings.
    fn run_read(&self, args: &[&str]) -> Option<String> {
        for backend in &self.backends {
            match self.run_backend(backend, args) {
                Ok(output) => {
                    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
                    if output.status.success() || !stdout.trim().is_empty() {
                        return Some(stdout);
                    }
                    debug!(
                        backend = backend.describe(),
                        rc = ?output.status.code(),
                        "read attempt produced nothing"
                    );
                }
                Err(err) => {
                    debug!(backend = backend.describe(), %err, "read attempt failed to spawn");
                }
            }
        }
        None
    }
}

impl MetadataTool for ExifTool {
    fn read_capture_timestamp(&self, path: &Path) -> Option<NaiveDateTime> {
        let path_arg = path.to_string_lossy();
        let stdout = self.run_read(&[
            "-s3",
            "-DateTimeOriginal",
            "-CreateDate",
            "-MediaCreateDate",
            "-TrackCreateDate",
            "-QuickTime:CreateDate",
            &path_arg,
        ]);
        match stdout {
            Some(stdout) => stdout.lines().find_map(|line| {
                EXIF_DATETIME
                    .captures(line)
                    .and_then(|caps| parse_exif_datetime(&caps[1]))
            }),
            // Every subprocess backend is down; parse EXIF in-process.
            None => embedded_exif_datetime(path),
        }
    }

    fn read_gps(&self, path: &Path) -> GpsReading {
        let path_arg = path.to_string_lossy();
        let Some(stdout) =
            self.run_read(&["-n", "-s3", "-GPSLatitude", "-GPSLongitude", &path_arg])
        else {
            return GpsReading::default();
        };
        let lines: Vec<&str> = stdout.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
        if lines.len() < 2 {
            return GpsReading::default();
        }
        let (Ok(lat), Ok(lon)) = (lines[0].parse::<f64>(), lines[1].parse::<f64>()) else {
            // Tags exist but are not numeric; callers may fill from sidecars.
            return GpsReading { present: true, valid: false, lat: 0.0, lon: 0.0 };
        };
        GpsReading { present: true, valid: gps_is_valid(lat, lon), lat, lon }
    }

    fn write_timestamps(&self, path: &Path, taken: NaiveDateTime) -> anyhow::Result<()> {
        let stamp = taken.format("%Y:%m:%d %H:%M:%S").to_string();
        let path_arg = path.to_string_lossy();
        self.run_write(&[
            &format!("-DateTimeOriginal={stamp}"),
            &format!("-CreateDate={stamp}"),
            &format!("-FileModifyDate={stamp}"),
            "-overwrite_original",
            "-P",
            &path_arg,
        ])
    }

    fn write_gps(&self, path: &Path, coord: &GpsCoord) -> anyhow::Result<()> {
        let path_arg = path.to_string_lossy();
        self.run_write(&[
            &format!("-GPSLatitude={}", coord.lat),
            &format!("-GPSLongitude={}", coord.lon),
            &format!("-GPSAltitude={}", coord.alt),
            "-overwrite_original",
            "-P",
            &path_arg,
        ])
    }

    fn detect_true_extension(&self, path: &Path) -> Option<String> {
        let path_arg = path.to_string_lossy();
        let stdout = self.run_read(&["-s3", "-FileTypeExtension", &path_arg])?;
        let ext = stdout.trim().to_lowercase();
        if ext.is_empty() || ext == "none" {
            return None;
        }
        Some(format!(".{ext}"))
    }
}

fn path_has_exiftool() -> bool {
    Command::new("exiftool")
        .arg("-ver")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// In-process EXIF date read, used when no subprocess backend is usable.
/// EXIF datetimes carry no timezone; they are taken as-is.
fn embedded_exif_datetime(path: &Path) -> Option<NaiveDateTime> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(media = %path.display(), %err, "cannot read file for in-process EXIF parse");
            return None;
        }
    };
    let reader = Reader::new().read_from_container(&mut Cursor::new(bytes)).ok()?;

    for tag in [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime] {
        if let Some(field) = reader.get_field(tag, In::PRIMARY) {
            let value = field.display_value().to_string();
            if let Some(dt) = parse_exif_datetime(&value) {
                return Some(dt);
            }
        }
    }
    None
}

fn parse_exif_datetime(s: &str) -> Option<NaiveDateTime> {
    let cleaned = s.replace(['-', '/'], ":");
    NaiveDateTime::parse_from_str(cleaned.trim(), "%Y:%m:%d %H:%M:%S").ok()
}

/// Scriptable stand-in for the external tool, shared by the resolver,
/// organizer, and pipeline tests.
#[cfg(test)]
pub mod testing {
    use std::cell::RefCell;
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};

    use chrono::NaiveDateTime;

    use super::{GpsReading, MetadataTool};
    use crate::sidecar::GpsCoord;

    #[derive(Default)]
    pub struct FakeTool {
        pub timestamp: Option<NaiveDateTime>,
        pub gps: Option<GpsReading>,
        pub written_timestamps: RefCell<Vec<(PathBuf, NaiveDateTime)>>,
        pub written_gps: RefCell<Vec<(PathBuf, GpsCoord)>>,
        /// Per-path content-detected extensions; falls back to `default_ext`.
        pub extensions: HashMap<PathBuf, String>,
        pub default_ext: Option<String>,
        pub fail_writes: bool,
    }

    impl MetadataTool for FakeTool {
        fn read_capture_timestamp(&self, _path: &Path) -> Option<NaiveDateTime> {
            self.timestamp
        }

        fn read_gps(&self, _path: &Path) -> GpsReading {
            self.gps.unwrap_or_default()
        }

        fn write_timestamps(&self, path: &Path, taken: NaiveDateTime) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("write_timestamps failed");
            }
            self.written_timestamps.borrow_mut().push((path.to_path_buf(), taken));
            Ok(())
        }

        fn write_gps(&self, path: &Path, coord: &GpsCoord) -> anyhow::Result<()> {
            if self.fail_writes {
                anyhow::bail!("write_gps failed");
            }
            self.written_gps.borrow_mut().push((path.to_path_buf(), *coord));
            Ok(())
        }

        fn detect_true_extension(&self, path: &Path) -> Option<String> {
            self.extensions.get(path).cloned().or_else(|| self.default_ext.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exif_datetime_parsing() {
        let dt = parse_exif_datetime("2020:05:10 17:39:00").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M:%S").to_string(), "2020-05-10 17:39:00");

        // Some writers emit dashes instead of colons in the date part.
        assert!(parse_exif_datetime("2020-05-10 17:39:00").is_some());
        assert!(parse_exif_datetime("0000:00:00 00:00:00").is_none());
        assert!(parse_exif_datetime("not a date").is_none());
    }

    #[test]
    fn datetime_regex_ignores_surrounding_noise() {
        let caps = EXIF_DATETIME.captures("Create Date  : 2021:08:09 10:11:12+09:00").unwrap();
        assert_eq!(&caps[1], "2021:08:09 10:11:12");
    }

    #[test]
    fn discover_fails_without_any_backend() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = ProjectConfig::new(dir.path(), dir.path().join("lib"));
        // Fresh temp project has no bundled tool; discovery may only succeed
        // via PATH.
        match ExifTool::discover(&cfg) {
            Ok(tool) => assert!(!tool.backends.is_empty()),
            Err(ProcessError::MissingPrecondition(msg)) => {
                assert!(msg.contains("ExifTool"));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
