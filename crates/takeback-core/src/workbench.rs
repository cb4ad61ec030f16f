//! The mutable extraction workbench and path policy helpers. The archive
//! store itself is only ever read.

use std::fs::{self, File};
use std::io;
use std::path::{Component, Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::config::ProjectConfig;
use crate::error::ProcessError;

/// Every non-sidecar file under `root`, sorted for deterministic
/// processing order.
pub fn list_media_files(root: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    collect_media_files(root, &mut files);
    files.sort();
    files
}

fn collect_media_files(dir: &Path, files: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect_media_files(&path, files);
        } else if !path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase().ends_with(".json"))
            .unwrap_or(false)
        {
            files.push(path);
        }
    }
}

/// Logical ancestor check on absolutized paths. Decides copy-vs-move: a
/// source inside the read-only archive store is copied, never moved.
pub fn is_under_dir(path: &Path, root: &Path) -> bool {
    normalize_abs(path).starts_with(normalize_abs(root))
}

/// Absolute path with `.`/`..` components resolved lexically (no symlink
/// traversal, so the check also works for paths that do not exist yet).
fn normalize_abs(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
    };
    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Locate a named archive: absolute paths are taken as-is, bare names are
/// looked up in the archive store.
pub fn resolve_archive_path(archive_name: &str, cfg: &ProjectConfig) -> Option<PathBuf> {
    if archive_name.is_empty() {
        return None;
    }
    let as_path = Path::new(archive_name);
    if as_path.is_absolute() && as_path.exists() {
        return Some(as_path.to_path_buf());
    }
    let candidate = cfg.archives_dir.join(archive_name);
    candidate.exists().then_some(candidate)
}

pub fn workbench_has_files(cfg: &ProjectConfig) -> bool {
    !list_media_files(&cfg.extract_target_dir).is_empty()
        || fs::read_dir(&cfg.extract_target_dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
}

/// Delete and recreate the extraction target.
pub fn clean_workbench(cfg: &ProjectConfig) -> anyhow::Result<()> {
    if cfg.extract_target_dir.exists() {
        fs::remove_dir_all(&cfg.extract_target_dir)
            .with_context(|| format!("cleaning {}", cfg.extract_target_dir.display()))?;
    }
    fs::create_dir_all(&cfg.extract_target_dir)?;
    Ok(())
}

/// Extract one archive into the workbench. Refuses a non-empty workbench
/// unless `force` clears it first. The archive itself is only read; a file
/// that cannot be opened as a zip is a `CorruptSource`.
pub fn extract_archive(archive_path: &Path, force: bool, cfg: &ProjectConfig) -> anyhow::Result<()> {
    if force {
        clean_workbench(cfg)?;
    } else if workbench_has_files(cfg) {
        return Err(ProcessError::MissingPrecondition(
            "workbench is not empty; re-run with force-extract to overwrite".to_string(),
        )
        .into());
    } else {
        fs::create_dir_all(&cfg.extract_target_dir)?;
    }

    let file = File::open(archive_path)
        .with_context(|| format!("opening {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file).map_err(|err| ProcessError::CorruptSource {
        path: archive_path.to_path_buf(),
        source: err.into(),
    })?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(|err| ProcessError::CorruptSource {
            path: archive_path.to_path_buf(),
            source: err.into(),
        })?;
        if entry.is_dir() {
            continue;
        }
        let name = crate::consolidate::decode_entry_name(entry.name_raw());
        let Some(relative) = sanitize_entry_path(&name) else {
            continue;
        };
        let dest = cfg.extract_target_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = io::BufWriter::new(File::create(&dest)?);
        io::copy(&mut entry, &mut out)?;
    }

    info!(archive = %archive_path.display(), "extracted archive to workbench");
    Ok(())
}

/// Entry names come from untrusted archives; reject absolute paths and any
/// path escaping the extraction root.
fn sanitize_entry_path(name: &str) -> Option<PathBuf> {
    let path = Path::new(name);
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!out.as_os_str().is_empty()).then_some(out)
}

/// Path-length policy: valid only strictly below the limit. Returns the
/// measured length alongside so callers can report it.
pub fn validate_path_length(path: &Path, max_length: usize) -> (bool, usize) {
    let length = path.to_string_lossy().chars().count();
    (length < max_length, length)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn lists_only_non_sidecar_files_sorted() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("sub")).unwrap();
        fs::write(dir.path().join("b.jpg"), b"x").unwrap();
        fs::write(dir.path().join("a.MOV"), b"x").unwrap();
        fs::write(dir.path().join("a.MOV.json"), b"{}").unwrap();
        fs::write(dir.path().join("sub/c.png"), b"x").unwrap();

        let files = list_media_files(dir.path());
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.MOV", "b.jpg", "sub/c.png"]);
    }

    #[test]
    fn ancestor_check() {
        assert!(is_under_dir(Path::new("/store/zips/a.zip"), Path::new("/store/zips")));
        assert!(is_under_dir(Path::new("/store/zips/../zips/a.zip"), Path::new("/store/zips")));
        assert!(!is_under_dir(Path::new("/store/other/a.zip"), Path::new("/store/zips")));
        // Sibling with a shared name prefix is not inside.
        assert!(!is_under_dir(Path::new("/store/zips2/a.zip"), Path::new("/store/zips")));
    }

    #[test]
    fn path_length_guard_is_strict() {
        let (ok, len) = validate_path_length(Path::new("/abc"), 10);
        assert!(ok);
        assert_eq!(len, 4);
        let (ok, len) = validate_path_length(Path::new("/abcdefghi"), 10);
        assert!(!ok);
        assert_eq!(len, 10);
    }

    #[test]
    fn entry_path_sanitizing() {
        assert_eq!(
            sanitize_entry_path("Takeout/Photos/a.jpg"),
            Some(PathBuf::from("Takeout/Photos/a.jpg"))
        );
        assert_eq!(sanitize_entry_path("../escape.jpg"), None);
        assert_eq!(sanitize_entry_path("/absolute.jpg"), None);
        assert_eq!(sanitize_entry_path(""), None);
    }

    #[test]
    fn extract_refuses_dirty_workbench_without_force() {
        let dir = tempdir().unwrap();
        let cfg = ProjectConfig::new(dir.path(), dir.path().join("library"));
        fs::create_dir_all(&cfg.extract_target_dir).unwrap();
        fs::write(cfg.extract_target_dir.join("leftover.jpg"), b"x").unwrap();

        // Build a minimal valid zip.
        let zip_path = dir.path().join("t.zip");
        let file = File::create(&zip_path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        writer
            .start_file("Takeout/a.jpg", zip::write::SimpleFileOptions::default())
            .unwrap();
        std::io::Write::write_all(&mut writer, b"jpegdata").unwrap();
        writer.finish().unwrap();

        assert!(extract_archive(&zip_path, false, &cfg).is_err());
        extract_archive(&zip_path, true, &cfg).unwrap();
        assert!(cfg.extract_target_dir.join("Takeout/a.jpg").exists());
    }

    #[test]
    fn corrupt_zip_is_reported_as_corrupt_source() {
        let dir = tempdir().unwrap();
        let cfg = ProjectConfig::new(dir.path(), dir.path().join("library"));
        let bad = dir.path().join("bad.zip");
        fs::write(&bad, b"this is not a zip").unwrap();

        let err = extract_archive(&bad, true, &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ProcessError>(),
            Some(ProcessError::CorruptSource { .. })
        ));
    }
}
