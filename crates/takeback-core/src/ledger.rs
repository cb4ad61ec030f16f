//! Durable, append-only run state.
//!
//! Two ledgers drive resumability: a work-item ledger (one line per fully
//! committed archive or standalone file) and a per-file ledger (one line per
//! media file that reached a terminal state). Both are newline-delimited
//! UTF-8, loaded fully into memory at startup, and appended with an
//! immediate flush so a killed run loses at most the in-flight line.
//!
//! The issue logs share the on-disk format but are write-mostly: they record
//! problems for the status report and for manual follow-up.

use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

/// A line-oriented durable set. Callers never touch the file handle; the
/// only operations are membership, append, and bulk load.
#[derive(Debug)]
pub struct DurableLog {
    path: PathBuf,
    entries: HashSet<String>,
}

impl DurableLog {
    /// Open a log, loading every existing line. A missing file is an empty
    /// log.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let mut entries = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for line in reader.lines() {
                let line = line?;
                let line = line.trim();
                if !line.is_empty() {
                    entries.insert(line.to_string());
                }
            }
        }
        Ok(Self { path: path.to_path_buf(), entries })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains(key)
    }

    /// Append a key and flush it to disk. Appending a key already present
    /// is a no-op, which keeps re-runs from growing the file.
    pub fn append(&mut self, key: &str) -> anyhow::Result<()> {
        if self.entries.contains(key) {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        writeln!(file, "{key}")?;
        file.flush()?;
        self.entries.insert(key.to_string());
        Ok(())
    }

    pub fn load_all(&self) -> &HashSet<String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Identity key for an archive work item: case-insensitive on the basename,
/// so re-runs against renamed-case copies converge.
pub fn archive_key(archive_basename: &str) -> String {
    format!("archive:{}", archive_basename.to_lowercase())
}

/// Identity key for a standalone media work item: canonical absolute path,
/// so runs from different working directories converge.
pub fn standalone_key(path: &Path) -> String {
    let canonical = fs::canonicalize(path).unwrap_or_else(|_| {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            std::env::current_dir().map(|cwd| cwd.join(path)).unwrap_or_else(|_| path.to_path_buf())
        }
    });
    format!("standalone:{}", canonical.display())
}

/// Re-normalize a raw ledger line. Lines that carry neither known prefix are
/// ignored (None), which lets hand-edited files degrade gracefully.
pub fn normalize_work_item_key(raw: &str) -> Option<String> {
    if let Some(name) = raw.strip_prefix("archive:") {
        return Some(archive_key(name.trim()));
    }
    if let Some(path) = raw.strip_prefix("standalone:") {
        return Some(standalone_key(Path::new(path.trim())));
    }
    None
}

/// The work-item ledger: a `DurableLog` whose entries are normalized
/// work-item keys.
#[derive(Debug)]
pub struct WorkLedger {
    log: DurableLog,
    completed: HashSet<String>,
}

impl WorkLedger {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let log = DurableLog::open(path)?;
        let completed = log
            .load_all()
            .iter()
            .filter_map(|line| normalize_work_item_key(line))
            .collect();
        Ok(Self { log, completed })
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.completed.contains(key)
    }

    /// Record a completed work item. Callers append strictly after every
    /// contained media file has reached a terminal state.
    pub fn mark_completed(&mut self, key: &str) -> anyhow::Result<()> {
        self.log.append(key)?;
        self.completed.insert(key.to_string());
        Ok(())
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn completed_archives(&self) -> usize {
        self.completed.iter().filter(|k| k.starts_with("archive:")).count()
    }
}

/// Best-effort, append-only issue records. A failure to record an issue is
/// itself only warned about; issue logs must never take down a run.
#[derive(Debug, Clone)]
pub struct IssueLogs {
    pub path_too_long: PathBuf,
    pub tool_failures: PathBuf,
    pub corrupt_archives: PathBuf,
}

impl IssueLogs {
    pub fn from_config(cfg: &crate::config::ProjectConfig) -> Self {
        Self {
            path_too_long: cfg.path_too_long_log.clone(),
            tool_failures: cfg.tool_failures_log.clone(),
            corrupt_archives: cfg.corrupt_archives_log.clone(),
        }
    }

    pub fn record_path_too_long(&self, media: &Path, dest: &Path, length: usize) {
        self.append(
            &self.path_too_long,
            &format!("{}|{}|{}", media.display(), dest.display(), length),
        );
    }

    pub fn record_tool_failure(&self, media: &Path, context: &str) {
        self.append(&self.tool_failures, &format!("{}|{}", media.display(), context));
    }

    pub fn record_corrupt_archive(&self, archive: &Path) {
        self.append(&self.corrupt_archives, &archive.display().to_string());
    }

    fn append(&self, path: &Path, line: &str) {
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .and_then(|mut f| writeln!(f, "{line}"));
        if let Err(err) = result {
            warn!(log = %path.display(), %err, "failed to record issue");
        }
    }
}

/// Count lines in a line-oriented log; 0 when the file is missing. Used by
/// the read-only status report.
pub fn count_lines(path: &Path) -> usize {
    let Ok(file) = File::open(path) else {
        return 0;
    };
    BufReader::new(file).lines().map_while(Result::ok).filter(|l| !l.trim().is_empty()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn durable_log_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        let mut log = DurableLog::open(&path).unwrap();
        assert!(log.is_empty());
        log.append("one").unwrap();
        log.append("two").unwrap();
        assert!(log.contains("one"));

        let reopened = DurableLog::open(&path).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.contains("two"));
    }

    #[test]
    fn duplicate_append_does_not_grow_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        let mut log = DurableLog::open(&path).unwrap();
        log.append("same").unwrap();
        log.append("same").unwrap();
        log.append("same").unwrap();

        assert_eq!(count_lines(&path), 1);
    }

    #[test]
    fn archive_keys_fold_case() {
        assert_eq!(archive_key("Takeout-001.ZIP"), "archive:takeout-001.zip");
        assert_eq!(
            normalize_work_item_key("archive: Takeout-001.ZIP"),
            Some("archive:takeout-001.zip".to_string())
        );
        assert_eq!(normalize_work_item_key("garbage line"), None);
    }

    #[test]
    fn standalone_keys_are_absolute() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("clip.mov");
        std::fs::write(&file, b"x").unwrap();

        let key = standalone_key(&file);
        assert!(key.starts_with("standalone:"));
        assert!(Path::new(key.strip_prefix("standalone:").unwrap()).is_absolute());
    }

    #[test]
    fn work_ledger_normalizes_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.log");
        std::fs::write(&path, "archive:First.ZIP\n\narchive:second.zip\n").unwrap();

        let ledger = WorkLedger::open(&path).unwrap();
        assert!(ledger.is_completed(&archive_key("first.zip")));
        assert!(ledger.is_completed(&archive_key("SECOND.ZIP")));
        assert_eq!(ledger.completed_archives(), 2);
    }

    #[test]
    fn issue_log_appends() {
        let dir = tempdir().unwrap();
        let logs = IssueLogs {
            path_too_long: dir.path().join("ptl.log"),
            tool_failures: dir.path().join("tf.log"),
            corrupt_archives: dir.path().join("ca.log"),
        };
        logs.record_path_too_long(Path::new("/a/b.jpg"), Path::new("/x/y.jpg"), 260);
        logs.record_tool_failure(Path::new("/a/b.jpg"), "write_timestamps: exit 1");
        logs.record_corrupt_archive(Path::new("/a/bad.zip"));

        assert_eq!(count_lines(&logs.path_too_long), 1);
        assert_eq!(count_lines(&logs.tool_failures), 1);
        assert_eq!(count_lines(&logs.corrupt_archives), 1);
    }
}
