//! Sidecar consolidation: stream every JSON sidecar out of the archive
//! store into one flat repository, so matching never has to open a zip
//! again. Identical duplicates are skipped; content conflicts are parked in
//! a separate directory for human review. Archives are only ever read.

use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use anyhow::Context;
use encoding_rs::SHIFT_JIS;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::ledger::{DurableLog, IssueLogs};
use crate::{ProgressCallback, ThrottledProgress};

/// Decode a raw zip entry name: UTF-8 first, then Shift_JIS, then lossy.
pub fn decode_entry_name(raw: &[u8]) -> String {
    if let Ok(s) = std::str::from_utf8(raw) {
        return s.to_string();
    }

    let (decoded, _, had_errors) = SHIFT_JIS.decode(raw);
    if !had_errors {
        return decoded.into_owned();
    }

    String::from_utf8_lossy(raw).into_owned()
}

#[derive(Debug, Default)]
pub struct ConsolidateSummary {
    pub archives_seen: u64,
    pub archives_processed: u64,
    pub corrupt_archives: u64,
    pub sidecars_extracted: u64,
    pub duplicates_skipped: u64,
    pub conflicts: u64,
}

/// Run the consolidation pass over every archive not yet in the
/// consolidation ledger.
pub fn consolidate_sidecars(
    cfg: &ProjectConfig,
    progress: &ProgressCallback,
) -> anyhow::Result<ConsolidateSummary> {
    let tp = ThrottledProgress::new(progress);

    fs::create_dir_all(&cfg.json_repository_dir)?;
    fs::create_dir_all(&cfg.json_conflicts_dir)?;
    if !cfg.archives_dir.is_dir() {
        return Err(crate::error::ProcessError::MissingPrecondition(format!(
            "archive store not found: {}",
            cfg.archives_dir.display()
        ))
        .into());
    }

    let mut ledger = DurableLog::open(&cfg.consolidated_archives_log)?;
    let issues = IssueLogs::from_config(cfg);

    let mut zip_names: Vec<String> = fs::read_dir(&cfg.archives_dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name.to_lowercase().ends_with(".zip"))
        .collect();
    zip_names.sort();

    let mut summary = ConsolidateSummary { archives_seen: zip_names.len() as u64, ..Default::default() };
    let pending: Vec<&String> =
        zip_names.iter().filter(|name| !ledger.contains(name)).collect();
    let total = pending.len() as u64;

    for (i, zip_name) in pending.iter().enumerate() {
        tp.report("consolidate", i as u64, total, zip_name);
        let zip_path = cfg.archives_dir.join(zip_name);

        match consolidate_one(&zip_path, cfg, &mut summary) {
            Ok(()) => {
                summary.archives_processed += 1;
                ledger.append(zip_name)?;
            }
            Err(err) => {
                warn!(archive = %zip_path.display(), %err, "archive cannot be consolidated");
                issues.record_corrupt_archive(&zip_path);
                summary.corrupt_archives += 1;
            }
        }
    }
    tp.report("consolidate", total, total, "sidecar consolidation done");

    info!(
        extracted = summary.sidecars_extracted,
        duplicates = summary.duplicates_skipped,
        conflicts = summary.conflicts,
        "consolidation pass complete"
    );
    Ok(summary)
}

fn consolidate_one(
    zip_path: &Path,
    cfg: &ProjectConfig,
    summary: &mut ConsolidateSummary,
) -> anyhow::Result<()> {
    let file =
        File::open(zip_path).with_context(|| format!("opening {}", zip_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("reading {}", zip_path.display()))?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.is_dir() {
            continue;
        }
        let entry_path = decode_entry_name(entry.name_raw());
        if !entry_path.to_lowercase().ends_with(".json") {
            continue;
        }
        let Some(basename) = Path::new(&entry_path).file_name().map(|n| n.to_owned()) else {
            continue;
        };

        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut bytes)?;

        let dest = cfg.json_repository_dir.join(&basename);
        if dest.exists() {
            let existing = fs::read(&dest)?;
            if content_hash(&existing) == content_hash(&bytes) {
                summary.duplicates_skipped += 1;
                continue;
            }
            // Same name, different content: park the new version next to a
            // marker of which archive it came from.
            let zip_stem = zip_path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let conflict_name = format!(
                "{}_{}.json",
                Path::new(&basename).file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_default(),
                zip_stem
            );
            let conflict_dest = cfg.json_conflicts_dir.join(conflict_name);
            if !conflict_dest.exists() {
                fs::write(&conflict_dest, &bytes)?;
            }
            warn!(
                sidecar = %basename.to_string_lossy(),
                archive = %zip_path.display(),
                "sidecar name conflict; new version parked for review"
            );
            summary.conflicts += 1;
            continue;
        }

        fs::write(&dest, &bytes)?;
        summary.sidecars_extracted += 1;
    }
    Ok(())
}

fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
