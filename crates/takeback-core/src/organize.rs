//! Committing resolved media into the dated library layout, with the
//! collision, path-length, and source-immutability policies.
//!
//! Every outcome here is terminal for the file: committed, committed-over-a-
//! collision (sidecars only), or diverted into a review subtree. Divert and
//! collision are outcomes, not errors.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::exiftool::MetadataTool;
use crate::ledger::IssueLogs;
use crate::matcher::MatchResult;
use crate::media::MediaFile;
use crate::resolve::ResolvedMetadata;
use crate::workbench::{is_under_dir, validate_path_length};

/// Why a file was sent to a review location instead of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DivertReason {
    /// No source produced a usable timestamp.
    Unresolved,
    /// Destination path would meet or exceed the configured limit.
    PathTooLong,
}

/// Terminal state of one media file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Committed { dest: PathBuf },
    /// Destination already existed; the file was left alone and only the
    /// matched sidecars were copied alongside.
    CollisionSkipped { dest: PathBuf },
    Diverted { reason: DivertReason, dest: PathBuf },
}

impl Outcome {
    pub fn is_warning(&self) -> bool {
        !matches!(self, Outcome::Committed { .. })
    }
}

pub struct LibraryOrganizer<'a> {
    cfg: &'a ProjectConfig,
    tool: &'a dyn MetadataTool,
    issues: IssueLogs,
    /// When false (dry run), every decision is computed and logged but
    /// nothing on disk changes.
    live: bool,
}

impl<'a> LibraryOrganizer<'a> {
    pub fn new(cfg: &'a ProjectConfig, tool: &'a dyn MetadataTool, live: bool) -> Self {
        Self { cfg, tool, issues: IssueLogs::from_config(cfg), live }
    }

    /// Commit one resolved media file and its matched sidecars.
    pub fn commit(
        &self,
        media: &MediaFile,
        resolved: &ResolvedMetadata,
        matched: &MatchResult,
    ) -> anyhow::Result<Outcome> {
        let Some((taken, _)) = resolved.taken else {
            return self.divert_unresolved(media, matched);
        };

        let detected_ext = self
            .tool
            .detect_true_extension(&media.path)
            .unwrap_or_else(|| media.fs_extension());
        let bundle_dir = self
            .cfg
            .library_dir
            .join(taken.format("%Y").to_string())
            .join(taken.format("%m").to_string())
            .join(media.stem());
        let dest = bundle_dir.join(format!("{}{}", media.stem(), detected_ext));

        let (length_ok, length) = validate_path_length(&dest, self.cfg.max_path_length);
        if !length_ok {
            warn!(
                media = %media.basename,
                length,
                limit = self.cfg.max_path_length,
                "destination path too long; diverting"
            );
            return self.divert_path_too_long(media, matched, &dest, length);
        }

        if !self.live {
            info!(media = %media.basename, dest = %dest.display(), "[dry run] would commit");
            if resolved.needs_timestamp_write() {
                info!(media = %media.basename, "[dry run] would write sidecar timestamps");
            }
            if resolved.needs_gps_write() {
                info!(media = %media.basename, "[dry run] would write sidecar GPS");
            }
            return Ok(Outcome::Committed { dest });
        }

        fs::create_dir_all(&bundle_dir)?;
        if dest.exists() {
            warn!(
                media = %media.basename,
                dest = %dest.display(),
                "destination already exists; leaving it untouched"
            );
            self.copy_sidecars(matched, &bundle_dir)?;
            return Ok(Outcome::CollisionSkipped { dest });
        }

        self.place(&media.path, &dest)?;
        self.apply_metadata_writes(media, resolved, &dest, taken);
        self.copy_sidecars(matched, &bundle_dir)?;
        info!(media = %media.basename, dest = %dest.display(), "committed");
        Ok(Outcome::Committed { dest })
    }

    fn divert_unresolved(
        &self,
        media: &MediaFile,
        matched: &MatchResult,
    ) -> anyhow::Result<Outcome> {
        let dest = self.cfg.orphan_media_dir.join(&media.basename);
        warn!(
            media = %media.basename,
            "no usable timestamp from any source; diverting to unmatched-media"
        );
        if self.live {
            fs::create_dir_all(&self.cfg.orphan_media_dir)?;
            if !dest.exists() {
                self.place(&media.path, &dest)?;
            }
            self.copy_sidecars(matched, &self.cfg.orphan_media_dir)?;
        }
        Ok(Outcome::Diverted { reason: DivertReason::Unresolved, dest })
    }

    fn divert_path_too_long(
        &self,
        media: &MediaFile,
        matched: &MatchResult,
        intended_dest: &Path,
        length: usize,
    ) -> anyhow::Result<Outcome> {
        let dest = self.cfg.path_too_long_dir.join(&media.basename);
        if self.live {
            fs::create_dir_all(&self.cfg.path_too_long_dir)?;
            if !dest.exists() {
                self.place(&media.path, &dest)?;
                self.normalize_extension(&dest);
            }
            self.copy_sidecars(matched, &self.cfg.path_too_long_dir)?;
            self.issues.record_path_too_long(&media.path, intended_dest, length);
        }
        Ok(Outcome::Diverted { reason: DivertReason::PathTooLong, dest })
    }

    /// Move into place, except that sources inside the read-only archive
    /// store are copied and never removed.
    fn place(&self, src: &Path, dest: &Path) -> anyhow::Result<()> {
        if is_under_dir(src, &self.cfg.archives_dir) {
            fs::copy(src, dest)
                .with_context(|| format!("copying {} -> {}", src.display(), dest.display()))?;
        } else {
            move_file(src, dest)
                .with_context(|| format!("moving {} -> {}", src.display(), dest.display()))?;
        }
        Ok(())
    }

    /// Post-commit metadata writes. Failures are recorded and surfaced but
    /// never roll back the placement.
    fn apply_metadata_writes(
        &self,
        media: &MediaFile,
        resolved: &ResolvedMetadata,
        dest: &Path,
        taken: chrono::NaiveDateTime,
    ) {
        if resolved.needs_timestamp_write() {
            if let Err(err) = self.tool.write_timestamps(dest, taken) {
                warn!(media = %media.basename, %err, "failed to write sidecar timestamps");
                self.issues.record_tool_failure(&media.path, &format!("timestamps: {err}"));
            }
        }
        if resolved.needs_gps_write() {
            if let Some((coord, _)) = &resolved.gps {
                if let Err(err) = self.tool.write_gps(dest, coord) {
                    warn!(media = %media.basename, %err, "failed to write sidecar GPS");
                    self.issues.record_tool_failure(&media.path, &format!("gps: {err}"));
                }
            }
        }
        // Mirror the resolved capture time onto the filesystem clock too;
        // best effort only.
        let mtime = filetime::FileTime::from_unix_time(taken.and_utc().timestamp(), 0);
        let _ = filetime::set_file_mtime(dest, mtime);
    }

    /// Rename a placed file whose filesystem extension disagrees with its
    /// detected content type. Existing targets are never overwritten.
    fn normalize_extension(&self, path: &Path) {
        let Some(real_ext) = self.tool.detect_true_extension(path) else {
            return;
        };
        let current = path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        if current == real_ext {
            return;
        }
        let renamed = path.with_extension(&real_ext[1..]);
        if renamed.exists() {
            warn!(
                media = %path.display(),
                real = %real_ext,
                "extension mismatch but corrected name already exists; leaving as-is"
            );
            return;
        }
        if fs::rename(path, &renamed).is_ok() {
            info!(from = %path.display(), to = %renamed.display(), "renamed mis-extended file");
        }
    }

    /// Copy matched sidecars next to a committed or diverted file, for
    /// human reference. Existing copies are left alone.
    fn copy_sidecars(&self, matched: &MatchResult, dest_dir: &Path) -> anyhow::Result<()> {
        for sidecar in matched.all() {
            let Some(name) = sidecar.file_name() else {
                continue;
            };
            let dest = dest_dir.join(name);
            if !dest.exists() {
                fs::copy(&sidecar, &dest).with_context(|| {
                    format!("copying sidecar {} -> {}", sidecar.display(), dest.display())
                })?;
            }
        }
        Ok(())
    }
}

/// Rename when possible, fall back to copy+delete across filesystems.
fn move_file(src: &Path, dest: &Path) -> std::io::Result<()> {
    match fs::rename(src, dest) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dest)?;
            fs::remove_file(src)
        }
    }
}
