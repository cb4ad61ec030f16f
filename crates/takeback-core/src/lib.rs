pub mod config;
pub mod consolidate;
pub mod error;
pub mod exiftool;
pub mod index;
pub mod ledger;
pub mod matcher;
pub mod media;
pub mod organize;
pub mod resolve;
pub mod sidecar;
pub mod status;
pub mod suffix;
pub mod workbench;

use std::cell::Cell;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

pub use config::ProjectConfig;
pub use error::ProcessError;
pub use exiftool::{ExifTool, MetadataTool};
pub use organize::{DivertReason, Outcome};
pub use resolve::{GpsSource, ResolvedMetadata, TimestampSource};

use index::{PrimaryIndex, SupplementalIndex};
use ledger::{archive_key, standalone_key, DurableLog, IssueLogs, WorkLedger};
use matcher::{find_supplemental_for, match_json_for_media, MatchResult};
use media::MediaFile;
use organize::LibraryOrganizer;

/// Per-run options, mapped straight from the CLI surface.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Actually move files and write ledgers. Off = dry run.
    pub live: bool,
    /// Process at most this many pending work items.
    pub batch_size: Option<usize>,
    /// Target one named archive or standalone file instead of everything
    /// pending.
    pub archive_name: Option<String>,
    /// Re-process a named archive even when the ledger says it is done.
    pub force_extract: bool,
    /// Clear the extraction workbench after the run.
    pub clean_workbench: bool,
}

/// Counters reported at the end of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub work_items_selected: u64,
    pub work_items_completed: u64,
    pub files_processed: u64,
    pub files_committed: u64,
    pub files_diverted: u64,
    pub matches_found: u64,
    pub warnings: u64,
    pub errors: u64,
    pub stopped_early: bool,
}

/// Cooperative stop flag, typically wired to SIGINT by the CLI. Checked
/// between files and between work items; the in-flight file always
/// finishes, so every side effect stays single-file atomic.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    stop: Arc<AtomicBool>,
}

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Control options for run execution.
#[derive(Debug, Clone, Default)]
pub struct RunControl {
    pub stop: Option<StopToken>,
}

impl RunControl {
    fn stop_requested(&self) -> bool {
        self.stop.as_ref().map(StopToken::is_requested).unwrap_or(false)
    }
}

/// Type alias for the progress callback.
pub type ProgressCallback = dyn Fn(&str, u64, u64, &str);

/// Throttled progress reporter; emits at most every 200ms, plus on
/// completion.
pub struct ThrottledProgress<'a> {
    inner: &'a ProgressCallback,
    last_emit: Cell<Instant>,
}

impl<'a> ThrottledProgress<'a> {
    pub fn new(inner: &'a ProgressCallback) -> Self {
        Self {
            inner,
            last_emit: Cell::new(Instant::now() - std::time::Duration::from_secs(1)),
        }
    }

    pub fn report(&self, stage: &str, current: u64, total: u64, message: &str) {
        let is_done = current + 1 >= total;
        if !is_done {
            if self.last_emit.get().elapsed().as_millis() < 200 {
                return;
            }
            self.last_emit.set(Instant::now());
        }
        (self.inner)(stage, current, total, message);
    }
}

/// One unit of resumable work.
#[derive(Debug, Clone)]
enum WorkItem {
    Archive(PathBuf),
    Standalone(PathBuf),
}

impl WorkItem {
    fn key(&self) -> String {
        match self {
            WorkItem::Archive(path) => archive_key(&basename_of(path)),
            WorkItem::Standalone(path) => standalone_key(path),
        }
    }

    fn path(&self) -> &PathBuf {
        match self {
            WorkItem::Archive(path) | WorkItem::Standalone(path) => path,
        }
    }
}

fn basename_of(path: &std::path::Path) -> String {
    path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default()
}

/// Run the reconciliation pipeline.
pub fn run(
    cfg: &ProjectConfig,
    options: &RunOptions,
    tool: &dyn MetadataTool,
    progress: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    run_with_control(cfg, options, tool, &RunControl::default(), progress)
}

/// Run the reconciliation pipeline with control options.
pub fn run_with_control(
    cfg: &ProjectConfig,
    options: &RunOptions,
    tool: &dyn MetadataTool,
    control: &RunControl,
    progress: &ProgressCallback,
) -> anyhow::Result<RunSummary> {
    let tp = ThrottledProgress::new(progress);

    if !cfg.json_repository_dir.is_dir() {
        return Err(ProcessError::MissingPrecondition(
            "sidecar repository not found; run the consolidation pass first".to_string(),
        )
        .into());
    }
    if !cfg.archives_dir.is_dir() {
        return Err(ProcessError::MissingPrecondition(format!(
            "archive store not found: {}",
            cfg.archives_dir.display()
        ))
        .into());
    }

    if options.live {
        info!("live run: files will be moved and metadata written");
    } else {
        info!("dry run: decisions are computed and logged, nothing changes");
    }

    // A full re-run over everything starts the per-file ledger fresh; it
    // lives in the workbench and only disambiguates files within archives.
    if options.live
        && options.archive_name.is_none()
        && (options.force_extract || options.clean_workbench)
        && cfg.processed_files_log.exists()
    {
        fs::remove_file(&cfg.processed_files_log)?;
        info!("cleared per-file ledger for full re-extract");
    }

    let mut work_ledger = WorkLedger::open(&cfg.work_items_log)?;
    let mut file_ledger = DurableLog::open(&cfg.processed_files_log)?;
    let issues = IssueLogs::from_config(cfg);

    let mut work_items = select_work_items(cfg, options, &work_ledger)?;
    work_items.sort_by_key(|item| basename_of(item.path()).to_lowercase());
    if let Some(batch) = options.batch_size {
        work_items.truncate(batch);
    }

    let mut summary = RunSummary { work_items_selected: work_items.len() as u64, ..Default::default() };
    if work_items.is_empty() {
        info!("no pending work items");
        return Ok(summary);
    }
    info!(count = work_items.len(), "selected work items");

    let primary_index = PrimaryIndex::build(&cfg.json_repository_dir)?;
    let supplemental_index = SupplementalIndex::build(&cfg.json_repository_dir)?;
    if primary_index.is_empty() {
        warn!("sidecar repository is empty; only embedded metadata can resolve");
    }
    info!(
        sidecars = primary_index.len(),
        previously_processed = file_ledger.len(),
        "indexes ready"
    );

    let organizer = LibraryOrganizer::new(cfg, tool, options.live);
    let archive_count =
        work_items.iter().filter(|item| matches!(item, WorkItem::Archive(_))).count();

    let total_items = work_items.len() as u64;
    for (idx, item) in work_items.iter().enumerate() {
        if control.stop_requested() {
            info!("stop requested; leaving remaining work for the next run");
            summary.stopped_early = true;
            break;
        }
        tp.report("work-items", idx as u64, total_items, &basename_of(item.path()));

        match item {
            WorkItem::Archive(archive_path) => {
                info!(archive = %archive_path.display(), "processing archive");
                if let Err(err) = workbench::extract_archive(archive_path, true, cfg) {
                    if matches!(
                        err.downcast_ref::<ProcessError>(),
                        Some(ProcessError::CorruptSource { .. })
                    ) {
                        error!(archive = %archive_path.display(), %err, "archive unreadable; left in place");
                        if options.live {
                            issues.record_corrupt_archive(archive_path);
                        }
                        summary.errors += 1;
                        continue;
                    }
                    return Err(err);
                }

                let media_files = workbench::list_media_files(&cfg.extract_target_dir);
                let all_terminal = process_media_files(
                    &media_files,
                    &primary_index,
                    &supplemental_index,
                    &organizer,
                    tool,
                    &mut file_ledger,
                    options.live,
                    control,
                    &mut summary,
                );

                if all_terminal {
                    summary.work_items_completed += 1;
                    if options.live {
                        work_ledger.mark_completed(&item.key())?;
                        info!(archive = %archive_path.display(), "archive marked complete");
                    }
                    if options.clean_workbench || archive_count > 1 {
                        workbench::clean_workbench(cfg)?;
                    }
                } else {
                    warn!(
                        archive = %archive_path.display(),
                        "archive left pending; some files did not reach a terminal state"
                    );
                }
            }
            WorkItem::Standalone(media_path) => {
                info!(media = %media_path.display(), "processing standalone file");
                let all_terminal = process_media_files(
                    &[media_path.clone()],
                    &primary_index,
                    &supplemental_index,
                    &organizer,
                    tool,
                    &mut file_ledger,
                    options.live,
                    control,
                    &mut summary,
                );
                if all_terminal {
                    summary.work_items_completed += 1;
                    if options.live {
                        work_ledger.mark_completed(&item.key())?;
                    }
                }
            }
        }
    }

    if options.clean_workbench && cfg.extract_target_dir.exists() {
        workbench::clean_workbench(cfg)?;
    }

    info!(
        processed = summary.files_processed,
        committed = summary.files_committed,
        diverted = summary.files_diverted,
        matched = summary.matches_found,
        warnings = summary.warnings,
        errors = summary.errors,
        "run complete"
    );
    Ok(summary)
}

/// Candidate work items minus the completed set from the ledger.
fn select_work_items(
    cfg: &ProjectConfig,
    options: &RunOptions,
    ledger: &WorkLedger,
) -> anyhow::Result<Vec<WorkItem>> {
    if let Some(name) = &options.archive_name {
        let Some(path) = workbench::resolve_archive_path(name, cfg) else {
            return Err(
                ProcessError::MissingPrecondition(format!("archive not found: '{name}'")).into()
            );
        };
        let item = if path.to_string_lossy().to_lowercase().ends_with(".zip") {
            WorkItem::Archive(path)
        } else {
            WorkItem::Standalone(path)
        };
        if ledger.is_completed(&item.key()) && !options.force_extract {
            return Err(ProcessError::MissingPrecondition(format!(
                "work item already marked processed: '{name}' (use force-extract to repeat)"
            ))
            .into());
        }
        return Ok(vec![item]);
    }

    let mut items = Vec::new();
    for entry in fs::read_dir(&cfg.archives_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.to_lowercase().ends_with(".zip") {
            continue;
        }
        let item = WorkItem::Archive(entry.path());
        if !ledger.is_completed(&item.key()) {
            items.push(item);
        }
    }
    if items.is_empty() {
        info!("all discovered archives are already marked processed");
    }
    Ok(items)
}

/// Drive every media file to a terminal state. Returns false when a stop
/// request or a per-file error left work behind, in which case the caller
/// must not mark the work item complete.
#[allow(clippy::too_many_arguments)]
fn process_media_files(
    media_files: &[PathBuf],
    primary_index: &PrimaryIndex,
    supplemental_index: &SupplementalIndex,
    organizer: &LibraryOrganizer,
    tool: &dyn MetadataTool,
    file_ledger: &mut DurableLog,
    live: bool,
    control: &RunControl,
    summary: &mut RunSummary,
) -> bool {
    let mut all_terminal = true;
    let total = media_files.len() as u64;

    for (idx, media_path) in media_files.iter().enumerate() {
        if control.stop_requested() {
            summary.stopped_early = true;
            return false;
        }
        let ledger_key = media_path.display().to_string();
        if file_ledger.contains(&ledger_key) {
            continue;
        }

        let media = MediaFile::new(media_path);
        let matched = match_sidecars(&media, primary_index, supplemental_index);
        if matched.is_empty() {
            info!(media = %media.basename, "no sidecar match");
        } else {
            summary.matches_found += 1;
            info!(
                media = %media.basename,
                primary = matched.primary.len(),
                supplemental = matched.supplemental.len(),
                "matched sidecars"
            );
        }

        let resolved = resolve::resolve(&media.path, &matched, tool);
        match organizer.commit(&media, &resolved, &matched) {
            Ok(outcome) => {
                summary.files_processed += 1;
                match &outcome {
                    Outcome::Committed { .. } => summary.files_committed += 1,
                    Outcome::CollisionSkipped { .. } => summary.warnings += 1,
                    Outcome::Diverted { .. } => {
                        summary.files_diverted += 1;
                        summary.warnings += 1;
                    }
                }
                if live {
                    if let Err(err) = file_ledger.append(&ledger_key) {
                        error!(media = %media.basename, %err, "failed to record file completion");
                        all_terminal = false;
                    }
                }
            }
            Err(err) => {
                error!(media = %media.basename, %err, "failed to process file; will retry next run");
                summary.errors += 1;
                all_terminal = false;
            }
        }
        // Progress inside large archives; the message is the filename.
        if total > 1 && idx % 25 == 0 {
            info!(current = idx + 1, total, media = %media.basename, "progress");
        }
    }
    all_terminal
}

/// Candidate-probe matching, augmented with the supplemental index so
/// supplemental sidecars are found even when the probe set and the index
/// disagree on key form. Both paths are exact-name only.
fn match_sidecars(
    media: &MediaFile,
    primary_index: &PrimaryIndex,
    supplemental_index: &SupplementalIndex,
) -> MatchResult {
    let mut matched = match_json_for_media(&media.basename, primary_index);
    for path in find_supplemental_for(&media.basename, supplemental_index) {
        if !matched.supplemental.contains(&path) {
            matched.supplemental.push(path);
        }
    }
    matched.supplemental.sort();
    matched
}
