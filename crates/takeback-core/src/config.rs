use std::path::{Path, PathBuf};

/// Default ceiling for destination path lengths. Windows caps paths at 260
/// characters; staying under 240 leaves room for sidecar copies next to the
/// media file.
pub const DEFAULT_MAX_PATH_LENGTH: usize = 240;

/// All paths the pipeline touches, derived once from a project root and a
/// library root. Constructed up front and passed by reference; nothing
/// mutates it after construction.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub project_root: PathBuf,

    /// Mutable scratch area archives are extracted into.
    pub workbench_dir: PathBuf,
    pub extract_target_dir: PathBuf,

    /// Consolidated sidecar JSON files (output of the consolidation pass).
    pub json_repository_dir: PathBuf,
    /// Conflicting sidecar versions found during consolidation.
    pub json_conflicts_dir: PathBuf,

    /// Read-only store of exported archives. Never moved from, never mutated.
    pub archives_dir: PathBuf,

    /// External metadata tool location (native binary plus scripted fallback).
    pub tools_dir: PathBuf,
    pub exiftool_binary: PathBuf,
    pub exiftool_interpreter: PathBuf,
    pub exiftool_script: PathBuf,

    pub library_dir: PathBuf,
    pub needs_review_dir: PathBuf,
    pub orphan_media_dir: PathBuf,
    pub path_too_long_dir: PathBuf,

    /// Per-file completion ledger (lives in the workbench: cleared with it).
    pub processed_files_log: PathBuf,
    /// Work-item completion ledger.
    pub work_items_log: PathBuf,
    /// Consolidation-pass archive ledger.
    pub consolidated_archives_log: PathBuf,

    pub path_too_long_log: PathBuf,
    pub tool_failures_log: PathBuf,
    pub corrupt_archives_log: PathBuf,

    pub max_path_length: usize,
}

impl ProjectConfig {
    pub fn new(project_root: impl AsRef<Path>, library_dir: impl AsRef<Path>) -> Self {
        let project_root = project_root.as_ref().to_path_buf();
        let library_dir = library_dir.as_ref().to_path_buf();

        let workbench_dir = project_root.join("workbench");
        let extract_target_dir = workbench_dir.join("Takeout");
        let tools_dir = project_root.join("tools");
        let exiftool_dir = tools_dir.join("exiftool");
        let needs_review_dir = library_dir.join("__NEEDS_REVIEW__");

        Self {
            processed_files_log: workbench_dir.join(".processed_files.log"),
            work_items_log: project_root.join(".processed_work_items.log"),
            consolidated_archives_log: project_root.join(".consolidated_archives.log"),
            path_too_long_log: project_root.join(".path_too_long.log"),
            tool_failures_log: project_root.join(".tool_failures.log"),
            corrupt_archives_log: project_root.join(".corrupt_archives.log"),
            json_repository_dir: project_root.join("json-repository"),
            json_conflicts_dir: project_root.join("json-conflicts"),
            archives_dir: project_root.join("takeout-archives"),
            exiftool_binary: exiftool_dir.join(exe_name("exiftool")),
            exiftool_interpreter: exiftool_dir.join("exiftool_files").join(exe_name("perl")),
            exiftool_script: exiftool_dir.join("exiftool_files").join("exiftool.pl"),
            orphan_media_dir: needs_review_dir.join("unmatched-media"),
            path_too_long_dir: needs_review_dir.join("path-too-long"),
            max_path_length: DEFAULT_MAX_PATH_LENGTH,
            project_root,
            workbench_dir,
            extract_target_dir,
            tools_dir,
            library_dir,
            needs_review_dir,
        }
    }

    pub fn with_max_path_length(mut self, limit: usize) -> Self {
        self.max_path_length = limit;
        self
    }
}

fn exe_name(base: &str) -> String {
    if cfg!(windows) {
        format!("{base}.exe")
    } else {
        base.to_string()
    }
}
