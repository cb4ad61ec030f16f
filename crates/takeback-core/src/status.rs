//! Read-only status report assembled purely from the ledgers and issue
//! logs. Generating it never mutates anything.

use std::fmt;
use std::fs;

use crate::config::ProjectConfig;
use crate::ledger::{count_lines, WorkLedger};

#[derive(Debug)]
pub struct StatusReport {
    pub total_archives: usize,
    pub processed_archives: usize,
    pub processed_files: usize,
    pub tool_failures: usize,
    pub path_too_long: usize,
    pub corrupt_archives: usize,
    cfg: ProjectConfig,
}

impl StatusReport {
    pub fn has_issues(&self) -> bool {
        self.tool_failures > 0 || self.path_too_long > 0 || self.corrupt_archives > 0
    }
}

/// Assemble the report from on-disk state.
pub fn gather(cfg: &ProjectConfig) -> anyhow::Result<StatusReport> {
    let total_archives = match fs::read_dir(&cfg.archives_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().to_lowercase().ends_with(".zip"))
            .count(),
        Err(_) => 0,
    };
    let ledger = WorkLedger::open(&cfg.work_items_log)?;

    Ok(StatusReport {
        total_archives,
        processed_archives: ledger.completed_archives(),
        processed_files: count_lines(&cfg.processed_files_log),
        tool_failures: count_lines(&cfg.tool_failures_log),
        path_too_long: count_lines(&cfg.path_too_long_log),
        corrupt_archives: count_lines(&cfg.corrupt_archives_log),
        cfg: cfg.clone(),
    })
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:=<60}", "")?;
        writeln!(f, "{:^60}", "PROJECT STATUS REPORT")?;
        writeln!(f, "{:=<60}", "")?;
        writeln!(f)?;
        writeln!(f, "Progress:")?;
        writeln!(
            f,
            "  Archives processed: {} / {}",
            self.processed_archives, self.total_archives
        )?;
        writeln!(f, "  Media files processed: {}", self.processed_files)?;
        writeln!(f)?;
        writeln!(f, "Issues requiring attention:")?;
        if self.has_issues() {
            if self.tool_failures > 0 {
                writeln!(f, "  [WARN] Metadata tool failures: {} files", self.tool_failures)?;
            }
            if self.path_too_long > 0 {
                writeln!(f, "  [WARN] Path too long: {} files", self.path_too_long)?;
            }
            if self.corrupt_archives > 0 {
                writeln!(f, "  [ERROR] Corrupt archives: {}", self.corrupt_archives)?;
            }
        } else {
            writeln!(f, "  [OK] No issues found")?;
        }
        writeln!(f)?;
        writeln!(f, "Progress ledgers (for resuming):")?;
        writeln!(f, "  {}", self.cfg.processed_files_log.display())?;
        writeln!(f, "  {}", self.cfg.work_items_log.display())?;
        writeln!(f, "Issue logs (for review):")?;
        writeln!(f, "  {}", self.cfg.tool_failures_log.display())?;
        writeln!(f, "  {}", self.cfg.path_too_long_log.display())?;
        writeln!(f, "  {}", self.cfg.corrupt_archives_log.display())?;
        writeln!(f, "Review folders:")?;
        writeln!(f, "  {}", self.cfg.needs_review_dir.display())?;
        Ok(())
    }
}
