use std::path::PathBuf;

use thiserror::Error;

/// Failure classes the pipeline distinguishes. Only `MissingPrecondition`
/// aborts a run; everything else is absorbed at the per-item or per-file
/// boundary and surfaced as a logged warning or a divert outcome.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// A required input directory or external tool is absent. Raised before
    /// any mutation.
    #[error("precondition failed: {0}")]
    MissingPrecondition(String),

    /// A source archive cannot be opened. The archive itself is left
    /// untouched and recorded in the corrupt-archives log.
    #[error("archive cannot be opened: {path}")]
    CorruptSource {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    /// The external metadata tool failed across every backend.
    #[error("metadata tool failed: {0}")]
    ToolFailure(String),
}
