use std::path::{Path, PathBuf};

/// One discovered media file. Identity is the original path until the file
/// is committed or diverted.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub path: PathBuf,
    /// Just the filename component.
    pub basename: String,
}

impl MediaFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let basename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, basename }
    }

    /// Filename without its extension.
    pub fn stem(&self) -> &str {
        Path::new(&self.basename)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(&self.basename)
    }

    /// Extension as recorded by the filesystem, dot included. The
    /// content-detected extension from the metadata tool takes precedence at
    /// commit time; this is the fallback.
    pub fn fs_extension(&self) -> String {
        Path::new(&self.basename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| format!(".{e}"))
            .unwrap_or_default()
    }
}
