//! In-memory lookup structures over the sidecar repository.
//!
//! Two indexes are built once per run: an exact filename index over every
//! sidecar, and a multimap from de-suffixed base names to the supplemental
//! sidecars that might belong to them. Lookup never guesses; the matcher
//! intersects exact candidate names against these structures.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::suffix::{extract_inline_suffix, normalize_title_variants};

static SUPPLEMENTAL_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.supplemental-metadata").unwrap());
static SUP_SHORT_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\.sup(\(\d+\))?\.json$").unwrap());

/// Case-insensitive key form used by both indexes. NFC first so composed and
/// decomposed spellings of the same name collide.
pub fn normalize_key(name: &str) -> String {
    name.nfc().collect::<String>().to_lowercase()
}

/// True when a sidecar filename carries a supplemental-metadata marker.
pub fn is_supplemental_name(filename: &str) -> bool {
    SUPPLEMENTAL_MARKER.is_match(filename) || SUP_SHORT_MARKER.is_match(filename)
}

/// Exact filename -> path over every `*.json` in the repository. Duplicate
/// keys keep the last path seen; repository names are expected unique.
#[derive(Debug, Default)]
pub struct PrimaryIndex {
    entries: HashMap<String, PathBuf>,
}

impl PrimaryIndex {
    pub fn build(json_dir: &Path) -> anyhow::Result<Self> {
        let mut entries = HashMap::new();
        for entry in fs::read_dir(json_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_lowercase().ends_with(".json") {
                continue;
            }
            entries.insert(normalize_key(&name), entry.path());
        }
        Ok(Self { entries })
    }

    pub fn get(&self, filename: &str) -> Option<&Path> {
        self.entries.get(&normalize_key(filename)).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Ordered multimap: de-suffixed base name -> sorted supplemental sidecar
/// paths. Construction and lookup are independent; `candidates_for` is the
/// only read operation.
#[derive(Debug, Default)]
pub struct SupplementalIndex {
    entries: BTreeMap<String, Vec<PathBuf>>,
}

impl SupplementalIndex {
    pub fn build(json_dir: &Path) -> anyhow::Result<Self> {
        let mut entries: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
        for entry in fs::read_dir(json_dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.to_lowercase().ends_with(".json") {
                continue;
            }
            let Some(base) = strip_supplemental_marker(&name) else {
                continue;
            };

            for key in base_keys(&base) {
                let paths = entries.entry(key).or_default();
                if !paths.contains(&entry.path()) {
                    paths.push(entry.path());
                }
            }
        }
        for paths in entries.values_mut() {
            paths.sort();
        }
        Ok(Self { entries })
    }

    /// All supplemental sidecars indexed under a de-suffixed base name.
    /// These are candidates only; the matcher still filters them against the
    /// exact expected-name set.
    pub fn candidates_for(&self, base_name: &str) -> &[PathBuf] {
        self.entries
            .get(&normalize_key(base_name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The media base name in front of a supplemental marker, or None when the
/// filename carries no marker.
fn strip_supplemental_marker(filename: &str) -> Option<String> {
    if let Some(m) = SUPPLEMENTAL_MARKER.find(filename) {
        return Some(filename[..m.start()].to_string());
    }
    if let Some(m) = SUP_SHORT_MARKER.find(filename) {
        return Some(filename[..m.start()].to_string());
    }
    None
}

/// Index keys for one supplemental base name: every title-placement variant,
/// each both with and without its inline suffix.
fn base_keys(base: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for variant in normalize_title_variants(base) {
        push_unique(&mut keys, normalize_key(&variant));
        if let Some(suffix) = extract_inline_suffix(&variant) {
            push_unique(&mut keys, normalize_key(&variant.replace(&suffix, "")));
        }
    }
    keys
}

fn push_unique(keys: &mut Vec<String>, key: String) {
    if !keys.contains(&key) {
        keys.push(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::Write;
    use tempfile::tempdir;

    fn touch(dir: &Path, name: &str) {
        File::create(dir.join(name))
            .unwrap()
            .write_all(b"{}")
            .unwrap();
    }

    #[test]
    fn primary_index_is_case_insensitive_and_json_only() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "IMG_0001.JPG.json");
        touch(dir.path(), "notes.txt");

        let index = PrimaryIndex::build(dir.path()).unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.get("img_0001.jpg.JSON").is_some());
        assert!(index.get("IMG_0001.JPG.json").is_some());
        assert!(index.get("other.jpg.json").is_none());
    }

    #[test]
    fn supplemental_index_strips_markers_and_suffixes() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "IMG_3136.MOV.supplemental-metadata.json");
        touch(dir.path(), "IMG_3136.MOV.supplemental-metadata(1).json");
        touch(dir.path(), "IMG_3136(1).MOV.sup.json");
        touch(dir.path(), "IMG_3136.MOV.json"); // primary, not indexed here

        let index = SupplementalIndex::build(dir.path()).unwrap();
        let candidates = index.candidates_for("img_3136.mov");
        assert_eq!(candidates.len(), 3);
        // Sorted for deterministic downstream iteration.
        let mut sorted = candidates.to_vec();
        sorted.sort();
        assert_eq!(candidates, sorted.as_slice());
    }

    #[test]
    fn supplemental_index_registers_suffixed_base_too() {
        let dir = tempdir().unwrap();
        touch(dir.path(), "IMG_3136(1).MOV.supplemental-metadata.json");

        let index = SupplementalIndex::build(dir.path()).unwrap();
        assert_eq!(index.candidates_for("IMG_3136(1).MOV").len(), 1);
        assert_eq!(index.candidates_for("IMG_3136.MOV").len(), 1);
        assert!(index.candidates_for("IMG_9999.MOV").is_empty());
    }

    #[test]
    fn short_sup_marker_is_recognized() {
        assert!(is_supplemental_name("a.jpg.sup.json"));
        assert!(is_supplemental_name("a.jpg.sup(3).json"));
        assert!(is_supplemental_name("a.jpg.SUPPLEMENTAL-METADATA(2).json"));
        assert!(!is_supplemental_name("a.jpg.json"));
        assert!(!is_supplemental_name("a.supper.json"));
    }

    #[test]
    fn key_normalization_folds_case_and_composition() {
        // "Café" composed vs decomposed must collide.
        assert_eq!(normalize_key("Cafe\u{301}.jpg"), normalize_key("Caf\u{e9}.JPG"));
    }
}
