//! Exact-candidate matching between media files and sidecar records.
//!
//! The matcher only ever probes names produced by the suffix resolver; a
//! media file with no exact-name hit gets an empty result, never a guess.

use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::index::{is_supplemental_name, normalize_key, PrimaryIndex, SupplementalIndex};
use crate::suffix::{extract_inline_suffix, generate_json_candidates, normalize_title_variants};

/// Sidecars matched to one media file, split by marker kind. Both lists are
/// path-sorted so downstream precedence iteration is deterministic.
#[derive(Debug, Clone, Default)]
pub struct MatchResult {
    pub primary: Vec<PathBuf>,
    pub supplemental: Vec<PathBuf>,
}

impl MatchResult {
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.supplemental.is_empty()
    }

    /// Every matched sidecar, primary first.
    pub fn all(&self) -> Vec<PathBuf> {
        let mut all = self.primary.clone();
        all.extend(self.supplemental.iter().cloned());
        all
    }
}

/// Probe the exact candidate set for one media filename against the primary
/// index and bucket the hits.
pub fn match_json_for_media(media_basename: &str, index: &PrimaryIndex) -> MatchResult {
    let mut result = MatchResult::default();
    for candidate in generate_json_candidates(media_basename) {
        let Some(path) = index.get(&candidate) else {
            continue;
        };
        if is_supplemental_name(&candidate) {
            result.supplemental.push(path.to_path_buf());
        } else {
            result.primary.push(path.to_path_buf());
        }
    }
    result.primary.sort();
    result.primary.dedup();
    result.supplemental.sort();
    result.supplemental.dedup();
    result
}

/// All supplemental sidecars for a media basename: the exact expected-name
/// set for this specific file, intersected with the indexed candidates under
/// its de-suffixed base key. Returns the empty list rather than guessing.
pub fn find_supplemental_for(media_basename: &str, index: &SupplementalIndex) -> Vec<PathBuf> {
    let variants = normalize_title_variants(media_basename);

    let mut suffix = None;
    let mut base_without_suffix = None;
    for variant in &variants {
        if let Some(found) = extract_inline_suffix(variant) {
            base_without_suffix = Some(variant.replace(&found, ""));
            suffix = Some(found);
            break;
        }
    }
    let base_without_suffix =
        base_without_suffix.unwrap_or_else(|| media_basename.to_string());

    let candidates = index.candidates_for(&base_without_suffix);
    if candidates.is_empty() {
        return Vec::new();
    }

    let mut expected: BTreeSet<String> = BTreeSet::new();
    match &suffix {
        Some(suffix) => {
            let mut variants_with_suffix = variants.clone();
            variants_with_suffix.insert(format!("{base_without_suffix}{suffix}"));

            for base in normalize_title_variants(&base_without_suffix) {
                expected.insert(normalize_key(&format!(
                    "{base}.supplemental-metadata{suffix}.json"
                )));
                expected.insert(normalize_key(&format!("{base}.sup{suffix}.json")));
            }
            for variant in &variants_with_suffix {
                expected.insert(normalize_key(&format!("{variant}.supplemental-metadata.json")));
                expected.insert(normalize_key(&format!(
                    "{variant}.supplemental-metadata{suffix}.json"
                )));
                expected.insert(normalize_key(&format!("{variant}.sup.json")));
                expected.insert(normalize_key(&format!("{variant}.sup{suffix}.json")));
            }
        }
        None => {
            for variant in &variants {
                expected.insert(normalize_key(&format!("{variant}.supplemental-metadata.json")));
                expected.insert(normalize_key(&format!("{variant}.sup.json")));
            }
        }
    }

    candidates
        .iter()
        .filter(|path| {
            path.file_name()
                .map(|name| expected.contains(&normalize_key(&name.to_string_lossy())))
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}
