//! Filename suffix parsing and sidecar candidate generation.
//!
//! The export process disambiguates colliding filenames with a numeric
//! `(N)` marker, and the marker can land either before or after the
//! extension depending on which tool produced the name. Everything here is
//! pure string work: no I/O, no failure modes.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

/// `name(N).ext` with N = 1-3 digits.
static SUFFIX_BEFORE_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+)\((?P<num>\d{1,3})\)(?P<ext>\.[^.]+)$").unwrap());

/// `name.ext(N)` with N = 1-3 digits.
static SUFFIX_AFTER_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<base>.+\.[^.]+)\((?P<num>\d{1,3})\)$").unwrap());

/// Title variant with the suffix after the extension, any digit count.
static TITLE_SUFFIX_AFTER_EXT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(?P<name>.+?)(?P<ext>\.[^.]+)(?P<suffix>\(\d+\))$").unwrap());

/// Inline `(N)` immediately before the extension, any digit count.
static INLINE_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\(\d+\))(\.[^.]+)$").unwrap());

/// A media filename decomposed around its duplicate suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuffixParts {
    /// Filename with the suffix removed, e.g. `IMG_1234.JPG`.
    pub base_without_suffix: String,
    /// The marker itself, e.g. `(2)`, when one was recognized.
    pub suffix: Option<String>,
    /// Placement variant `IMG_1234(2).JPG`.
    pub before_ext: Option<String>,
    /// Placement variant `IMG_1234.JPG(2)`.
    pub after_ext: Option<String>,
}

/// Extract a duplicate marker under the strict rules: 1-3 digits, placed
/// immediately before or immediately after the final extension. A
/// parenthesized year like `(2020)` is never a duplicate marker.
pub fn extract_strict_suffix(filename: &str) -> Option<String> {
    if let Some(caps) = SUFFIX_BEFORE_EXT.captures(filename) {
        return Some(format!("({})", &caps["num"]));
    }
    if let Some(caps) = SUFFIX_AFTER_EXT.captures(filename) {
        return Some(format!("({})", &caps["num"]));
    }
    None
}

/// Extract an inline `(N)` marker sitting before the extension, without the
/// digit-count restriction. Used when de-suffixing declared titles and
/// supplemental index keys, where the export writes whatever it wrote.
pub fn extract_inline_suffix(filename: &str) -> Option<String> {
    INLINE_SUFFIX
        .captures(filename)
        .map(|caps| caps[1].to_string())
}

/// Split a media filename around its strict duplicate suffix, producing both
/// placement variants when a suffix is present.
pub fn split_media_suffix(filename: &str) -> SuffixParts {
    if let Some(caps) = SUFFIX_BEFORE_EXT.captures(filename) {
        let suffix = format!("({})", &caps["num"]);
        let base = format!("{}{}", &caps["name"], &caps["ext"]);
        let after_ext = format!("{base}{suffix}");
        return SuffixParts {
            base_without_suffix: base,
            suffix: Some(suffix),
            before_ext: Some(filename.to_string()),
            after_ext: Some(after_ext),
        };
    }
    if let Some(caps) = SUFFIX_AFTER_EXT.captures(filename) {
        let suffix = format!("({})", &caps["num"]);
        let base = caps["base"].to_string();
        let (stem, ext) = split_extension(&base);
        let before_ext = format!("{stem}{suffix}{ext}");
        return SuffixParts {
            base_without_suffix: base,
            suffix: Some(suffix),
            before_ext: Some(before_ext),
            after_ext: Some(filename.to_string()),
        };
    }
    SuffixParts {
        base_without_suffix: filename.to_string(),
        suffix: None,
        before_ext: None,
        after_ext: None,
    }
}

/// A declared title sometimes carries its uniqueness suffix after the
/// extension even though the canonical name has it before. Produce both
/// placements so downstream matching is position-agnostic.
pub fn normalize_title_variants(title: &str) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    variants.insert(title.to_string());
    if let Some(caps) = TITLE_SUFFIX_AFTER_EXT.captures(title) {
        variants.insert(format!("{}{}{}", &caps["name"], &caps["suffix"], &caps["ext"]));
    }
    variants
}

/// `.jpg`/`.jpeg` are used interchangeably by the export; cover both.
pub fn with_extension_variants(filename: &str) -> BTreeSet<String> {
    let mut variants = BTreeSet::new();
    variants.insert(filename.to_string());
    let (stem, ext) = split_extension(filename);
    match ext.to_ascii_lowercase().as_str() {
        ".jpg" => {
            variants.insert(format!("{stem}.jpeg"));
        }
        ".jpeg" => {
            variants.insert(format!("{stem}.jpg"));
        }
        _ => {}
    }
    variants
}

/// The exact, finite set of sidecar filenames worth probing for a media
/// file. When the media name carries a duplicate suffix, only that suffix is
/// used; no other suffix value is ever guessed. When it carries none, no
/// suffixed candidate is generated at all.
pub fn generate_json_candidates(media_filename: &str) -> Vec<String> {
    let parts = split_media_suffix(media_filename);

    let mut placements = BTreeSet::new();
    placements.insert(media_filename.to_string());
    if let (Some(before), Some(after)) = (&parts.before_ext, &parts.after_ext) {
        placements.insert(before.clone());
        placements.insert(after.clone());
    }

    let mut variants = BTreeSet::new();
    for placement in &placements {
        variants.extend(with_extension_variants(placement));
    }

    let mut candidates = BTreeSet::new();
    for variant in &variants {
        candidates.insert(format!("{variant}.json"));
    }

    match &parts.suffix {
        Some(suffix) => {
            for base in with_extension_variants(&parts.base_without_suffix) {
                candidates.insert(format!("{base}.supplemental-metadata{suffix}.json"));
                candidates.insert(format!("{base}.sup{suffix}.json"));
            }
            for variant in &variants {
                candidates.insert(format!("{variant}.supplemental-metadata.json"));
                candidates.insert(format!("{variant}.supplemental-metadata{suffix}.json"));
                candidates.insert(format!("{variant}.sup.json"));
                candidates.insert(format!("{variant}.sup{suffix}.json"));
            }
        }
        None => {
            for variant in &variants {
                candidates.insert(format!("{variant}.supplemental-metadata.json"));
                candidates.insert(format!("{variant}.sup.json"));
            }
        }
    }

    candidates.into_iter().collect()
}

/// Split into `(stem, ".ext")`; the extension part is empty when there is
/// no extension.
fn split_extension(filename: &str) -> (&str, &str) {
    let path = Path::new(filename);
    match (path.file_stem().and_then(|s| s.to_str()), path.extension().and_then(|e| e.to_str())) {
        (Some(stem), Some(_)) => {
            let stem_len = stem.len();
            (&filename[..stem_len], &filename[stem_len..])
        }
        _ => (filename, ""),
    }
}
