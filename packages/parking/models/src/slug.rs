//! Deterministic slugging of free-text names into stable identifiers.
//!
//! Slugs are used as persistent identity keys for pools and lots, so the
//! transformation must never change for a given input.

use std::sync::LazyLock;

use regex::Regex;
use unicode_normalization::UnicodeNormalization as _;

/// Maximum length of a slug in bytes (slugs are pure ASCII).
pub const MAX_SLUG_LEN: usize = 64;

/// Runs of anything that is not a lowercase ASCII letter or digit.
static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9]+").expect("valid regex"));

/// Converts any string into a slug.
///
/// The pipeline:
/// 1. Expand `ß` to `ss`
/// 2. Canonical decomposition (NFKD), keeping ASCII characters only
///    (drops combining diacritics, so `ü` becomes `u`)
/// 3. Lowercase
/// 4. Collapse every non-alphanumeric run into a single `-`
/// 5. Trim leading/trailing hyphens and truncate to [`MAX_SLUG_LEN`]
#[must_use]
pub fn slugify(input: &str) -> String {
    let expanded = input.replace('ß', "ss").replace('ẞ', "SS");
    let ascii: String = expanded.nfkd().filter(char::is_ascii).collect();
    let lower = ascii.to_ascii_lowercase();
    let hyphenated = NON_ALNUM_RE.replace_all(&lower, "-");
    let trimmed = hyphenated.trim_matches('-');
    let truncated = &trimmed[..trimmed.len().min(MAX_SLUG_LEN)];
    truncated.trim_end_matches('-').to_string()
}

/// Returns `true` if `value` is already a well-formed slug.
#[must_use]
pub fn is_slug(value: &str) -> bool {
    value.len() <= MAX_SLUG_LEN
        && !value.starts_with('-')
        && !value.ends_with('-')
        && !value.contains("--")
        && value
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLES: &[&str] = &[
        "Parkhaus Kaiserplatz",
        "aachen-Kaiserplatz",
        "Tiefgarage Münsterplatz",
        "Straße des 17. Juni",
        "  --Ärger//mit   Öffnungszeiten-- ",
        "Nørreport",
        "Urban Level 2+3",
        "fam-24278",
        "",
        "---",
        "Ein sehr, sehr langer Name für ein Parkhaus, das mehr als vierundsechzig Zeichen hat",
    ];

    #[test]
    fn slugifies_names() {
        assert_eq!(slugify("Parkhaus Kaiserplatz"), "parkhaus-kaiserplatz");
        assert_eq!(slugify("aachen-Kaiserplatz"), "aachen-kaiserplatz");
        assert_eq!(slugify("Tiefgarage Münsterplatz"), "tiefgarage-munsterplatz");
        assert_eq!(slugify("Straße des 17. Juni"), "strasse-des-17-juni");
        assert_eq!(slugify("Urban Level 2+3"), "urban-level-2-3");
    }

    #[test]
    fn drops_letters_without_decomposition() {
        assert_eq!(slugify("Nørreport"), "nrreport");
    }

    #[test]
    fn trims_and_collapses_hyphens() {
        assert_eq!(
            slugify("  --Ärger//mit   Öffnungszeiten-- "),
            "arger-mit-offnungszeiten"
        );
        assert_eq!(slugify("---"), "");
    }

    #[test]
    fn truncates_without_trailing_hyphen() {
        let slug = slugify(
            "Ein sehr, sehr langer Name für ein Parkhaus, das mehr als vierundsechzig Zeichen hat",
        );
        assert!(slug.len() <= MAX_SLUG_LEN);
        assert!(!slug.ends_with('-'));
        assert!(slug.starts_with("ein-sehr-sehr-langer-name"));
    }

    #[test]
    fn is_idempotent() {
        for sample in SAMPLES {
            let once = slugify(sample);
            assert_eq!(slugify(&once), once, "not idempotent for {sample:?}");
        }
    }

    #[test]
    fn output_is_well_formed() {
        for sample in SAMPLES {
            let slug = slugify(sample);
            assert!(is_slug(&slug), "malformed slug {slug:?} for {sample:?}");
        }
    }

    #[test]
    fn detects_malformed_slugs() {
        assert!(is_slug("aachen-kaiserplatz"));
        assert!(!is_slug("Aachen"));
        assert!(!is_slug("-aachen"));
        assert!(!is_slug("aachen--kaiserplatz"));
    }
}
