//! Display-name to filesystem-slug derivation.
//!
//! Every script gets a stable, filesystem-safe slug derived from its
//! unicode display name. The slug names the script's on-disk directory,
//! so it is restricted to `[a-z0-9-]`. Uniqueness within a folder is
//! enforced by the script repository, which appends `-2`, `-3`, … on
//! collision.

/// Derive a filesystem-safe slug from a display name.
///
/// Lowercases, replaces whitespace runs with `-`, strips everything
/// outside `[a-z0-9-]`, collapses repeated `-`, and trims leading and
/// trailing `-`. Falls back to `"script"` when nothing survives.
///
/// The function is idempotent: `slugify(slugify(x)) == slugify(x)`.
pub fn slugify(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    let mut last_was_hyphen = true; // suppresses leading hyphens

    for ch in display_name.chars() {
        let ch = if ch.is_whitespace() { '-' } else { ch };
        for lowered in ch.to_lowercase() {
            if lowered.is_ascii_lowercase() || lowered.is_ascii_digit() {
                slug.push(lowered);
                last_was_hyphen = false;
            } else if lowered == '-' && !last_was_hyphen {
                slug.push('-');
                last_was_hyphen = true;
            }
        }
    }

    // Trailing hyphen can remain when the name ends in whitespace or symbols.
    while slug.ends_with('-') {
        slug.pop();
    }

    if slug.is_empty() {
        slug.push_str("script");
    }

    slug
}

/// Build the candidate slug for collision attempt `n`.
///
/// Attempt 1 is the base slug itself; attempt `n >= 2` appends `-n`.
pub fn slug_candidate(base: &str, attempt: u32) -> String {
    if attempt <= 1 {
        base.to_string()
    } else {
        format!("{base}-{attempt}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lowercases_and_hyphenates() {
        assert_eq!(slugify("Hello World"), "hello-world");
    }

    #[test]
    fn collapses_whitespace_runs() {
        assert_eq!(slugify("Hello   World"), "hello-world");
        assert_eq!(slugify("a\t\n b"), "a-b");
    }

    #[test]
    fn strips_special_characters() {
        assert_eq!(slugify("Data (v2) — final!"), "data-v2-final");
        assert_eq!(slugify("café+script"), "cafscript");
    }

    #[test]
    fn collapses_repeated_hyphens() {
        assert_eq!(slugify("a -- b"), "a-b");
        assert_eq!(slugify("a- -b"), "a-b");
    }

    #[test]
    fn trims_leading_and_trailing_hyphens() {
        assert_eq!(slugify("  hello  "), "hello");
        assert_eq!(slugify("--hello--"), "hello");
    }

    #[test]
    fn empty_falls_back_to_script() {
        assert_eq!(slugify(""), "script");
        assert_eq!(slugify("!!!"), "script");
        assert_eq!(slugify("   "), "script");
    }

    #[test]
    fn numbers_survive() {
        assert_eq!(slugify("Backup 2024"), "backup-2024");
    }

    #[test]
    fn idempotent() {
        for name in ["Hello World", "Data (v2)", "  x  ", "!!!", "a--b"] {
            let once = slugify(name);
            assert_eq!(slugify(&once), once, "slugify not idempotent for {name:?}");
        }
    }

    #[test]
    fn output_is_always_valid() {
        for name in ["Hello World", "", "çœ∑", "A B C", "--"] {
            let slug = slugify(name);
            assert!(!slug.is_empty());
            assert!(slug
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'));
            assert!(!slug.starts_with('-') && !slug.ends_with('-'));
        }
    }

    #[test]
    fn candidate_numbering() {
        assert_eq!(slug_candidate("report", 1), "report");
        assert_eq!(slug_candidate("report", 2), "report-2");
        assert_eq!(slug_candidate("report", 10), "report-10");
    }
}
