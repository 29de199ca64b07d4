//! Content cleaning pipeline.
//!
//! Each pass is a function `&str -> String` applied in sequence. Fingerprints
//! are computed after cleaning, so pages differing only in formatting or
//! boilerplate collapse to one record.

use std::sync::LazyLock;

use regex::Regex;

/// Cap on cleaned content length, in characters.
const MAX_CONTENT_CHARS: usize = 15_000;

/// Result of running the cleaning pipeline.
#[derive(Debug, Clone)]
pub struct Cleaned {
    pub text: String,
    /// Whether cleaning changed the input.
    pub changed: bool,
}

/// Run the full cleaning pipeline on extracted page text.
pub fn clean_content(text: &str) -> Cleaned {
    let mut result = text.to_string();

    result = strip_boilerplate(&result);
    result = normalize_whitespace(&result);
    result = truncate_chars(&result, MAX_CONTENT_CHARS);

    let changed = result != text;
    Cleaned {
        text: result,
        changed,
    }
}

// ---------------------------------------------------------------------------
// Pass 1: Strip boilerplate phrases
// ---------------------------------------------------------------------------

static BOILERPLATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(cookie policy|privacy policy|terms of service|all rights reserved|powered by \S+|this site uses cookies|accept cookies|decline cookies|subscribe to (?:our )?newsletter|newsletter signup|follow us on \w+|loading\.\.\.|please wait\.\.\.|javascript required|© \d{4}[^.]*\.?)",
    )
    .expect("valid regex")
});

fn strip_boilerplate(text: &str) -> String {
    BOILERPLATE_RE.replace_all(text, "").into_owned()
}

// ---------------------------------------------------------------------------
// Pass 2: Normalize whitespace
// ---------------------------------------------------------------------------

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

// ---------------------------------------------------------------------------
// Pass 3: Length cap
// ---------------------------------------------------------------------------

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    text.chars().take(max).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_whitespace() {
        let cleaned = clean_content("hello   world\n\n  again\t ");
        assert_eq!(cleaned.text, "hello world again");
        assert!(cleaned.changed);
    }

    #[test]
    fn strips_boilerplate_phrases() {
        let cleaned = clean_content("Great products here. This site uses cookies. Accept cookies");
        assert_eq!(cleaned.text, "Great products here.");
    }

    #[test]
    fn formatting_variants_collapse() {
        let a = clean_content("Samsung Galaxy S25   Rs. 294,000.00\n\nIn stock");
        let b = clean_content("Samsung Galaxy S25 Rs. 294,000.00 In stock");
        assert_eq!(a.text, b.text);
    }

    #[test]
    fn clean_input_unchanged() {
        let cleaned = clean_content("already clean text");
        assert_eq!(cleaned.text, "already clean text");
        assert!(!cleaned.changed);
    }

    #[test]
    fn long_content_capped() {
        let long = "word ".repeat(10_000);
        let cleaned = clean_content(&long);
        assert!(cleaned.text.chars().count() <= MAX_CONTENT_CHARS);
    }
}
