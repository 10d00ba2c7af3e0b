//! Text normalization shared by the serializers and the query engine.

use std::sync::OnceLock;

use rust_stemmers::{Algorithm, Stemmer};
use unicode_segmentation::UnicodeSegmentation;

const ELLIPSIS: &str = "…";

pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Cuts `text` to at most `max_chars` characters, appending an ellipsis when shortened.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(ELLIPSIS);
    truncated
}

/// Lowercased, whitespace-collapsed form used for comparisons.
pub fn normalize(text: &str) -> String {
    collapse_whitespace(text).to_lowercase()
}

pub fn words(text: &str) -> Vec<String> {
    text.unicode_words().map(str::to_lowercase).collect()
}

/// English Snowball stem, so plurals and verb forms compare equal.
pub fn stem(word: &str) -> String {
    static ENGLISH: OnceLock<Stemmer> = OnceLock::new();
    ENGLISH
        .get_or_init(|| Stemmer::create(Algorithm::English))
        .stem(word)
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_counts_characters_not_bytes() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo…");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn stems_fold_inflections_together() {
        assert_eq!(stem("searching"), "search");
        assert_eq!(stem("searches"), "search");
        assert_eq!(stem("running"), "run");
        assert_eq!(stem("entries"), stem("entry"));
        assert_eq!(stem("buttons"), "button");
        assert_eq!(stem("is"), "is");
        assert_eq!(words("Sign-In now!"), vec!["sign", "in", "now"]);
    }

    #[test]
    fn normalize_collapses_and_lowercases() {
        assert_eq!(normalize("  Sign\n In "), "sign in");
    }
}
