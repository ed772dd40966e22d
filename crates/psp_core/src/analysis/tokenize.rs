//! Text tokenization shared by the analyzer and invocation scoring.
//!
//! # Invariants
//! - Output is lowercase and deterministic for identical input.
//! - Curly apostrophes are folded to `'` so contractions stay one word.
//! - A trailing possessive `'s` is dropped: `Rust's` and `rust` are one word.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;

static WORD_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\p{L}\p{N}]+(?:'[\p{L}]+)?").expect("valid word regex"));

/// Minimum character count for a content token.
pub const MIN_TOKEN_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "above", "after", "again", "against", "all", "also", "and", "any", "are", "aren't",
    "because", "been", "before", "being", "below", "between", "both", "but", "can", "can't",
    "cannot", "could", "couldn't", "did", "didn't", "does", "doesn't", "doing", "don't", "down",
    "during", "each", "even", "ever", "every", "few", "for", "from", "further", "get", "gets",
    "got", "had", "hadn't", "has", "hasn't", "have", "haven't", "having", "her", "here", "hers",
    "herself", "him", "himself", "his", "how", "i'm", "i've", "into", "isn't", "its",
    "itself", "just", "let", "like", "made", "make", "many", "may", "more", "most",
    "much", "must", "myself", "never", "nor", "not", "now", "off", "once", "one", "only", "other",
    "our", "ours", "ourselves", "out", "over", "own", "really", "same", "she", "should",
    "shouldn't", "some", "still", "such", "than", "that", "the", "their", "theirs",
    "them", "themselves", "then", "there", "these", "they", "thing", "things", "this", "those",
    "through", "too", "under", "until", "very", "was", "wasn't", "way", "we're", "well", "were",
    "weren't", "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with",
    "won't", "would", "wouldn't", "yet", "you", "you're", "your", "yours", "yourself",
];

/// Splits text into lowercase words, keeping contractions intact and
/// dropping possessive `'s`.
pub fn words(text: &str) -> Vec<String> {
    let folded = text.replace(['\u{2019}', '\u{2018}'], "'");
    WORD_RE
        .find_iter(&folded)
        .map(|m| {
            let word = m.as_str().to_lowercase();
            match word.strip_suffix("'s") {
                Some(stem) => stem.to_string(),
                None => word,
            }
        })
        .collect()
}

/// Returns whether `word` carries no topical meaning.
pub fn is_stopword(word: &str) -> bool {
    STOPWORDS.binary_search(&word).is_ok()
}

/// Returns whether a lowercase word qualifies as a content token.
pub fn is_content_token(word: &str) -> bool {
    word.chars().count() >= MIN_TOKEN_CHARS
        && !word.chars().all(|c| c.is_ascii_digit())
        && !is_stopword(word)
}

/// Content tokens in input order (duplicates kept).
pub fn content_tokens(text: &str) -> Vec<String> {
    words(text)
        .into_iter()
        .filter(|word| is_content_token(word))
        .collect()
}

/// Distinct content tokens, sorted.
pub fn keyword_set(text: &str) -> BTreeSet<String> {
    content_tokens(text).into_iter().collect()
}
