//! Lexicon-based preference polarity.
//!
//! A negator flips the polarity of the next cue word inside a short window.

const POSITIVE_CUES: &[&str] = &[
    "amazing", "beautiful", "brilliant", "delightful", "enjoy", "enjoyed", "enjoying", "enjoys",
    "excellent", "fantastic", "favorite", "favourite", "fun", "great", "helpful", "insightful",
    "inspiring", "liked", "likes", "love", "loved", "loves", "loving", "prefer", "preferred",
    "prefers", "recommend", "recommended", "useful", "wonderful",
];

const NEGATIVE_CUES: &[&str] = &[
    "annoying", "avoid", "awful", "bad", "boring", "disappointing", "dislike", "disliked",
    "dislikes", "frustrating", "hate", "hated", "hates", "horrible", "overrated", "pointless",
    "poor", "tedious", "terrible", "ugly", "useless", "worst",
];

const NEGATORS: &[&str] = &[
    "can't", "didn't", "doesn't", "don't", "hardly", "isn't", "never", "no", "not", "wasn't",
    "won't",
];

/// Number of words after a negator that it still applies to.
const NEGATION_WINDOW: usize = 3;

/// Returns `+1`, `-1` or `0` for one lowercase word.
pub fn cue_polarity(word: &str) -> i8 {
    if POSITIVE_CUES.binary_search(&word).is_ok() {
        1
    } else if NEGATIVE_CUES.binary_search(&word).is_ok() {
        -1
    } else {
        0
    }
}

/// Returns whether `word` is a sentiment cue and should not become a topic.
pub fn is_sentiment_cue(word: &str) -> bool {
    cue_polarity(word) != 0
}

/// Polarity in `[-1, 1]` for a lowercase word sequence, `None` without cues.
pub fn polarity(words: &[String]) -> Option<f64> {
    let mut positive = 0u32;
    let mut negative = 0u32;
    let mut negation_left = 0usize;

    for word in words {
        if NEGATORS.binary_search(&word.as_str()).is_ok() {
            negation_left = NEGATION_WINDOW;
            continue;
        }

        let mut cue = cue_polarity(word);
        if cue != 0 && negation_left > 0 {
            cue = -cue;
            negation_left = 0;
        } else if negation_left > 0 {
            negation_left -= 1;
        }

        match cue {
            1 => positive += 1,
            -1 => negative += 1,
            _ => {}
        }
    }

    let total = positive + negative;
    if total == 0 {
        return None;
    }
    Some((f64::from(positive) - f64::from(negative)) / f64::from(total))
}

#[cfg(test)]
mod tests {
    use super::{polarity, NEGATIVE_CUES, NEGATORS, POSITIVE_CUES};
    use crate::analysis::tokenize::words;

    #[test]
    fn lexicons_are_sorted_for_binary_search() {
        for list in [POSITIVE_CUES, NEGATIVE_CUES, NEGATORS] {
            let mut sorted = list.to_vec();
            sorted.sort_unstable();
            assert_eq!(sorted, list);
        }
    }

    #[test]
    fn polarity_counts_cues() {
        assert_eq!(polarity(&words("I love this wonderful book")), Some(1.0));
        assert_eq!(polarity(&words("boring and tedious")), Some(-1.0));
        assert_eq!(polarity(&words("great start, awful ending")), Some(0.0));
        assert_eq!(polarity(&words("a plain sentence")), None);
    }

    #[test]
    fn negation_flips_next_cue_within_window() {
        assert_eq!(polarity(&words("I don't love jazz")), Some(-1.0));
        assert_eq!(polarity(&words("not at all boring")), Some(1.0));
        assert_eq!(
            polarity(&words("never mind the weather today, great show")),
            Some(1.0)
        );
    }
}
