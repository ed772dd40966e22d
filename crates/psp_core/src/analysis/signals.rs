//! Signal extraction over accumulated HiNATA records.
//!
//! # Responsibility
//! - Turn active records into topic, tag, preference, source and quote signals.
//! - Weight every record by exponential recency decay.
//!
//! # Invariants
//! - Output is deterministic for identical records and `now_ms`.
//! - Text of `AccessLevel::Private` records never reaches `quotes`.
//! - Signals carry no raw text except quote excerpts.

use crate::analysis::sentiment::{is_sentiment_cue, polarity};
use crate::analysis::tokenize::{is_content_token, keyword_set, words};
use crate::config::AnalysisSettings;
use crate::model::hinata::{HiNataId, HiNataRecord};
use std::cmp::Ordering;
use std::collections::BTreeMap;

pub const MS_PER_DAY: f64 = 86_400_000.0;
/// Maximum characters kept from one highlight in a quote excerpt.
pub const MAX_QUOTE_CHARS: usize = 160;
const MAX_QUOTE_KEYWORDS: usize = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct TopicSignal {
    pub term: String,
    pub score: f64,
    /// Number of records containing the term.
    pub support: u32,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagSignal {
    pub tag: String,
    pub count: u32,
    pub score: f64,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreferenceSignal {
    /// Strongest topic term of the records expressing the preference.
    pub subject: String,
    /// Recency-weighted mean polarity in `[-1, 1]`.
    pub polarity: f64,
    pub support: u32,
    pub last_seen_at: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceSignal {
    pub source_app: String,
    pub count: u32,
    pub last_seen_at: i64,
}

/// Quotable highlight from a non-private record.
#[derive(Debug, Clone, PartialEq)]
pub struct QuoteCandidate {
    pub record_id: HiNataId,
    pub source_app: String,
    /// Single-line excerpt, at most [`MAX_QUOTE_CHARS`] characters plus an ellipsis.
    pub excerpt: String,
    pub keywords: Vec<String>,
    pub score: f64,
    pub recorded_at: i64,
}

/// Output of one analyzer pass.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SignalSnapshot {
    pub analyzed_at: i64,
    pub record_count: usize,
    pub topics: Vec<TopicSignal>,
    pub tags: Vec<TagSignal>,
    pub preferences: Vec<PreferenceSignal>,
    pub sources: Vec<SourceSignal>,
    pub quotes: Vec<QuoteCandidate>,
}

/// Local, deterministic analyzer. No network, no model calls.
#[derive(Debug, Clone)]
pub struct LocalAnalyzer {
    settings: AnalysisSettings,
}

struct RecordProfile<'a> {
    record: &'a HiNataRecord,
    recency: f64,
    words: Vec<String>,
    term_counts: BTreeMap<String, u32>,
}

#[derive(Default)]
struct TermStats {
    mass: f64,
    support: u32,
    last_seen_at: i64,
}

#[derive(Default)]
struct PreferenceAccumulator {
    weighted_sum: f64,
    weight_total: f64,
    plain_sum: f64,
    support: u32,
    last_seen_at: i64,
}

impl LocalAnalyzer {
    pub fn new(settings: AnalysisSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &AnalysisSettings {
        &self.settings
    }

    /// Oldest capture time included in analysis, `None` without a window.
    pub fn window_start(&self, now_ms: i64) -> Option<i64> {
        if self.settings.window_days == 0 {
            return None;
        }
        let span = i64::from(self.settings.window_days) * MS_PER_DAY as i64;
        Some(now_ms.saturating_sub(span))
    }

    /// Extracts signals from active records inside the window.
    pub fn analyze(&self, records: &[HiNataRecord], now_ms: i64) -> SignalSnapshot {
        let window_start = self.window_start(now_ms);
        let profiles: Vec<RecordProfile<'_>> = records
            .iter()
            .filter(|record| record.is_active())
            .filter(|record| window_start.map_or(true, |start| record.timestamp >= start))
            .map(|record| self.profile(record, now_ms))
            .collect();

        let term_scores = term_scores(&profiles);

        SignalSnapshot {
            analyzed_at: now_ms,
            record_count: profiles.len(),
            topics: self.topics(&term_scores),
            tags: self.tags(&profiles),
            preferences: self.preferences(&profiles, &term_scores),
            sources: self.sources(&profiles),
            quotes: self.quotes(&profiles, &term_scores),
        }
    }

    fn profile<'a>(&self, record: &'a HiNataRecord, now_ms: i64) -> RecordProfile<'a> {
        let words = words(&record.combined_text());
        let mut term_counts = BTreeMap::new();
        for word in &words {
            if is_content_token(word) && !is_sentiment_cue(word) {
                *term_counts.entry(word.clone()).or_insert(0u32) += 1;
            }
        }
        RecordProfile {
            record,
            recency: recency_weight(record.timestamp, now_ms, self.settings.half_life_days),
            words,
            term_counts,
        }
    }

    fn topics(&self, term_scores: &BTreeMap<String, TopicSignal>) -> Vec<TopicSignal> {
        let mut topics: Vec<TopicSignal> = term_scores.values().cloned().collect();
        topics.sort_by(|a, b| desc(a.score, b.score).then_with(|| a.term.cmp(&b.term)));
        topics.truncate(self.settings.max_topics);
        topics
    }

    fn tags(&self, profiles: &[RecordProfile<'_>]) -> Vec<TagSignal> {
        let mut by_tag: BTreeMap<&str, TagSignal> = BTreeMap::new();
        for profile in profiles {
            for tag in &profile.record.tags {
                let entry = by_tag.entry(tag.as_str()).or_insert_with(|| TagSignal {
                    tag: tag.clone(),
                    count: 0,
                    score: 0.0,
                    last_seen_at: 0,
                });
                entry.count += 1;
                entry.score += profile.recency;
                entry.last_seen_at = entry.last_seen_at.max(profile.record.timestamp);
            }
        }

        let mut tags: Vec<TagSignal> = by_tag.into_values().collect();
        tags.sort_by(|a, b| desc(a.score, b.score).then_with(|| a.tag.cmp(&b.tag)));
        tags.truncate(self.settings.max_tags);
        tags
    }

    fn preferences(
        &self,
        profiles: &[RecordProfile<'_>],
        term_scores: &BTreeMap<String, TopicSignal>,
    ) -> Vec<PreferenceSignal> {
        let mut by_subject: BTreeMap<String, PreferenceAccumulator> = BTreeMap::new();
        for profile in profiles {
            let Some(record_polarity) = polarity(&profile.words) else {
                continue;
            };
            let Some(subject) = strongest_term(profile, term_scores) else {
                continue;
            };
            let entry = by_subject.entry(subject.to_string()).or_default();
            entry.weighted_sum += profile.recency * record_polarity;
            entry.weight_total += profile.recency;
            entry.plain_sum += record_polarity;
            entry.support += 1;
            entry.last_seen_at = entry.last_seen_at.max(profile.record.timestamp);
        }

        let mut preferences: Vec<PreferenceSignal> = by_subject
            .into_iter()
            .map(|(subject, acc)| {
                let polarity = if acc.weight_total > f64::EPSILON {
                    acc.weighted_sum / acc.weight_total
                } else {
                    acc.plain_sum / f64::from(acc.support)
                };
                PreferenceSignal {
                    subject,
                    polarity: polarity.clamp(-1.0, 1.0),
                    support: acc.support,
                    last_seen_at: acc.last_seen_at,
                }
            })
            .collect();
        preferences.sort_by(|a, b| {
            b.support
                .cmp(&a.support)
                .then_with(|| desc(a.polarity.abs(), b.polarity.abs()))
                .then_with(|| a.subject.cmp(&b.subject))
        });
        preferences.truncate(self.settings.max_topics);
        preferences
    }

    fn sources(&self, profiles: &[RecordProfile<'_>]) -> Vec<SourceSignal> {
        let mut by_app: BTreeMap<&str, SourceSignal> = BTreeMap::new();
        for profile in profiles {
            let app = profile.record.source_app.as_str();
            let entry = by_app.entry(app).or_insert_with(|| SourceSignal {
                source_app: app.to_string(),
                count: 0,
                last_seen_at: 0,
            });
            entry.count += 1;
            entry.last_seen_at = entry.last_seen_at.max(profile.record.timestamp);
        }

        let mut sources: Vec<SourceSignal> = by_app.into_values().collect();
        sources.sort_by(|a, b| {
            b.count
                .cmp(&a.count)
                .then_with(|| a.source_app.cmp(&b.source_app))
        });
        sources.truncate(self.settings.max_sources);
        sources
    }

    fn quotes(
        &self,
        profiles: &[RecordProfile<'_>],
        term_scores: &BTreeMap<String, TopicSignal>,
    ) -> Vec<QuoteCandidate> {
        let mut quotes: Vec<QuoteCandidate> = profiles
            .iter()
            .filter(|profile| profile.record.access_level.allows_quoting())
            .filter_map(|profile| quote_candidate(profile, term_scores))
            .collect();
        quotes.sort_by(|a, b| {
            desc(a.score, b.score)
                .then_with(|| b.recorded_at.cmp(&a.recorded_at))
                .then_with(|| a.record_id.cmp(&b.record_id))
        });
        quotes.truncate(self.settings.max_quotes);
        quotes
    }
}

/// Exponential decay `0.5^(age / half_life)`; future timestamps count as fresh.
pub fn recency_weight(recorded_at: i64, now_ms: i64, half_life_days: f64) -> f64 {
    let age_days = (now_ms.saturating_sub(recorded_at)).max(0) as f64 / MS_PER_DAY;
    if half_life_days <= 0.0 {
        return 1.0;
    }
    0.5_f64.powf(age_days / half_life_days)
}

/// `score(term) = Σ recency * (1 + ln tf) * ln(1 + N / df)`.
fn term_scores(profiles: &[RecordProfile<'_>]) -> BTreeMap<String, TopicSignal> {
    let mut stats: BTreeMap<&str, TermStats> = BTreeMap::new();
    for profile in profiles {
        for (term, count) in &profile.term_counts {
            let entry = stats.entry(term.as_str()).or_default();
            entry.mass += profile.recency * (1.0 + f64::from(*count).ln());
            entry.support += 1;
            entry.last_seen_at = entry.last_seen_at.max(profile.record.timestamp);
        }
    }

    let record_count = profiles.len() as f64;
    stats
        .into_iter()
        .map(|(term, stat)| {
            let idf = (1.0 + record_count / f64::from(stat.support)).ln();
            (
                term.to_string(),
                TopicSignal {
                    term: term.to_string(),
                    score: stat.mass * idf,
                    support: stat.support,
                    last_seen_at: stat.last_seen_at,
                },
            )
        })
        .collect()
}

fn strongest_term<'p>(
    profile: &'p RecordProfile<'_>,
    term_scores: &BTreeMap<String, TopicSignal>,
) -> Option<&'p str> {
    let mut best: Option<(&str, f64)> = None;
    for term in profile.term_counts.keys() {
        let score = term_scores.get(term).map_or(0.0, |signal| signal.score);
        match best {
            Some((_, best_score)) if score <= best_score => {}
            _ => best = Some((term.as_str(), score)),
        }
    }
    best.map(|(term, _)| term)
}

fn quote_candidate(
    profile: &RecordProfile<'_>,
    term_scores: &BTreeMap<String, TopicSignal>,
) -> Option<QuoteCandidate> {
    let highlight = profile.record.highlight.trim();
    if highlight.is_empty() {
        return None;
    }

    let keywords = keyword_set(highlight);
    if keywords.is_empty() {
        return None;
    }
    let mut ranked: Vec<(&String, f64)> = keywords
        .iter()
        .map(|term| (term, term_scores.get(term).map_or(0.0, |signal| signal.score)))
        .collect();
    let salience: f64 = ranked.iter().map(|(_, score)| score).sum();
    let score = profile.recency * salience / (ranked.len() as f64).sqrt();
    if score <= 0.0 {
        return None;
    }

    ranked.sort_by(|a, b| desc(a.1, b.1).then_with(|| a.0.cmp(b.0)));
    ranked.truncate(MAX_QUOTE_KEYWORDS);

    Some(QuoteCandidate {
        record_id: profile.record.id,
        source_app: profile.record.source_app.clone(),
        excerpt: single_line_excerpt(highlight, MAX_QUOTE_CHARS),
        keywords: ranked.into_iter().map(|(term, _)| term.clone()).collect(),
        score,
        recorded_at: profile.record.timestamp,
    })
}

/// Collapses whitespace to single spaces and caps length with `...`.
pub fn single_line_excerpt(value: &str, max_chars: usize) -> String {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let mut excerpt: String = collapsed.chars().take(max_chars).collect();
    excerpt = excerpt.trim_end().to_string();
    excerpt.push_str("...");
    excerpt
}

fn desc(a: f64, b: f64) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::{recency_weight, single_line_excerpt, LocalAnalyzer, MS_PER_DAY};
    use crate::config::AnalysisSettings;
    use crate::model::hinata::{AccessLevel, HiNataRecord};
    use uuid::Uuid;

    const NOW: i64 = 1_800_000_000_000;

    fn record(days_ago: i64, highlight: &str, note: &str) -> HiNataRecord {
        HiNataRecord::with_id(
            Uuid::new_v4(),
            NOW - days_ago * MS_PER_DAY as i64,
            "reader.app",
            highlight,
            note,
        )
    }

    #[test]
    fn recency_halves_every_half_life() {
        let day = MS_PER_DAY as i64;
        assert!((recency_weight(NOW, NOW, 30.0) - 1.0).abs() < 1e-12);
        assert!((recency_weight(NOW - 30 * day, NOW, 30.0) - 0.5).abs() < 1e-12);
        assert!((recency_weight(NOW + day, NOW, 30.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn recurring_terms_rank_as_topics() {
        let analyzer = LocalAnalyzer::new(AnalysisSettings::default());
        let records = vec![
            record(1, "Ownership rules in Rust", "borrowing feels natural"),
            record(2, "Rust async runtimes", "compare executors"),
            record(3, "Gardening tips", "tomatoes need sun"),
        ];

        let snapshot = analyzer.analyze(&records, NOW);
        assert_eq!(snapshot.record_count, 3);
        assert_eq!(snapshot.topics[0].term, "rust");
        assert_eq!(snapshot.topics[0].support, 2);
    }

    #[test]
    fn window_and_tombstones_exclude_records() {
        let analyzer = LocalAnalyzer::new(AnalysisSettings {
            window_days: 10,
            ..AnalysisSettings::default()
        });
        let mut deleted = record(1, "deleted topic", "");
        deleted.soft_delete();
        let records = vec![deleted, record(40, "ancient topic", ""), record(2, "fresh topic", "")];

        let snapshot = analyzer.analyze(&records, NOW);
        assert_eq!(snapshot.record_count, 1);
        assert!(snapshot.topics.iter().all(|topic| topic.term != "ancient"));
        assert!(snapshot.topics.iter().all(|topic| topic.term != "deleted"));
    }

    #[test]
    fn preferences_follow_sentiment_cues() {
        let analyzer = LocalAnalyzer::new(AnalysisSettings::default());
        let records = vec![
            record(1, "Jazz piano trio", "I love jazz"),
            record(2, "Another jazz record", "wonderful jazz session"),
            record(3, "Opera night", "opera was boring, opera is tedious"),
        ];

        let snapshot = analyzer.analyze(&records, NOW);
        let jazz = snapshot
            .preferences
            .iter()
            .find(|pref| pref.subject == "jazz")
            .expect("jazz preference");
        assert!(jazz.polarity > 0.0);
        assert_eq!(jazz.support, 2);
        let opera = snapshot
            .preferences
            .iter()
            .find(|pref| pref.subject == "opera")
            .expect("opera preference");
        assert!(opera.polarity < 0.0);
    }

    #[test]
    fn private_highlights_are_never_quoted() {
        let analyzer = LocalAnalyzer::new(AnalysisSettings::default());
        let mut public = record(1, "Shared thoughts on distributed systems", "");
        public.access_level = AccessLevel::Public;
        let private = record(1, "Secret diary about distributed systems", "");

        let snapshot = analyzer.analyze(&[public.clone(), private.clone()], NOW);
        assert_eq!(snapshot.quotes.len(), 1);
        assert_eq!(snapshot.quotes[0].record_id, public.id);
        assert!(snapshot
            .quotes
            .iter()
            .all(|quote| !quote.excerpt.contains("Secret")));
    }

    #[test]
    fn analysis_is_deterministic() {
        let analyzer = LocalAnalyzer::new(AnalysisSettings::default());
        let mut records = vec![
            record(1, "alpha beta gamma", "delta"),
            record(2, "beta gamma", "epsilon"),
            record(3, "gamma zeta", "alpha"),
        ];
        for record in &mut records {
            record.access_level = AccessLevel::Shared;
            record.tags = vec!["greek".to_string()];
        }

        let first = analyzer.analyze(&records, NOW);
        let second = analyzer.analyze(&records, NOW);
        assert_eq!(first, second);
    }

    #[test]
    fn excerpt_is_single_line_and_bounded() {
        let excerpt = single_line_excerpt("line one\n\n  line   two", 160);
        assert_eq!(excerpt, "line one line two");
        let long = "word ".repeat(100);
        let excerpt = single_line_excerpt(&long, 20);
        assert!(excerpt.ends_with("..."));
        assert!(excerpt.chars().count() <= 23);
    }
}
