//! Low-frequency PSP production.
//!
//! # Responsibility
//! - Analyze records in the configured window and turn signals into fragments.
//! - Merge fragments into storage by key and record the run.
//!
//! # Invariants
//! - Fragment keys are derived from signal identity only, so re-running on
//!   the same data refreshes instead of duplicating.
//! - Quote fragments only come from non-private records.
//! - Initial weights fall inside `[0.3, 0.7]`; learned weights of refreshed
//!   fragments are kept by the repository.

use crate::analysis::signals::{LocalAnalyzer, SignalSnapshot};
use crate::analysis::tokenize::keyword_set;
use crate::config::AnalysisSettings;
use crate::model::psp::{quote_fragment_key, FragmentKind, PspFragment};
use crate::repo::hinata_repo::{HiNataRepository, RecordListQuery};
use crate::repo::psp_repo::{ProductionOutcome, ProductionPlan, PspRepository};
use crate::repo::RepoResult;
use log::info;
use std::time::Instant;

/// Upper bound of records loaded for one production run, newest first.
pub const MAX_PRODUCTION_RECORDS: u32 = 20_000;
/// Minimum absolute polarity for a preference or aversion fragment.
pub const MIN_PREFERENCE_POLARITY: f64 = 0.25;

const BASE_FRAGMENT_WEIGHT: f64 = 0.3;
const FRAGMENT_WEIGHT_SPAN: f64 = 0.4;

/// Summary of one production run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionReport {
    pub started_at: i64,
    pub record_count: usize,
    pub candidate_count: usize,
    pub outcome: ProductionOutcome,
    pub skipped: bool,
}

/// Production strategy over record and fragment repositories.
pub struct ProductionStrategy<H: HiNataRepository, P: PspRepository> {
    records: H,
    psp: P,
    analyzer: LocalAnalyzer,
}

impl<H: HiNataRepository, P: PspRepository> ProductionStrategy<H, P> {
    pub fn new(records: H, psp: P, settings: AnalysisSettings) -> Self {
        Self {
            records,
            psp,
            analyzer: LocalAnalyzer::new(settings),
        }
    }

    /// Runs analysis at `now_ms` and persists the resulting fragment set.
    ///
    /// Runs with fewer than `min_records` records in the window are recorded
    /// as skipped and leave stored fragments untouched.
    pub fn produce(&self, now_ms: i64) -> RepoResult<ProductionReport> {
        let started = Instant::now();
        let records = self.records.list_records(&RecordListQuery {
            since: self.analyzer.window_start(now_ms),
            limit: Some(MAX_PRODUCTION_RECORDS),
            ..RecordListQuery::default()
        })?;

        let skipped = records.len() < self.analyzer.settings().min_records;
        let fragments = if skipped {
            Vec::new()
        } else {
            let snapshot = self.analyzer.analyze(&records, now_ms);
            build_candidates(&snapshot, now_ms)
        };

        let plan = ProductionPlan {
            started_at: now_ms,
            record_count: records.len(),
            fragments,
            skipped,
        };
        let outcome = self.psp.apply_production(&plan)?;

        info!(
            "event=psp_produce module=strategy status={} records={} candidates={} inserted={} refreshed={} retired={} duration_ms={}",
            if skipped { "skipped" } else { "ok" },
            plan.record_count,
            plan.fragments.len(),
            outcome.inserted,
            outcome.refreshed,
            outcome.retired,
            started.elapsed().as_millis()
        );

        Ok(ProductionReport {
            started_at: now_ms,
            record_count: plan.record_count,
            candidate_count: plan.fragments.len(),
            outcome,
            skipped,
        })
    }
}

/// Turns one signal snapshot into candidate fragments.
///
/// Output order follows the snapshot order within each kind.
pub fn build_candidates(snapshot: &SignalSnapshot, now_ms: i64) -> Vec<PspFragment> {
    let mut fragments = Vec::new();

    let top_topic = snapshot.topics.iter().map(|t| t.score).fold(0.0, f64::max);
    for topic in &snapshot.topics {
        let mut fragment = PspFragment::new(
            FragmentKind::Topic,
            format!("topic:{}", topic.term),
            format!("Shows recurring interest in {}.", topic.term),
            initial_weight(topic.score, top_topic),
            now_ms,
        );
        fragment.keywords = vec![topic.term.clone()];
        fragment.support = topic.support;
        fragment.last_seen_at = topic.last_seen_at;
        fragments.push(fragment);
    }

    for preference in &snapshot.preferences {
        let (kind, prefix, text) = if preference.polarity >= MIN_PREFERENCE_POLARITY {
            (
                FragmentKind::Preference,
                "preference",
                format!("Responds positively to {}.", preference.subject),
            )
        } else if preference.polarity <= -MIN_PREFERENCE_POLARITY {
            (
                FragmentKind::Aversion,
                "aversion",
                format!("Tends to dislike {}.", preference.subject),
            )
        } else {
            continue;
        };
        let mut fragment = PspFragment::new(
            kind,
            format!("{prefix}:{}", preference.subject),
            text,
            initial_weight(preference.polarity.abs(), 1.0),
            now_ms,
        );
        fragment.keywords = vec![preference.subject.clone()];
        fragment.support = preference.support;
        fragment.last_seen_at = preference.last_seen_at;
        fragments.push(fragment);
    }

    let top_tag = snapshot.tags.iter().map(|t| t.score).fold(0.0, f64::max);
    for tag in &snapshot.tags {
        let label = one_line(&tag.tag);
        let mut fragment = PspFragment::new(
            FragmentKind::Tag,
            format!("tag:{}", tag.tag),
            format!("Often files saved content under \"{label}\"."),
            initial_weight(tag.score, top_tag),
            now_ms,
        );
        let mut keywords: Vec<String> = keyword_set(&tag.tag).into_iter().collect();
        if keywords.is_empty() {
            keywords.push(label);
        }
        fragment.keywords = keywords;
        fragment.support = tag.count;
        fragment.last_seen_at = tag.last_seen_at;
        fragments.push(fragment);
    }

    let top_source = snapshot.sources.iter().map(|s| s.count).max().unwrap_or(0);
    for source in &snapshot.sources {
        let mut fragment = PspFragment::new(
            FragmentKind::SourceContext,
            format!("source:{}", source.source_app),
            format!("Frequently captures content through {}.", source.source_app),
            initial_weight(f64::from(source.count), f64::from(top_source)),
            now_ms,
        );
        fragment.source_app = Some(source.source_app.clone());
        fragment.support = source.count;
        fragment.last_seen_at = source.last_seen_at;
        fragments.push(fragment);
    }

    let top_quote = snapshot.quotes.iter().map(|q| q.score).fold(0.0, f64::max);
    for quote in &snapshot.quotes {
        let mut fragment = PspFragment::new(
            FragmentKind::Quote,
            quote_fragment_key(quote.record_id),
            format!("Saved highlight: \"{}\"", quote.excerpt),
            initial_weight(quote.score, top_quote),
            now_ms,
        );
        fragment.keywords = quote.keywords.clone();
        fragment.source_app = Some(quote.source_app.clone());
        fragment.support = 1;
        fragment.last_seen_at = quote.recorded_at;
        fragments.push(fragment);
    }

    fragments
}

fn initial_weight(score: f64, top: f64) -> f64 {
    let normalized = if top > 0.0 && score.is_finite() {
        (score / top).clamp(0.0, 1.0)
    } else {
        0.0
    };
    BASE_FRAGMENT_WEIGHT + FRAGMENT_WEIGHT_SPAN * normalized
}

fn one_line(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
