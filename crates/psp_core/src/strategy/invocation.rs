//! High-frequency PSP invocation.
//!
//! # Responsibility
//! - Score active fragments against a query context.
//! - Compose a bounded prompt and persist the invocation for feedback.
//!
//! # Invariants
//! - `char_count == text.chars().count() <= char_budget`.
//! - Selection order is deterministic: score, then weight, then key.
//! - Empty prompts are returned without persisting an invocation.
//! - The query text is never persisted, only its term count.

use crate::analysis::signals::recency_weight;
use crate::analysis::tokenize::keyword_set;
use crate::model::psp::{PersonalSystemPrompt, PspFragment, QueryContext};
use crate::repo::psp_repo::{InvocationEntry, InvocationRecord, PspRepository};
use crate::repo::RepoError;
use crate::strategy::weights::{FeatureVector, StrategyWeights};
use log::debug;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;
use uuid::Uuid;

/// First line of every non-empty prompt.
pub const PROMPT_HEADER: &str = "Personal context for this user:";
/// Characters added per fragment line besides its text (`\n- `).
pub const LINE_OVERHEAD_CHARS: usize = 3;

/// One scored fragment candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredFragment {
    pub fragment: PspFragment,
    pub features: FeatureVector,
    pub score: f64,
}

/// Invocation strategy over the PSP repository.
pub struct InvocationStrategy<P: PspRepository> {
    psp: P,
    half_life_days: f64,
}

impl<P: PspRepository> InvocationStrategy<P> {
    pub fn new(psp: P, half_life_days: f64) -> Self {
        Self {
            psp,
            half_life_days,
        }
    }

    /// Composes a prompt for `context`.
    ///
    /// An empty fragment store yields an empty prompt, not an error.
    pub fn invoke(&self, context: &QueryContext) -> Result<PersonalSystemPrompt, InvocationError> {
        context.validate().map_err(InvocationError::InvalidContext)?;
        let started = Instant::now();

        let fragments = self.psp.list_fragments(false)?;
        if fragments.is_empty() {
            debug!("event=psp_invoke module=strategy status=empty reason=no_fragments");
            return Ok(PersonalSystemPrompt::empty(context.char_budget, false));
        }
        let weights = self.psp.load_strategy_weights()?;
        let query_terms = keyword_set(&context.query);

        let ranked = rank_fragments(fragments, &query_terms, context, &weights, self.half_life_days);
        let candidate_count = ranked.len();
        let selection = select_within_budget(ranked, context.char_budget, context.max_fragments);
        if selection.chosen.is_empty() {
            debug!(
                "event=psp_invoke module=strategy status=empty reason=budget candidates={candidate_count} char_budget={}",
                context.char_budget
            );
            return Ok(PersonalSystemPrompt::empty(
                context.char_budget,
                selection.truncated,
            ));
        }

        let chosen = compose_order(selection.chosen);
        let text = compose_text(&chosen);
        let char_count = text.chars().count();

        let invocation = InvocationRecord {
            id: Uuid::new_v4(),
            source_app: context.source_app.clone(),
            query_term_count: u32::try_from(query_terms.len()).unwrap_or(u32::MAX),
            char_budget: context.char_budget,
            char_count,
            created_at: context.now_ms,
            entries: chosen
                .iter()
                .map(|scored| InvocationEntry {
                    fragment_id: scored.fragment.id,
                    features: scored.features,
                    score: scored.score,
                })
                .collect(),
        };
        self.psp.record_invocation(&invocation)?;

        debug!(
            "event=psp_invoke module=strategy status=ok candidates={candidate_count} selected={} char_count={char_count} char_budget={} truncated={} duration_ms={}",
            chosen.len(),
            context.char_budget,
            selection.truncated,
            started.elapsed().as_millis()
        );

        Ok(PersonalSystemPrompt {
            invocation_id: Some(invocation.id),
            text,
            fragment_ids: invocation.fragment_ids(),
            char_count,
            char_budget: context.char_budget,
            truncated: selection.truncated,
        })
    }
}

/// Feature vector of one fragment for the given query terms.
pub fn fragment_features(
    fragment: &PspFragment,
    query_terms: &BTreeSet<String>,
    context: &QueryContext,
    half_life_days: f64,
) -> FeatureVector {
    let relevance = if query_terms.is_empty() || fragment.keywords.is_empty() {
        0.0
    } else {
        let overlap = fragment
            .keywords
            .iter()
            .filter(|keyword| query_terms.contains(keyword.as_str()))
            .count();
        overlap as f64 / query_terms.len() as f64
    };
    let source_match = match (&fragment.source_app, &context.source_app) {
        (Some(fragment_app), Some(query_app)) if fragment_app == query_app.trim() => 1.0,
        _ => 0.0,
    };

    FeatureVector {
        relevance,
        weight: fragment.weight,
        recency: recency_weight(fragment.last_seen_at, context.now_ms, half_life_days),
        source_match,
    }
    .clamped()
}

/// Scores and sorts fragments best first.
pub fn rank_fragments(
    fragments: Vec<PspFragment>,
    query_terms: &BTreeSet<String>,
    context: &QueryContext,
    weights: &StrategyWeights,
    half_life_days: f64,
) -> Vec<ScoredFragment> {
    let mut ranked: Vec<ScoredFragment> = fragments
        .into_iter()
        .map(|fragment| {
            let features = fragment_features(&fragment, query_terms, context, half_life_days);
            let score = weights.predict(&features);
            ScoredFragment {
                fragment,
                features,
                score,
            }
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.fragment.weight.total_cmp(&a.fragment.weight))
            .then_with(|| a.fragment.key.cmp(&b.fragment.key))
    });
    ranked
}

struct Selection {
    chosen: Vec<ScoredFragment>,
    truncated: bool,
}

/// Greedy selection in rank order. A line that does not fit is skipped and
/// smaller lines further down may still be taken.
fn select_within_budget(
    ranked: Vec<ScoredFragment>,
    char_budget: usize,
    max_fragments: usize,
) -> Selection {
    let header_chars = PROMPT_HEADER.chars().count();
    if header_chars > char_budget {
        return Selection {
            chosen: Vec::new(),
            truncated: !ranked.is_empty(),
        };
    }

    let mut used = header_chars;
    let mut chosen = Vec::new();
    let mut truncated = false;
    for scored in ranked {
        if chosen.len() == max_fragments {
            truncated = true;
            break;
        }
        let line_chars = LINE_OVERHEAD_CHARS + scored.fragment.text.chars().count();
        if used + line_chars <= char_budget {
            used += line_chars;
            chosen.push(scored);
        } else {
            // Why: one long quote near the top must not starve every shorter
            // fragment ranked below it.
            truncated = true;
        }
    }
    Selection { chosen, truncated }
}

/// Stable sort by kind so related lines are grouped; rank order is kept
/// inside each kind.
fn compose_order(mut chosen: Vec<ScoredFragment>) -> Vec<ScoredFragment> {
    chosen.sort_by_key(|scored| scored.fragment.kind);
    chosen
}

fn compose_text(chosen: &[ScoredFragment]) -> String {
    let mut text = String::from(PROMPT_HEADER);
    for scored in chosen {
        text.push_str("\n- ");
        text.push_str(&scored.fragment.text);
    }
    text
}

/// Invocation failures.
#[derive(Debug)]
pub enum InvocationError {
    InvalidContext(String),
    Repo(RepoError),
}

impl Display for InvocationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidContext(message) => write!(f, "invalid query context: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for InvocationError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidContext(_) => None,
            Self::Repo(err) => Some(err),
        }
    }
}

impl From<RepoError> for InvocationError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
