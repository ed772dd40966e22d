//! PSP (Personal System Prompt) domain model.
//!
//! # Responsibility
//! - Define prompt fragments produced by the low-frequency production pass.
//! - Define the query context and bounded prompt returned by invocation.
//!
//! # Invariants
//! - `PspFragment::key` is stable across production runs and unique in storage.
//! - Fragment weights stay inside `[MIN_FRAGMENT_WEIGHT, MAX_FRAGMENT_WEIGHT]`.
//! - `PersonalSystemPrompt::char_count` never exceeds `char_budget`.

use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

pub type FragmentId = Uuid;
pub type InvocationId = Uuid;

/// Lower bound for learned fragment weights. Keeps disliked fragments
/// recoverable instead of permanently zeroed.
pub const MIN_FRAGMENT_WEIGHT: f64 = 0.05;
pub const MAX_FRAGMENT_WEIGHT: f64 = 1.0;

/// Default prompt size limit in characters.
pub const DEFAULT_CHAR_BUDGET: usize = 2_000;
/// Hard upper bound accepted for one prompt.
pub const MAX_CHAR_BUDGET: usize = 100_000;
pub const DEFAULT_MAX_FRAGMENTS: usize = 12;

/// Fragment category. Declaration order is the composition order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Topic,
    Preference,
    Aversion,
    Tag,
    Quote,
    SourceContext,
}

impl FragmentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Topic => "topic",
            Self::Preference => "preference",
            Self::Aversion => "aversion",
            Self::Tag => "tag",
            Self::SourceContext => "source_context",
            Self::Quote => "quote",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "topic" => Some(Self::Topic),
            "preference" => Some(Self::Preference),
            "aversion" => Some(Self::Aversion),
            "tag" => Some(Self::Tag),
            "source_context" => Some(Self::SourceContext),
            "quote" => Some(Self::Quote),
            _ => None,
        }
    }
}

/// One candidate line of a personalized prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PspFragment {
    pub id: FragmentId,
    pub kind: FragmentKind,
    /// Stable identity across production runs, e.g. `topic:rust`.
    pub key: String,
    pub text: String,
    /// Lowercase terms used for query relevance matching.
    pub keywords: Vec<String>,
    /// Set for fragments tied to one submitting app.
    pub source_app: Option<String>,
    pub weight: f64,
    /// Number of records backing this fragment in the last production run.
    pub support: u32,
    /// Epoch ms of the newest record backing this fragment.
    pub last_seen_at: i64,
    /// Epoch ms of the production run that last refreshed this fragment.
    pub produced_at: i64,
}

impl PspFragment {
    /// Creates a fragment with a generated ID and no keywords.
    pub fn new(
        kind: FragmentKind,
        key: impl Into<String>,
        text: impl Into<String>,
        weight: f64,
        produced_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            key: key.into(),
            text: text.into(),
            keywords: Vec::new(),
            source_app: None,
            weight: clamp_fragment_weight(weight),
            support: 0,
            last_seen_at: produced_at,
            produced_at,
        }
    }

    /// Validates persistence-level invariants.
    pub fn validate(&self) -> Result<(), FragmentValidationError> {
        if self.id.is_nil() {
            return Err(FragmentValidationError::NilId);
        }
        if self.key.trim().is_empty() {
            return Err(FragmentValidationError::EmptyKey);
        }
        if self.text.trim().is_empty() {
            return Err(FragmentValidationError::EmptyText(self.key.clone()));
        }
        if self.text.contains('\n') {
            return Err(FragmentValidationError::MultilineText(self.key.clone()));
        }
        if !(MIN_FRAGMENT_WEIGHT..=MAX_FRAGMENT_WEIGHT).contains(&self.weight) {
            return Err(FragmentValidationError::WeightOutOfRange {
                key: self.key.clone(),
                weight: self.weight,
            });
        }
        Ok(())
    }
}

/// Clamps a learned weight into the accepted range. NaN maps to the minimum.
pub fn clamp_fragment_weight(weight: f64) -> f64 {
    if weight.is_nan() {
        return MIN_FRAGMENT_WEIGHT;
    }
    weight.clamp(MIN_FRAGMENT_WEIGHT, MAX_FRAGMENT_WEIGHT)
}

/// One EWMA step of `weight` toward `target`: `w + rate * (target - w)`, clamped.
pub fn nudge_fragment_weight(weight: f64, target: f64, rate: f64) -> f64 {
    clamp_fragment_weight(weight + rate * (target - weight))
}

/// Stable key of the quote fragment built from one record.
pub fn quote_fragment_key(record_id: Uuid) -> String {
    format!("quote:{record_id}")
}

/// Fragment invariant violations.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentValidationError {
    NilId,
    EmptyKey,
    EmptyText(String),
    MultilineText(String),
    WeightOutOfRange { key: String, weight: f64 },
}

impl Display for FragmentValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "fragment id must not be nil"),
            Self::EmptyKey => write!(f, "fragment key must not be empty"),
            Self::EmptyText(key) => write!(f, "fragment `{key}` has empty text"),
            Self::MultilineText(key) => write!(f, "fragment `{key}` text must be one line"),
            Self::WeightOutOfRange { key, weight } => write!(
                f,
                "fragment `{key}` weight {weight} outside [{MIN_FRAGMENT_WEIGHT}, {MAX_FRAGMENT_WEIGHT}]"
            ),
        }
    }
}

impl Error for FragmentValidationError {}

/// Caller-provided context for one prompt composition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    /// Free text the App is about to send to its model.
    pub query: String,
    /// Requesting app, when known.
    pub source_app: Option<String>,
    /// Maximum prompt length in characters.
    pub char_budget: usize,
    pub max_fragments: usize,
    /// Reference time for recency features.
    pub now_ms: i64,
}

impl QueryContext {
    /// Creates a context with default budget and current time.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            source_app: None,
            char_budget: DEFAULT_CHAR_BUDGET,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
            now_ms: now_epoch_ms(),
        }
    }

    /// Checks budget bounds.
    pub fn validate(&self) -> Result<(), String> {
        if self.char_budget == 0 || self.char_budget > MAX_CHAR_BUDGET {
            return Err(format!(
                "char_budget must be in 1..={MAX_CHAR_BUDGET}, got {}",
                self.char_budget
            ));
        }
        if self.max_fragments == 0 {
            return Err("max_fragments must be positive".to_string());
        }
        Ok(())
    }
}

/// Bounded prompt artifact handed back to the App.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonalSystemPrompt {
    /// Invocation to reference in feedback. `None` for empty prompts,
    /// which are not persisted.
    pub invocation_id: Option<InvocationId>,
    pub text: String,
    /// Fragments in the order they appear in `text`.
    pub fragment_ids: Vec<FragmentId>,
    pub char_count: usize,
    pub char_budget: usize,
    /// Whether any candidate was dropped for budget or fragment count.
    pub truncated: bool,
}

impl PersonalSystemPrompt {
    /// Empty prompt for stores without usable fragments.
    pub fn empty(char_budget: usize, truncated: bool) -> Self {
        Self {
            invocation_id: None,
            text: String::new(),
            fragment_ids: Vec::new(),
            char_count: 0,
            char_budget,
            truncated,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}
