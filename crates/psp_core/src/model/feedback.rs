//! User satisfaction signals for composed prompts.

use crate::model::psp::{FragmentId, InvocationId};
use serde::{Deserialize, Serialize};

/// Coarse satisfaction reported by the App after using a prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Satisfaction {
    Positive,
    Neutral,
    Negative,
}

impl Satisfaction {
    /// Learning target in `[0, 1]`.
    pub fn value(self) -> f64 {
        match self {
            Self::Positive => 1.0,
            Self::Neutral => 0.5,
            Self::Negative => 0.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Neutral => "neutral",
            Self::Negative => "negative",
        }
    }

    /// Parses a case-insensitive label.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "positive" | "good" | "up" => Some(Self::Positive),
            "neutral" => Some(Self::Neutral),
            "negative" | "bad" | "down" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// Feedback for one invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub invocation_id: InvocationId,
    pub satisfaction: Satisfaction,
    /// Optional subset of the invocation's fragments the signal applies to.
    /// Empty means all fragments of the invocation.
    #[serde(default)]
    pub fragment_ids: Vec<FragmentId>,
    /// Reporting app, checked against the `feedback` scope when apps are
    /// registered.
    #[serde(default)]
    pub source_app: Option<String>,
}

impl FeedbackSignal {
    pub fn new(invocation_id: InvocationId, satisfaction: Satisfaction) -> Self {
        Self {
            invocation_id,
            satisfaction,
            fragment_ids: Vec::new(),
            source_app: None,
        }
    }
}
