//! Feedback loop: satisfaction signals to weight updates.
//!
//! # Responsibility
//! - Resolve a signal to the invocation and fragments it refers to.
//! - Move fragment weights by EWMA and strategy weights by one gradient step.
//!
//! # Invariants
//! - Feedback is accepted once per invocation.
//! - All weight changes for one signal commit together or not at all.

use crate::apps::manifest::AppScope;
use crate::apps::registry::{AppRegistry, AppRegistryError};
use crate::config::FeedbackSettings;
use crate::model::feedback::FeedbackSignal;
use crate::model::now_epoch_ms;
use crate::model::psp::{FragmentId, InvocationId};
use crate::repo::psp_repo::{FeedbackUpdate, InvocationEntry, PspRepository};
use crate::repo::RepoError;
use crate::strategy::weights::StrategyWeights;
use log::info;
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub use crate::repo::psp_repo::FragmentWeightChange;

/// Result of one accepted feedback signal.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackOutcome {
    pub invocation_id: InvocationId,
    /// `actual - predicted` before the strategy update.
    pub prediction_error: f64,
    pub fragment_changes: Vec<FragmentWeightChange>,
    pub strategy_weights: StrategyWeights,
}

/// Feedback service over the PSP repository.
pub struct FeedbackService<'a, P: PspRepository> {
    psp: P,
    settings: FeedbackSettings,
    apps: Option<&'a AppRegistry>,
}

impl<'a, P: PspRepository> FeedbackService<'a, P> {
    pub fn new(psp: P, settings: FeedbackSettings) -> Self {
        Self {
            psp,
            settings,
            apps: None,
        }
    }

    /// Creates a service that checks the `feedback` scope against `apps`.
    pub fn with_apps(psp: P, settings: FeedbackSettings, apps: &'a AppRegistry) -> Self {
        Self {
            psp,
            settings,
            apps: Some(apps),
        }
    }

    /// Applies one satisfaction signal.
    ///
    /// `w' = clamp(w + alpha * (s - w))` for every targeted fragment, then a
    /// gradient step on the mean feature vector of those fragments. Weights
    /// are read and written in the repository's transaction.
    pub fn record_feedback(&self, signal: &FeedbackSignal) -> Result<FeedbackOutcome, FeedbackError> {
        if let Some(apps) = self.apps {
            apps.check(signal.source_app.as_deref(), AppScope::Feedback)
                .map_err(FeedbackError::Unauthorized)?;
        }

        let invocation_id = signal.invocation_id;
        let Some(invocation) = self.psp.get_invocation(invocation_id)? else {
            return Err(FeedbackError::InvocationNotFound(invocation_id));
        };
        if self.psp.has_feedback(invocation_id)? {
            return Err(FeedbackError::FeedbackAlreadyRecorded(invocation_id));
        }

        let update = FeedbackUpdate {
            invocation_id,
            satisfaction: signal.satisfaction,
            targets: target_entries(&invocation.entries, &signal.fragment_ids, invocation_id)?,
            fragment_learning_rate: self.settings.fragment_learning_rate,
            strategy_learning_rate: self.settings.strategy_learning_rate,
            created_at: now_epoch_ms(),
        };
        let applied = self.psp.apply_feedback(&update).map_err(|err| match err {
            RepoError::Duplicate(id) => FeedbackError::FeedbackAlreadyRecorded(id),
            RepoError::NotFound(id) if id == invocation_id => FeedbackError::InvocationNotFound(id),
            other => FeedbackError::Repo(other),
        })?;

        info!(
            "event=psp_feedback module=feedback status=ok satisfaction={} fragments={} prediction_error={:.4} samples={}",
            signal.satisfaction.as_str(),
            applied.fragment_changes.len(),
            applied.prediction_error,
            applied.strategy_weights.sample_count
        );

        Ok(FeedbackOutcome {
            invocation_id,
            prediction_error: applied.prediction_error,
            fragment_changes: applied.fragment_changes,
            strategy_weights: applied.strategy_weights,
        })
    }
}

/// Entries the signal applies to: all of them, or the named subset.
fn target_entries(
    entries: &[InvocationEntry],
    fragment_ids: &[FragmentId],
    invocation_id: InvocationId,
) -> Result<Vec<InvocationEntry>, FeedbackError> {
    if fragment_ids.is_empty() {
        return Ok(entries.to_vec());
    }

    let mut seen = BTreeSet::new();
    let mut targets = Vec::new();
    for fragment_id in fragment_ids {
        if !seen.insert(*fragment_id) {
            continue;
        }
        let entry = entries
            .iter()
            .find(|entry| entry.fragment_id == *fragment_id)
            .ok_or(FeedbackError::FragmentNotInInvocation {
                invocation_id,
                fragment_id: *fragment_id,
            })?;
        targets.push(*entry);
    }
    Ok(targets)
}

/// Feedback failures.
#[derive(Debug)]
pub enum FeedbackError {
    InvocationNotFound(InvocationId),
    FeedbackAlreadyRecorded(InvocationId),
    FragmentNotInInvocation {
        invocation_id: InvocationId,
        fragment_id: FragmentId,
    },
    Unauthorized(AppRegistryError),
    Repo(RepoError),
}

impl Display for FeedbackError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvocationNotFound(id) => write!(f, "invocation not found: {id}"),
            Self::FeedbackAlreadyRecorded(id) => {
                write!(f, "feedback already recorded for invocation {id}")
            }
            Self::FragmentNotInInvocation {
                invocation_id,
                fragment_id,
            } => write!(
                f,
                "fragment {fragment_id} was not part of invocation {invocation_id}"
            ),
            Self::Unauthorized(err) => write!(f, "feedback not authorized: {err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for FeedbackError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Unauthorized(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::InvocationNotFound(_)
            | Self::FeedbackAlreadyRecorded(_)
            | Self::FragmentNotInInvocation { .. } => None,
        }
    }
}

impl From<RepoError> for FeedbackError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}
