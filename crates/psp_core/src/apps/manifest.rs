//! Third-party app manifest declaration and validation.

use crate::model::hinata::is_valid_app_id;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Scope string allowing an app to submit HiNATA records.
pub const SCOPE_SUBMIT: &str = "submit";
/// Scope string allowing an app to request a personalized prompt.
pub const SCOPE_PROMPT: &str = "prompt";
/// Scope string allowing an app to report satisfaction.
pub const SCOPE_FEEDBACK: &str = "feedback";

const SUPPORTED_SCOPES: &[&str] = &[SCOPE_SUBMIT, SCOPE_PROMPT, SCOPE_FEEDBACK];

/// Returns supported scope strings for manifest validation.
pub fn supported_scopes() -> &'static [&'static str] {
    SUPPORTED_SCOPES
}

/// Engine operation an app must be granted before calling it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AppScope {
    Submit,
    Prompt,
    Feedback,
}

impl AppScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submit => SCOPE_SUBMIT,
            Self::Prompt => SCOPE_PROMPT,
            Self::Feedback => SCOPE_FEEDBACK,
        }
    }

    /// Parses an exact lowercase scope string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            SCOPE_SUBMIT => Some(Self::Submit),
            SCOPE_PROMPT => Some(Self::Prompt),
            SCOPE_FEEDBACK => Some(Self::Feedback),
            _ => None,
        }
    }
}

impl Display for AppScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Declarative app manifest, usually loaded from the `[[apps]]` config table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppManifest {
    /// Stable app identifier, same alphabet as `HiNataRecord::source_app`.
    pub id: String,
    /// Manifest semantic version string (`major.minor.patch`).
    pub version: String,
    /// Granted scopes (`submit|prompt|feedback`).
    pub scopes: Vec<String>,
}

impl AppManifest {
    /// Validates declaration-level manifest invariants.
    pub fn validate(&self) -> Result<(), AppManifestError> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(AppManifestError::EmptyId);
        }
        if !is_valid_app_id(id) {
            return Err(AppManifestError::InvalidId(self.id.clone()));
        }

        let version = self.version.trim();
        if version.is_empty() {
            return Err(AppManifestError::EmptyVersion);
        }
        if !is_semver_triplet(version) {
            return Err(AppManifestError::InvalidVersion(self.version.clone()));
        }

        if self.scopes.is_empty() {
            return Err(AppManifestError::MissingScopes);
        }
        let mut dedup = BTreeSet::new();
        for scope in &self.scopes {
            let normalized = scope.trim();
            if normalized.is_empty() {
                return Err(AppManifestError::EmptyScope);
            }
            if !supported_scopes().contains(&normalized) {
                return Err(AppManifestError::UnsupportedScope(normalized.to_string()));
            }
            if !dedup.insert(normalized) {
                return Err(AppManifestError::DuplicateScope(normalized.to_string()));
            }
        }
        Ok(())
    }

    /// Parsed scopes. Unknown values are skipped; call `validate` first.
    pub fn granted_scopes(&self) -> BTreeSet<AppScope> {
        self.scopes
            .iter()
            .filter_map(|scope| AppScope::parse(scope.trim()))
            .collect()
    }
}

fn is_semver_triplet(value: &str) -> bool {
    let parts: Vec<&str> = value.split('.').collect();
    if parts.len() != 3 {
        return false;
    }
    parts
        .iter()
        .all(|part| !part.is_empty() && part.chars().all(|c| c.is_ascii_digit()))
}

/// Manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppManifestError {
    EmptyId,
    InvalidId(String),
    EmptyVersion,
    InvalidVersion(String),
    MissingScopes,
    EmptyScope,
    UnsupportedScope(String),
    DuplicateScope(String),
}

impl Display for AppManifestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyId => write!(f, "app id must not be empty"),
            Self::InvalidId(value) => write!(f, "app id is invalid: {value}"),
            Self::EmptyVersion => write!(f, "app version must not be empty"),
            Self::InvalidVersion(value) => write!(
                f,
                "app version is invalid: {value} (expected major.minor.patch)"
            ),
            Self::MissingScopes => write!(f, "app scopes must not be empty"),
            Self::EmptyScope => write!(f, "app manifest contains empty scope value"),
            Self::UnsupportedScope(value) => write!(f, "app scope is unsupported: {value}"),
            Self::DuplicateScope(value) => write!(f, "app scope is duplicated: {value}"),
        }
    }
}

impl Error for AppManifestError {}
