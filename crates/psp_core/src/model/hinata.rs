//! HiNATA record domain model.
//!
//! # Responsibility
//! - Define the canonical record submitted by third-party apps.
//! - Own field-level validation and normalization rules for ingestion.
//!
//! # Invariants
//! - `id` is a stable non-nil UUID and never reused for another record.
//! - At least one of `highlight` / `note` carries non-blank text.
//! - Tags are lowercase, trimmed, deduplicated after `normalized()`.
//! - `is_deleted` is the source of truth for tombstone state.
//!
//! # See also
//! - crate::service::ingestion

use crate::model::now_epoch_ms;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for one HiNATA record.
pub type HiNataId = Uuid;

/// Maximum highlight length in characters.
pub const MAX_HIGHLIGHT_CHARS: usize = 4_000;
/// Maximum note length in characters.
pub const MAX_NOTE_CHARS: usize = 16_000;
/// Maximum address/origin length in characters.
pub const MAX_ADDRESS_CHARS: usize = 2_048;
/// Maximum number of distinct tags per record.
pub const MAX_TAGS: usize = 32;
/// Maximum tag length in characters.
pub const MAX_TAG_CHARS: usize = 64;

/// Visibility class declared by the submitting app.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// May be quoted verbatim in prompt fragments.
    Public,
    /// Shared with the user's own apps; may be quoted.
    Shared,
    /// Only aggregated signals may leave the record.
    #[default]
    Private,
}

impl AccessLevel {
    /// Stable storage/wire string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Shared => "shared",
            Self::Private => "private",
        }
    }

    /// Parses one storage/wire string.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "public" => Some(Self::Public),
            "shared" => Some(Self::Shared),
            "private" => Some(Self::Private),
            _ => None,
        }
    }

    /// Whether record text may appear verbatim inside a PSP fragment.
    pub fn allows_quoting(self) -> bool {
        !matches!(self, Self::Private)
    }
}

/// Canonical user-interaction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "HiNataRecordWire")]
pub struct HiNataRecord {
    pub id: HiNataId,
    /// Capture time in Unix epoch milliseconds.
    pub timestamp: i64,
    /// Submitting app identifier, e.g. `reader.kindle-sync`.
    pub source_app: String,
    /// Highlighted excerpt.
    pub highlight: String,
    /// User-written note.
    pub note: String,
    /// Address/origin of the content (URL, file path, book location).
    pub address: String,
    pub tags: Vec<String>,
    pub access_level: AccessLevel,
    pub is_deleted: bool,
}

/// Wire shape accepted from apps. `id` may be omitted and is then generated.
#[derive(Deserialize)]
struct HiNataRecordWire {
    #[serde(default)]
    id: Option<HiNataId>,
    timestamp: i64,
    source_app: String,
    #[serde(default)]
    highlight: String,
    #[serde(default)]
    note: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    access_level: AccessLevel,
    #[serde(default)]
    is_deleted: bool,
}

impl TryFrom<HiNataRecordWire> for HiNataRecord {
    type Error = HiNataValidationError;

    fn try_from(value: HiNataRecordWire) -> Result<Self, Self::Error> {
        let record = Self {
            id: value.id.unwrap_or_else(Uuid::new_v4),
            timestamp: value.timestamp,
            source_app: value.source_app,
            highlight: value.highlight,
            note: value.note,
            address: value.address,
            tags: value.tags,
            access_level: value.access_level,
            is_deleted: value.is_deleted,
        }
        .normalized();
        record.validate()?;
        Ok(record)
    }
}

impl HiNataRecord {
    /// Creates a private record captured now, with a generated ID.
    pub fn new(
        source_app: impl Into<String>,
        highlight: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self::with_id(Uuid::new_v4(), now_epoch_ms(), source_app, highlight, note)
    }

    /// Creates a record with caller-provided identity and capture time.
    ///
    /// Used by import paths where identity already exists externally.
    /// Does not validate; call [`HiNataRecord::validate`] before persistence.
    pub fn with_id(
        id: HiNataId,
        timestamp: i64,
        source_app: impl Into<String>,
        highlight: impl Into<String>,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id,
            timestamp,
            source_app: source_app.into(),
            highlight: highlight.into(),
            note: note.into(),
            address: String::new(),
            tags: Vec::new(),
            access_level: AccessLevel::default(),
            is_deleted: false,
        }
    }

    /// Validates field-level invariants.
    pub fn validate(&self) -> Result<(), HiNataValidationError> {
        if self.id.is_nil() {
            return Err(HiNataValidationError::NilId);
        }
        if self.timestamp <= 0 {
            return Err(HiNataValidationError::InvalidTimestamp(self.timestamp));
        }

        let source_app = self.source_app.trim();
        if source_app.is_empty() {
            return Err(HiNataValidationError::MissingSourceApp);
        }
        if !is_valid_app_id(source_app) {
            return Err(HiNataValidationError::InvalidSourceApp(
                self.source_app.clone(),
            ));
        }

        if self.highlight.trim().is_empty() && self.note.trim().is_empty() {
            return Err(HiNataValidationError::EmptyContent);
        }
        check_length(&self.highlight, MAX_HIGHLIGHT_CHARS, |chars| {
            HiNataValidationError::HighlightTooLong { chars }
        })?;
        check_length(&self.note, MAX_NOTE_CHARS, |chars| {
            HiNataValidationError::NoteTooLong { chars }
        })?;
        check_length(&self.address, MAX_ADDRESS_CHARS, |chars| {
            HiNataValidationError::AddressTooLong { chars }
        })?;

        for tag in &self.tags {
            let trimmed = tag.trim();
            if trimmed.is_empty() || trimmed.chars().count() > MAX_TAG_CHARS {
                return Err(HiNataValidationError::InvalidTag(tag.clone()));
            }
        }
        let distinct = normalize_tags(&self.tags).len();
        if distinct > MAX_TAGS {
            return Err(HiNataValidationError::TooManyTags(distinct));
        }

        Ok(())
    }

    /// Returns a copy with trimmed text fields and normalized tags.
    pub fn normalized(&self) -> Self {
        Self {
            id: self.id,
            timestamp: self.timestamp,
            source_app: self.source_app.trim().to_string(),
            highlight: self.highlight.trim().to_string(),
            note: self.note.trim().to_string(),
            address: self.address.trim().to_string(),
            tags: normalize_tags(&self.tags),
            access_level: self.access_level,
            is_deleted: self.is_deleted,
        }
    }

    /// Highlight and note joined for analysis. Address is excluded.
    pub fn combined_text(&self) -> String {
        match (self.highlight.trim(), self.note.trim()) {
            ("", note) => note.to_string(),
            (highlight, "") => highlight.to_string(),
            (highlight, note) => format!("{highlight}\n{note}"),
        }
    }

    /// Marks this record as softly deleted (tombstoned).
    pub fn soft_delete(&mut self) {
        self.is_deleted = true;
    }

    /// Clears soft delete flag.
    pub fn restore(&mut self) {
        self.is_deleted = false;
    }

    /// Returns whether this record should be considered visible/active.
    pub fn is_active(&self) -> bool {
        !self.is_deleted
    }
}

/// Validation errors for HiNATA records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiNataValidationError {
    NilId,
    InvalidTimestamp(i64),
    MissingSourceApp,
    InvalidSourceApp(String),
    EmptyContent,
    HighlightTooLong { chars: usize },
    NoteTooLong { chars: usize },
    AddressTooLong { chars: usize },
    InvalidTag(String),
    TooManyTags(usize),
}

impl Display for HiNataValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NilId => write!(f, "record id must not be nil"),
            Self::InvalidTimestamp(value) => {
                write!(f, "timestamp must be positive epoch milliseconds, got {value}")
            }
            Self::MissingSourceApp => write!(f, "source_app must not be empty"),
            Self::InvalidSourceApp(value) => write!(f, "source_app is invalid: `{value}`"),
            Self::EmptyContent => write!(f, "highlight and note must not both be empty"),
            Self::HighlightTooLong { chars } => write!(
                f,
                "highlight has {chars} chars; limit is {MAX_HIGHLIGHT_CHARS}"
            ),
            Self::NoteTooLong { chars } => {
                write!(f, "note has {chars} chars; limit is {MAX_NOTE_CHARS}")
            }
            Self::AddressTooLong { chars } => {
                write!(f, "address has {chars} chars; limit is {MAX_ADDRESS_CHARS}")
            }
            Self::InvalidTag(value) => write!(f, "invalid tag: `{value}`"),
            Self::TooManyTags(count) => {
                write!(f, "record has {count} tags; limit is {MAX_TAGS}")
            }
        }
    }
}

impl Error for HiNataValidationError {}

/// Normalizes one tag value: trimmed and lowercased, `None` when blank.
pub fn normalize_tag(tag: &str) -> Option<String> {
    let trimmed = tag.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Normalizes and deduplicates tag values in sorted order.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut unique = BTreeSet::new();
    for tag in tags {
        if let Some(value) = normalize_tag(tag) {
            unique.insert(value);
        }
    }
    unique.into_iter().collect()
}

/// Returns whether `value` is a well-formed app identifier.
///
/// Accepted shape: lowercase ascii letters and digits, separated by single
/// `.`, `_` or `-` characters, not starting or ending with a separator.
pub fn is_valid_app_id(value: &str) -> bool {
    let mut chars = value.chars();
    let first = match chars.next() {
        Some(c) => c,
        None => return false,
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        return false;
    }

    let mut prev_separator = false;
    for c in chars {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            prev_separator = false;
            continue;
        }
        if c == '.' || c == '_' || c == '-' {
            if prev_separator {
                return false;
            }
            prev_separator = true;
            continue;
        }
        return false;
    }
    !prev_separator
}

fn check_length(
    value: &str,
    max_chars: usize,
    err: impl FnOnce(usize) -> HiNataValidationError,
) -> Result<(), HiNataValidationError> {
    let chars = value.chars().count();
    if chars > max_chars {
        return Err(err(chars));
    }
    Ok(())
}
