//! HiNATA ingestion use-cases.
//!
//! # Responsibility
//! - Normalize and validate records submitted by third-party apps.
//! - Enforce app scopes when a registry is configured.
//! - Persist single records and all-or-nothing batches.
//!
//! # Invariants
//! - Nothing reaches storage without passing `HiNataRecord::validate()`.
//! - Tombstones cannot be submitted; deletion goes through the engine.
//! - Log lines carry metadata only, never record text.

use crate::apps::manifest::AppScope;
use crate::apps::registry::{AppRegistry, AppRegistryError};
use crate::model::hinata::{HiNataId, HiNataRecord, HiNataValidationError};
use crate::repo::hinata_repo::HiNataRepository;
use crate::repo::RepoError;
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Ingestion service over a record repository.
pub struct IngestionService<'a, R: HiNataRepository> {
    repo: R,
    apps: Option<&'a AppRegistry>,
}

impl<'a, R: HiNataRepository> IngestionService<'a, R> {
    /// Creates a service that accepts any well-formed app id.
    pub fn new(repo: R) -> Self {
        Self { repo, apps: None }
    }

    /// Creates a service that checks the `submit` scope against `apps`.
    pub fn with_apps(repo: R, apps: &'a AppRegistry) -> Self {
        Self {
            repo,
            apps: Some(apps),
        }
    }

    /// Validates and stores one record. Returns its id.
    pub fn submit(&self, record: &HiNataRecord) -> Result<HiNataId, IngestError> {
        let prepared = match self.prepare(record) {
            Ok(prepared) => prepared,
            Err(err) => {
                log_rejected(&record.source_app, &err);
                return Err(err);
            }
        };

        match self.repo.insert_record(&prepared) {
            Ok(id) => {
                info!(
                    "event=hinata_submit module=ingestion status=ok source_app={} access={} tags={}",
                    prepared.source_app,
                    prepared.access_level.as_str(),
                    prepared.tags.len()
                );
                Ok(id)
            }
            Err(err) => {
                let err = IngestError::from_repo(err);
                log_rejected(&prepared.source_app, &err);
                Err(err)
            }
        }
    }

    /// Validates every record first, then stores all of them or none.
    ///
    /// Returned ids follow input order.
    pub fn submit_batch(&self, records: &[HiNataRecord]) -> Result<Vec<HiNataId>, IngestError> {
        if records.is_empty() {
            return Err(IngestError::EmptyBatch);
        }

        let mut prepared = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            let item = self.prepare(record).map_err(|err| IngestError::BatchItem {
                index,
                source: Box::new(err),
            })?;
            prepared.push(item);
        }

        match self.repo.insert_records(&prepared) {
            Ok(ids) => {
                info!(
                    "event=hinata_submit_batch module=ingestion status=ok count={}",
                    ids.len()
                );
                Ok(ids)
            }
            Err(err) => {
                let err = IngestError::from_repo(err);
                warn!(
                    "event=hinata_submit_batch module=ingestion status=rejected count={} error_code={}",
                    records.len(),
                    err.code()
                );
                Err(err)
            }
        }
    }

    fn prepare(&self, record: &HiNataRecord) -> Result<HiNataRecord, IngestError> {
        if record.is_deleted {
            return Err(IngestError::TombstoneSubmitted(record.id));
        }
        let normalized = record.normalized();
        normalized.validate()?;
        if let Some(apps) = self.apps {
            apps.check(Some(normalized.source_app.as_str()), AppScope::Submit)
                .map_err(IngestError::Unauthorized)?;
        }
        Ok(normalized)
    }
}

/// Decodes one JSON record object or an array of them.
///
/// Wire records without `id` get a generated one. Each record is validated
/// during decoding.
pub fn decode_hinata_json(raw: &str) -> Result<Vec<HiNataRecord>, IngestError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|err| IngestError::Decode(err.to_string()))?;
    match value {
        serde_json::Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                serde_json::from_value(item)
                    .map_err(|err| IngestError::Decode(format!("record {index}: {err}")))
            })
            .collect(),
        value @ serde_json::Value::Object(_) => serde_json::from_value(value)
            .map(|record| vec![record])
            .map_err(|err| IngestError::Decode(err.to_string())),
        _ => Err(IngestError::Decode(
            "expected a record object or an array of records".to_string(),
        )),
    }
}

fn log_rejected(source_app: &str, err: &IngestError) {
    let source_app = if crate::model::hinata::is_valid_app_id(source_app.trim()) {
        source_app.trim()
    } else {
        "invalid"
    };
    warn!(
        "event=hinata_submit module=ingestion status=rejected source_app={} error_code={}",
        source_app,
        err.code()
    );
}

/// Ingestion failures.
#[derive(Debug)]
pub enum IngestError {
    Validation(HiNataValidationError),
    DuplicateRecord(HiNataId),
    Unauthorized(AppRegistryError),
    TombstoneSubmitted(HiNataId),
    EmptyBatch,
    BatchItem {
        index: usize,
        source: Box<IngestError>,
    },
    Decode(String),
    Repo(RepoError),
}

impl IngestError {
    /// Stable short code for logs and CLI exit messages.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::DuplicateRecord(_) => "duplicate_record",
            Self::Unauthorized(_) => "unauthorized",
            Self::TombstoneSubmitted(_) => "tombstone_submitted",
            Self::EmptyBatch => "empty_batch",
            Self::BatchItem { source, .. } => source.code(),
            Self::Decode(_) => "decode",
            Self::Repo(_) => "storage",
        }
    }

    fn from_repo(err: RepoError) -> Self {
        match err {
            RepoError::Duplicate(id) => Self::DuplicateRecord(id),
            RepoError::Validation(err) => Self::Validation(err),
            other => Self::Repo(other),
        }
    }
}

impl Display for IngestError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::DuplicateRecord(id) => write!(f, "record already exists: {id}"),
            Self::Unauthorized(err) => write!(f, "submission not authorized: {err}"),
            Self::TombstoneSubmitted(id) => {
                write!(f, "record {id} is marked deleted and cannot be submitted")
            }
            Self::EmptyBatch => write!(f, "batch must contain at least one record"),
            Self::BatchItem { index, source } => write!(f, "batch record {index}: {source}"),
            Self::Decode(message) => write!(f, "invalid HiNATA JSON: {message}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for IngestError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Unauthorized(err) => Some(err),
            Self::BatchItem { source, .. } => Some(source.as_ref()),
            Self::Repo(err) => Some(err),
            Self::DuplicateRecord(_)
            | Self::TombstoneSubmitted(_)
            | Self::EmptyBatch
            | Self::Decode(_) => None,
        }
    }
}

impl From<HiNataValidationError> for IngestError {
    fn from(value: HiNataValidationError) -> Self {
        Self::Validation(value)
    }
}

impl From<RepoError> for IngestError {
    fn from(value: RepoError) -> Self {
        Self::from_repo(value)
    }
}
