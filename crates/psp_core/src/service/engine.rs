//! Personalization engine facade.
//!
//! # Responsibility
//! - Own the SQLite connection, configuration and app registry.
//! - Expose ingestion, production, invocation, feedback and inspection
//!   entry points to callers.
//!
//! # Invariants
//! - The connection is migrated before any entry point runs.
//! - App scopes are enforced whenever the registry is non-empty.
//! - Deleting a record retires its quote fragment immediately.

use crate::apps::manifest::AppScope;
use crate::apps::registry::{AppRegistry, AppRegistryError};
use crate::config::{ConfigError, EngineConfig};
use crate::db::{open_db, open_db_in_memory, DbError};
use crate::model::feedback::FeedbackSignal;
use crate::model::hinata::{HiNataId, HiNataRecord};
use crate::model::now_epoch_ms;
use crate::model::psp::{quote_fragment_key, PersonalSystemPrompt, PspFragment, QueryContext};
use crate::repo::hinata_repo::{HiNataRepository, RecordListQuery, SqliteHiNataRepository};
use crate::repo::psp_repo::{
    retire_fragment_keys, ProductionRun, PspCounts, PspRepository, SqlitePspRepository,
};
use crate::repo::{begin_immediate, RepoError};
use crate::search::fts::{search_records, SearchError, SearchHit, SearchQuery};
use crate::service::feedback::{FeedbackError, FeedbackOutcome, FeedbackService};
use crate::service::ingestion::{decode_hinata_json, IngestError, IngestionService};
use crate::strategy::invocation::{InvocationError, InvocationStrategy};
use crate::strategy::production::{ProductionReport, ProductionStrategy};
use crate::strategy::weights::StrategyWeights;
use log::info;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type EngineResult<T> = Result<T, EngineError>;

/// Store-wide counters for status output.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineStats {
    pub active_records: u64,
    pub total_records: u64,
    pub tags: usize,
    pub fragments: PspCounts,
    pub strategy_weights: StrategyWeights,
    pub last_production: Option<ProductionRun>,
    pub registered_apps: usize,
}

/// Local personalization engine over one SQLite connection.
#[derive(Debug)]
pub struct PersonalizationEngine {
    conn: Connection,
    config: EngineConfig,
    apps: AppRegistry,
}

impl PersonalizationEngine {
    /// Opens the database at `config.db_path`.
    pub fn open(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let apps = AppRegistry::from_manifests(&config.apps).map_err(EngineError::Apps)?;
        let conn = open_db(&config.db_path)?;
        Ok(Self::assemble(conn, config, apps))
    }

    /// Opens an in-memory database. `config.db_path` is ignored.
    pub fn open_in_memory(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let apps = AppRegistry::from_manifests(&config.apps).map_err(EngineError::Apps)?;
        let conn = open_db_in_memory()?;
        Ok(Self::assemble(conn, config, apps))
    }

    fn assemble(conn: Connection, config: EngineConfig, apps: AppRegistry) -> Self {
        info!(
            "event=engine_open module=service status=ok apps={} window_days={} char_budget={}",
            apps.len(),
            config.analysis.window_days,
            config.invocation.char_budget
        );
        Self { conn, config, apps }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn apps(&self) -> &AppRegistry {
        &self.apps
    }

    /// Submits one record.
    pub fn submit_hinata(&self, record: &HiNataRecord) -> EngineResult<HiNataId> {
        Ok(self.ingestion().submit(record)?)
    }

    /// Submits records atomically; ids follow input order.
    pub fn submit_hinata_batch(&self, records: &[HiNataRecord]) -> EngineResult<Vec<HiNataId>> {
        Ok(self.ingestion().submit_batch(records)?)
    }

    /// Decodes a JSON object or array and submits it as one batch.
    pub fn submit_hinata_json(&self, raw: &str) -> EngineResult<Vec<HiNataId>> {
        let records = decode_hinata_json(raw)?;
        self.submit_hinata_batch(&records)
    }

    /// Composes a prompt for an explicit query context.
    pub fn get_personalized_prompt(
        &self,
        context: &QueryContext,
    ) -> EngineResult<PersonalSystemPrompt> {
        self.apps
            .check(context.source_app.as_deref(), AppScope::Prompt)
            .map_err(EngineError::Unauthorized)?;
        let strategy = InvocationStrategy::new(
            SqlitePspRepository::new(&self.conn),
            self.config.analysis.half_life_days,
        );
        Ok(strategy.invoke(context)?)
    }

    /// Builds a context from configured defaults and composes a prompt.
    pub fn prompt_for(
        &self,
        query: &str,
        source_app: Option<&str>,
    ) -> EngineResult<PersonalSystemPrompt> {
        let mut context = QueryContext::new(query);
        context.source_app = source_app.map(|app| app.trim().to_string());
        context.char_budget = self.config.invocation.char_budget;
        context.max_fragments = self.config.invocation.max_fragments;
        self.get_personalized_prompt(&context)
    }

    /// Runs production at the current time.
    pub fn run_production(&self) -> EngineResult<ProductionReport> {
        self.run_production_at(now_epoch_ms())
    }

    /// Runs production at an explicit reference time.
    pub fn run_production_at(&self, now_ms: i64) -> EngineResult<ProductionReport> {
        let strategy = ProductionStrategy::new(
            SqliteHiNataRepository::new(&self.conn),
            SqlitePspRepository::new(&self.conn),
            self.config.analysis.clone(),
        );
        Ok(strategy.produce(now_ms)?)
    }

    pub fn record_feedback(&self, signal: &FeedbackSignal) -> EngineResult<FeedbackOutcome> {
        let service = FeedbackService::with_apps(
            SqlitePspRepository::new(&self.conn),
            self.config.feedback.clone(),
            &self.apps,
        );
        Ok(service.record_feedback(signal)?)
    }

    pub fn search_records(&self, query: &SearchQuery) -> EngineResult<Vec<SearchHit>> {
        Ok(search_records(&self.conn, query)?)
    }

    pub fn list_records(&self, query: &RecordListQuery) -> EngineResult<Vec<HiNataRecord>> {
        Ok(SqliteHiNataRepository::new(&self.conn).list_records(query)?)
    }

    pub fn get_record(&self, id: HiNataId) -> EngineResult<Option<HiNataRecord>> {
        Ok(SqliteHiNataRepository::new(&self.conn).get_record(id, false)?)
    }

    /// Tombstones a record and retires any quote fragment built from it.
    /// Both changes commit together.
    pub fn delete_record(&self, id: HiNataId) -> EngineResult<()> {
        let tx = begin_immediate(&self.conn)?;
        SqliteHiNataRepository::new(&tx).soft_delete_record(id)?;
        let retired = retire_fragment_keys(&tx, &[quote_fragment_key(id)])?;
        tx.commit().map_err(RepoError::from)?;
        info!("event=hinata_delete module=service status=ok retired_fragments={retired}");
        Ok(())
    }

    pub fn list_fragments(&self, include_retired: bool) -> EngineResult<Vec<PspFragment>> {
        Ok(SqlitePspRepository::new(&self.conn).list_fragments(include_retired)?)
    }

    pub fn strategy_weights(&self) -> EngineResult<StrategyWeights> {
        Ok(SqlitePspRepository::new(&self.conn).load_strategy_weights()?)
    }

    pub fn stats(&self) -> EngineResult<EngineStats> {
        let records = SqliteHiNataRepository::new(&self.conn);
        let psp = SqlitePspRepository::new(&self.conn);
        Ok(EngineStats {
            active_records: records.count_records(false)?,
            total_records: records.count_records(true)?,
            tags: records.list_tags()?.len(),
            fragments: psp.counts()?,
            strategy_weights: psp.load_strategy_weights()?,
            last_production: psp.latest_production_run()?,
            registered_apps: self.apps.len(),
        })
    }

    fn ingestion(&self) -> IngestionService<'_, SqliteHiNataRepository<'_>> {
        IngestionService::with_apps(SqliteHiNataRepository::new(&self.conn), &self.apps)
    }
}

/// Engine-level error wrapping every layer below.
#[derive(Debug)]
pub enum EngineError {
    Config(ConfigError),
    Apps(AppRegistryError),
    Unauthorized(AppRegistryError),
    Db(DbError),
    Repo(RepoError),
    Ingest(IngestError),
    Invocation(InvocationError),
    Feedback(FeedbackError),
    Search(SearchError),
}

impl Display for EngineError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(err) => write!(f, "{err}"),
            Self::Apps(err) => write!(f, "{err}"),
            Self::Unauthorized(err) => write!(f, "not authorized: {err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
            Self::Ingest(err) => write!(f, "{err}"),
            Self::Invocation(err) => write!(f, "{err}"),
            Self::Feedback(err) => write!(f, "{err}"),
            Self::Search(err) => write!(f, "{err}"),
        }
    }
}

impl Error for EngineError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Config(err) => Some(err),
            Self::Apps(err) | Self::Unauthorized(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::Repo(err) => Some(err),
            Self::Ingest(err) => Some(err),
            Self::Invocation(err) => Some(err),
            Self::Feedback(err) => Some(err),
            Self::Search(err) => Some(err),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<DbError> for EngineError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<RepoError> for EngineError {
    fn from(value: RepoError) -> Self {
        Self::Repo(value)
    }
}

impl From<IngestError> for EngineError {
    fn from(value: IngestError) -> Self {
        Self::Ingest(value)
    }
}

impl From<InvocationError> for EngineError {
    fn from(value: InvocationError) -> Self {
        Self::Invocation(value)
    }
}

impl From<FeedbackError> for EngineError {
    fn from(value: FeedbackError) -> Self {
        Self::Feedback(value)
    }
}

impl From<SearchError> for EngineError {
    fn from(value: SearchError) -> Self {
        Self::Search(value)
    }
}
