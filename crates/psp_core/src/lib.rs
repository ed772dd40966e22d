//! Core domain logic for local HiNATA ingestion and PSP personalization.
//! This crate is the single source of truth for business invariants.

pub mod analysis;
pub mod apps;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod search;
pub mod service;
pub mod strategy;

pub use analysis::{LocalAnalyzer, SignalSnapshot};
pub use apps::manifest::{AppManifest, AppScope};
pub use apps::registry::{AppRegistry, AppRegistryError};
pub use config::{ConfigError, EngineConfig};
pub use logging::{
    default_log_level, init_from_config, init_logging, logging_status, LogSettings, LoggingError,
};
pub use model::feedback::{FeedbackSignal, Satisfaction};
pub use model::hinata::{AccessLevel, HiNataId, HiNataRecord, HiNataValidationError};
pub use model::psp::{
    FragmentId, FragmentKind, InvocationId, PersonalSystemPrompt, PspFragment, QueryContext,
};
pub use repo::hinata_repo::{HiNataRepository, RecordListQuery, SqliteHiNataRepository};
pub use repo::psp_repo::{PspRepository, SqlitePspRepository};
pub use repo::{RepoError, RepoResult};
pub use search::fts::{search_records, SearchError, SearchHit, SearchQuery, SearchResult};
pub use service::engine::{EngineError, EngineResult, EngineStats, PersonalizationEngine};
pub use service::feedback::{FeedbackError, FeedbackOutcome};
pub use service::ingestion::{decode_hinata_json, IngestError};
pub use strategy::production::ProductionReport;
pub use strategy::weights::{FeatureVector, StrategyWeights};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::{core_version, ping};

    #[test]
    fn ping_returns_pong() {
        assert_eq!(ping(), "pong");
    }

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
