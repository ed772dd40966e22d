use psp_core::config::FeedbackSettings;
use psp_core::db::open_db;
use psp_core::model::psp::quote_fragment_key;
use psp_core::repo::psp_repo::{
    AppliedFeedback, FeedbackUpdate, InvocationRecord, ProductionOutcome, ProductionPlan,
    ProductionRun, PspCounts,
};
use psp_core::service::feedback::{FeedbackOutcome, FeedbackService};
use psp_core::{
    AccessLevel, EngineConfig, EngineError, FeedbackSignal, HiNataRecord, InvocationId,
    PersonalizationEngine, PspFragment, PspRepository, QueryContext, RepoResult, Satisfaction,
    SqlitePspRepository, StrategyWeights,
};
use std::cell::RefCell;
use std::path::Path;
use uuid::Uuid;

const NOW: i64 = 1_800_000_000_000;
const DAY_MS: i64 = 86_400_000;

fn file_engine(db_path: &Path) -> PersonalizationEngine {
    let config = EngineConfig {
        db_path: db_path.to_path_buf(),
        ..EngineConfig::default()
    };
    PersonalizationEngine::open(config).unwrap()
}

fn seed(engine: &PersonalizationEngine) -> Vec<HiNataRecord> {
    let records: Vec<HiNataRecord> = [
        (1, "Rust ownership keeps concurrency bugs away"),
        (2, "Rust traits give zero cost abstraction"),
    ]
    .into_iter()
    .map(|(days_ago, highlight)| {
        let mut record =
            HiNataRecord::with_id(Uuid::new_v4(), NOW - days_ago * DAY_MS, "reader", highlight, "");
        record.access_level = AccessLevel::Public;
        record
    })
    .collect();
    engine.submit_hinata_batch(&records).unwrap();
    engine.run_production_at(NOW).unwrap();
    records
}

fn invoke(engine: &PersonalizationEngine, query: &str) -> InvocationId {
    let mut context = QueryContext::new(query);
    context.now_ms = NOW;
    engine
        .get_personalized_prompt(&context)
        .unwrap()
        .invocation_id
        .unwrap()
}

/// Runs `before_apply` right before delegating `apply_feedback`.
struct InterleavedRepository<'conn, F: Fn()> {
    inner: SqlitePspRepository<'conn>,
    before_apply: F,
}

impl<F: Fn()> PspRepository for InterleavedRepository<'_, F> {
    fn list_fragments(&self, include_retired: bool) -> RepoResult<Vec<PspFragment>> {
        self.inner.list_fragments(include_retired)
    }

    fn apply_production(&self, plan: &ProductionPlan) -> RepoResult<ProductionOutcome> {
        self.inner.apply_production(plan)
    }

    fn latest_production_run(&self) -> RepoResult<Option<ProductionRun>> {
        self.inner.latest_production_run()
    }

    fn load_strategy_weights(&self) -> RepoResult<StrategyWeights> {
        self.inner.load_strategy_weights()
    }

    fn record_invocation(&self, invocation: &InvocationRecord) -> RepoResult<()> {
        self.inner.record_invocation(invocation)
    }

    fn get_invocation(&self, id: InvocationId) -> RepoResult<Option<InvocationRecord>> {
        self.inner.get_invocation(id)
    }

    fn has_feedback(&self, id: InvocationId) -> RepoResult<bool> {
        self.inner.has_feedback(id)
    }

    fn apply_feedback(&self, update: &FeedbackUpdate) -> RepoResult<AppliedFeedback> {
        (self.before_apply)();
        self.inner.apply_feedback(update)
    }

    fn counts(&self) -> RepoResult<PspCounts> {
        self.inner.counts()
    }
}

#[test]
fn feedback_from_two_connections_keeps_both_updates() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("shared.sqlite3");
    let other = file_engine(&db_path);
    seed(&other);
    let first = invoke(&other, "rust");
    let second = invoke(&other, "rust");

    let conn = open_db(&db_path).unwrap();
    let other_outcome: RefCell<Option<FeedbackOutcome>> = RefCell::new(None);
    let service = FeedbackService::new(
        InterleavedRepository {
            inner: SqlitePspRepository::new(&conn),
            before_apply: || {
                let outcome = other
                    .record_feedback(&FeedbackSignal::new(second, Satisfaction::Positive))
                    .unwrap();
                *other_outcome.borrow_mut() = Some(outcome);
            },
        },
        FeedbackSettings::default(),
    );

    let outcome = service
        .record_feedback(&FeedbackSignal::new(first, Satisfaction::Positive))
        .unwrap();

    let weights = other.strategy_weights().unwrap();
    assert_eq!(weights.sample_count, 2);
    assert_eq!(outcome.strategy_weights, weights);
    assert_eq!(other.stats().unwrap().fragments.feedback, 2);

    let other_outcome = other_outcome.into_inner().unwrap();
    let fragments = other.list_fragments(false).unwrap();
    for change in &outcome.fragment_changes {
        if let Some(earlier) = other_outcome
            .fragment_changes
            .iter()
            .find(|earlier| earlier.fragment_id == change.fragment_id)
        {
            assert!((change.before - earlier.after).abs() < 1e-12);
        }
        let stored = fragments
            .iter()
            .find(|fragment| fragment.id == change.fragment_id)
            .unwrap();
        assert!((stored.weight - change.after).abs() < 1e-12);
    }
}

#[test]
fn failed_quote_retirement_keeps_record_active() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("delete.sqlite3");
    let engine = file_engine(&db_path);
    let records = seed(&engine);
    let record_id = records[0].id;
    let quote_key = quote_fragment_key(record_id);
    assert!(engine
        .list_fragments(false)
        .unwrap()
        .iter()
        .any(|fragment| fragment.key == quote_key));

    let admin = open_db(&db_path).unwrap();
    admin
        .execute_batch(
            "CREATE TRIGGER block_retire BEFORE UPDATE OF is_retired ON psp_fragments
             BEGIN SELECT RAISE(ABORT, 'retire blocked'); END;",
        )
        .unwrap();

    let err = engine.delete_record(record_id).unwrap_err();
    assert!(matches!(err, EngineError::Repo(_)));
    assert!(engine.get_record(record_id).unwrap().is_some());

    admin.execute_batch("DROP TRIGGER block_retire;").unwrap();
    engine.delete_record(record_id).unwrap();
    assert!(engine.get_record(record_id).unwrap().is_none());
    assert!(!engine
        .list_fragments(false)
        .unwrap()
        .iter()
        .any(|fragment| fragment.key == quote_key));
}
