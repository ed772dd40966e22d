//! PSP fragment, invocation and feedback persistence.
//!
//! # Responsibility
//! - Store fragments by stable key across production runs.
//! - Record invocations with their feature snapshot for later feedback.
//! - Apply feedback weight updates and strategy weights in one transaction.
//!
//! # Invariants
//! - Production merges by `fragment_key`; a refreshed fragment keeps its id
//!   and learned weight.
//! - Fragments are retired, never deleted, so invocation history stays valid.
//! - At most one feedback row exists per invocation.

use crate::model::feedback::Satisfaction;
use crate::model::psp::{
    nudge_fragment_weight, FragmentId, FragmentKind, InvocationId, PspFragment,
};
use crate::repo::{
    begin_immediate, bool_to_int, parse_flag, parse_uuid, u32_from_db, RepoError, RepoResult,
};
use crate::strategy::weights::{FeatureVector, StrategyWeights};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;

const FRAGMENT_SELECT_SQL: &str = "SELECT
    uuid,
    fragment_key,
    kind,
    text,
    keywords,
    source_app,
    weight,
    support,
    last_seen_at,
    produced_at
FROM psp_fragments";

/// Fragments to persist for one production run.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductionPlan {
    pub started_at: i64,
    pub record_count: usize,
    pub fragments: Vec<PspFragment>,
    /// Skipped runs are recorded but leave fragments untouched.
    pub skipped: bool,
}

/// Fragment changes applied by one production run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProductionOutcome {
    pub inserted: usize,
    pub refreshed: usize,
    pub retired: usize,
}

/// Persisted production run summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductionRun {
    pub id: i64,
    pub started_at: i64,
    pub record_count: u32,
    pub fragments_inserted: u32,
    pub fragments_refreshed: u32,
    pub fragments_retired: u32,
    pub skipped: bool,
}

/// One selected fragment with the features it was scored on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InvocationEntry {
    pub fragment_id: FragmentId,
    pub features: FeatureVector,
    pub score: f64,
}

/// Persisted invocation. The query text itself is never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct InvocationRecord {
    pub id: InvocationId,
    pub source_app: Option<String>,
    pub query_term_count: u32,
    pub char_budget: usize,
    pub char_count: usize,
    pub created_at: i64,
    /// Entries in prompt order.
    pub entries: Vec<InvocationEntry>,
}

impl InvocationRecord {
    pub fn fragment_ids(&self) -> Vec<FragmentId> {
        self.entries.iter().map(|entry| entry.fragment_id).collect()
    }
}

/// One feedback signal resolved against its invocation.
///
/// Current weights are read and rewritten inside one immediate transaction,
/// so writers sharing a store never overwrite each other's updates.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackUpdate {
    pub invocation_id: InvocationId,
    pub satisfaction: Satisfaction,
    /// Entries the signal applies to.
    pub targets: Vec<InvocationEntry>,
    pub fragment_learning_rate: f64,
    pub strategy_learning_rate: f64,
    pub created_at: i64,
}

/// Weight change applied to one fragment.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FragmentWeightChange {
    pub fragment_id: FragmentId,
    pub before: f64,
    pub after: f64,
}

/// What [`PspRepository::apply_feedback`] committed.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedFeedback {
    /// `actual - predicted` before the strategy update.
    pub prediction_error: f64,
    pub fragment_changes: Vec<FragmentWeightChange>,
    pub strategy_weights: StrategyWeights,
}

/// Row counts for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PspCounts {
    pub active_fragments: u64,
    pub retired_fragments: u64,
    pub invocations: u64,
    pub feedback: u64,
}

/// Repository interface for PSP state.
pub trait PspRepository {
    /// Lists fragments ordered by kind, then key.
    fn list_fragments(&self, include_retired: bool) -> RepoResult<Vec<PspFragment>>;
    /// Merges produced fragments by key, retires stale ones, records the run.
    fn apply_production(&self, plan: &ProductionPlan) -> RepoResult<ProductionOutcome>;
    fn latest_production_run(&self) -> RepoResult<Option<ProductionRun>>;
    fn load_strategy_weights(&self) -> RepoResult<StrategyWeights>;
    fn record_invocation(&self, invocation: &InvocationRecord) -> RepoResult<()>;
    fn get_invocation(&self, id: InvocationId) -> RepoResult<Option<InvocationRecord>>;
    fn has_feedback(&self, id: InvocationId) -> RepoResult<bool>;
    /// Moves the targeted fragment weights and the strategy weights toward
    /// the satisfaction value.
    ///
    /// Fails with `NotFound` for unknown invocations or fragments and
    /// `Duplicate` when feedback already exists.
    fn apply_feedback(&self, update: &FeedbackUpdate) -> RepoResult<AppliedFeedback>;
    fn counts(&self) -> RepoResult<PspCounts>;
}

/// SQLite-backed PSP repository.
pub struct SqlitePspRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqlitePspRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl PspRepository for SqlitePspRepository<'_> {
    fn list_fragments(&self, include_retired: bool) -> RepoResult<Vec<PspFragment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{FRAGMENT_SELECT_SQL}
             WHERE (?1 = 1 OR is_retired = 0)
             ORDER BY fragment_key ASC;"
        ))?;
        let mut rows = stmt.query([bool_to_int(include_retired)])?;
        let mut fragments = Vec::new();
        while let Some(row) = rows.next()? {
            fragments.push(parse_fragment_row(row)?);
        }
        fragments.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.key.cmp(&b.key)));
        Ok(fragments)
    }

    fn apply_production(&self, plan: &ProductionPlan) -> RepoResult<ProductionOutcome> {
        for fragment in &plan.fragments {
            fragment.validate()?;
        }

        let tx = begin_immediate(self.conn)?;
        let mut outcome = ProductionOutcome::default();

        if !plan.skipped {
            let mut produced_keys = BTreeSet::new();
            for fragment in &plan.fragments {
                if !produced_keys.insert(fragment.key.as_str()) {
                    return Err(RepoError::InvalidData(format!(
                        "duplicate fragment key `{}` in production plan",
                        fragment.key
                    )));
                }
                if upsert_fragment(&tx, fragment)? {
                    outcome.inserted += 1;
                } else {
                    outcome.refreshed += 1;
                }
            }

            let stale: Vec<String> = active_fragment_keys(&tx)?
                .into_iter()
                .filter(|key| !produced_keys.contains(key.as_str()))
                .collect();
            outcome.retired = retire_fragment_keys(&tx, &stale)?;
        }

        tx.execute(
            "INSERT INTO production_runs (
                started_at,
                record_count,
                fragments_inserted,
                fragments_refreshed,
                fragments_retired,
                skipped
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                plan.started_at,
                to_db_count(plan.record_count),
                to_db_count(outcome.inserted),
                to_db_count(outcome.refreshed),
                to_db_count(outcome.retired),
                bool_to_int(plan.skipped),
            ],
        )?;
        tx.commit()?;

        Ok(outcome)
    }

    fn latest_production_run(&self) -> RepoResult<Option<ProductionRun>> {
        let row = self
            .conn
            .query_row(
                "SELECT
                    id,
                    started_at,
                    record_count,
                    fragments_inserted,
                    fragments_refreshed,
                    fragments_retired,
                    skipped
                 FROM production_runs
                 ORDER BY id DESC
                 LIMIT 1;",
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, started_at, records, inserted, refreshed, retired, skipped)) = row else {
            return Ok(None);
        };
        Ok(Some(ProductionRun {
            id,
            started_at,
            record_count: u32_from_db(records, "production_runs.record_count")?,
            fragments_inserted: u32_from_db(inserted, "production_runs.fragments_inserted")?,
            fragments_refreshed: u32_from_db(refreshed, "production_runs.fragments_refreshed")?,
            fragments_retired: u32_from_db(retired, "production_runs.fragments_retired")?,
            skipped: parse_flag(skipped, "production_runs.skipped")?,
        }))
    }

    fn load_strategy_weights(&self) -> RepoResult<StrategyWeights> {
        read_strategy_weights(self.conn)
    }

    fn record_invocation(&self, invocation: &InvocationRecord) -> RepoResult<()> {
        let tx = begin_immediate(self.conn)?;
        let invocation_uuid = invocation.id.to_string();
        tx.execute(
            "INSERT INTO psp_invocations (
                uuid,
                source_app,
                query_term_count,
                char_budget,
                char_count,
                created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6);",
            params![
                invocation_uuid.as_str(),
                invocation.source_app.as_deref(),
                i64::from(invocation.query_term_count),
                to_db_count(invocation.char_budget),
                to_db_count(invocation.char_count),
                invocation.created_at,
            ],
        )?;

        for (position, entry) in invocation.entries.iter().enumerate() {
            tx.execute(
                "INSERT INTO psp_invocation_fragments (
                    invocation_uuid,
                    fragment_uuid,
                    position,
                    relevance,
                    weight,
                    recency,
                    source_match,
                    score
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    invocation_uuid.as_str(),
                    entry.fragment_id.to_string(),
                    to_db_count(position),
                    entry.features.relevance,
                    entry.features.weight,
                    entry.features.recency,
                    entry.features.source_match,
                    entry.score,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_invocation(&self, id: InvocationId) -> RepoResult<Option<InvocationRecord>> {
        let header = self
            .conn
            .query_row(
                "SELECT source_app, query_term_count, char_budget, char_count, created_at
                 FROM psp_invocations
                 WHERE uuid = ?1;",
                [id.to_string()],
                |row| {
                    Ok((
                        row.get::<_, Option<String>>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                },
            )
            .optional()?;
        let Some((source_app, term_count, char_budget, char_count, created_at)) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare(
            "SELECT fragment_uuid, relevance, weight, recency, source_match, score
             FROM psp_invocation_fragments
             WHERE invocation_uuid = ?1
             ORDER BY position ASC;",
        )?;
        let mut rows = stmt.query([id.to_string()])?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            let fragment_text: String = row.get(0)?;
            entries.push(InvocationEntry {
                fragment_id: parse_uuid(
                    &fragment_text,
                    "psp_invocation_fragments.fragment_uuid",
                )?,
                features: FeatureVector {
                    relevance: row.get(1)?,
                    weight: row.get(2)?,
                    recency: row.get(3)?,
                    source_match: row.get(4)?,
                },
                score: row.get(5)?,
            });
        }

        Ok(Some(InvocationRecord {
            id,
            source_app,
            query_term_count: u32_from_db(term_count, "psp_invocations.query_term_count")?,
            char_budget: usize_from_db(char_budget, "psp_invocations.char_budget")?,
            char_count: usize_from_db(char_count, "psp_invocations.char_count")?,
            created_at,
            entries,
        }))
    }

    fn has_feedback(&self, id: InvocationId) -> RepoResult<bool> {
        exists(
            self.conn,
            "SELECT EXISTS(SELECT 1 FROM psp_feedback WHERE invocation_uuid = ?1);",
            &id.to_string(),
        )
    }

    fn apply_feedback(&self, update: &FeedbackUpdate) -> RepoResult<AppliedFeedback> {
        let invocation_uuid = update.invocation_id.to_string();
        let actual = update.satisfaction.value();

        // Why: weights are read under the write lock so a second connection
        // cannot commit between the read and the update.
        let tx = begin_immediate(self.conn)?;
        if !exists(
            &tx,
            "SELECT EXISTS(SELECT 1 FROM psp_invocations WHERE uuid = ?1);",
            &invocation_uuid,
        )? {
            return Err(RepoError::NotFound(update.invocation_id));
        }
        if exists(
            &tx,
            "SELECT EXISTS(SELECT 1 FROM psp_feedback WHERE invocation_uuid = ?1);",
            &invocation_uuid,
        )? {
            return Err(RepoError::Duplicate(update.invocation_id));
        }

        let mut fragment_changes = Vec::with_capacity(update.targets.len());
        for entry in &update.targets {
            let fragment_uuid = entry.fragment_id.to_string();
            let before: f64 = tx
                .query_row(
                    "SELECT weight FROM psp_fragments WHERE uuid = ?1;",
                    [fragment_uuid.as_str()],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(RepoError::NotFound(entry.fragment_id))?;
            let after = nudge_fragment_weight(before, actual, update.fragment_learning_rate);
            tx.execute(
                "UPDATE psp_fragments SET weight = ?1 WHERE uuid = ?2;",
                params![after, fragment_uuid.as_str()],
            )?;
            fragment_changes.push(FragmentWeightChange {
                fragment_id: entry.fragment_id,
                before,
                after,
            });
        }

        let mut strategy_weights = read_strategy_weights(&tx)?;
        let features: Vec<FeatureVector> =
            update.targets.iter().map(|entry| entry.features).collect();
        let prediction_error = match FeatureVector::mean(&features) {
            Some(mean) => {
                strategy_weights.apply_outcome(&mean, actual, update.strategy_learning_rate)
            }
            None => 0.0,
        };
        if !strategy_weights.is_normalized() {
            return Err(RepoError::InvalidData(format!(
                "refusing to store non-normalized strategy weights: {strategy_weights:?}"
            )));
        }
        tx.execute(
            "UPDATE strategy_weights
             SET
                relevance = ?1,
                weight = ?2,
                recency = ?3,
                source_match = ?4,
                sample_count = ?5,
                updated_at = ?6
             WHERE id = 1;",
            params![
                strategy_weights.relevance,
                strategy_weights.weight,
                strategy_weights.recency,
                strategy_weights.source_match,
                i64::from(strategy_weights.sample_count),
                update.created_at,
            ],
        )?;

        tx.execute(
            "INSERT INTO psp_feedback (
                invocation_uuid,
                satisfaction,
                prediction_error,
                created_at
            ) VALUES (?1, ?2, ?3, ?4);",
            params![
                invocation_uuid.as_str(),
                update.satisfaction.as_str(),
                prediction_error,
                update.created_at,
            ],
        )?;
        tx.commit()?;

        Ok(AppliedFeedback {
            prediction_error,
            fragment_changes,
            strategy_weights,
        })
    }

    fn counts(&self) -> RepoResult<PspCounts> {
        let count = |sql: &str| -> RepoResult<u64> {
            let value: i64 = self.conn.query_row(sql, [], |row| row.get(0))?;
            u64::try_from(value)
                .map_err(|_| RepoError::InvalidData(format!("negative count `{value}`")))
        };
        Ok(PspCounts {
            active_fragments: count("SELECT COUNT(*) FROM psp_fragments WHERE is_retired = 0;")?,
            retired_fragments: count("SELECT COUNT(*) FROM psp_fragments WHERE is_retired = 1;")?,
            invocations: count("SELECT COUNT(*) FROM psp_invocations;")?,
            feedback: count("SELECT COUNT(*) FROM psp_feedback;")?,
        })
    }
}

/// Retires active fragments with the given keys. Runs on the caller's
/// transaction; returns how many changed.
pub(crate) fn retire_fragment_keys(conn: &Connection, keys: &[String]) -> RepoResult<usize> {
    // Why: rows are kept so learned weights come back if the key is produced again.
    let mut retired = 0;
    for key in keys {
        retired += conn.execute(
            "UPDATE psp_fragments SET is_retired = 1 WHERE fragment_key = ?1 AND is_retired = 0;",
            [key.as_str()],
        )?;
    }
    Ok(retired)
}

/// Returns `true` when the fragment was inserted, `false` when refreshed.
fn upsert_fragment(conn: &Connection, fragment: &PspFragment) -> RepoResult<bool> {
    let keywords = serde_json::to_string(&fragment.keywords)
        .map_err(|err| RepoError::InvalidData(format!("unencodable keywords: {err}")))?;

    let refreshed = conn.execute(
        "UPDATE psp_fragments
         SET
            kind = ?1,
            text = ?2,
            keywords = ?3,
            source_app = ?4,
            support = ?5,
            last_seen_at = ?6,
            produced_at = ?7,
            is_retired = 0
         WHERE fragment_key = ?8;",
        params![
            fragment.kind.as_str(),
            fragment.text.as_str(),
            keywords.as_str(),
            fragment.source_app.as_deref(),
            i64::from(fragment.support),
            fragment.last_seen_at,
            fragment.produced_at,
            fragment.key.as_str(),
        ],
    )?;
    if refreshed > 0 {
        return Ok(false);
    }

    conn.execute(
        "INSERT INTO psp_fragments (
            uuid,
            fragment_key,
            kind,
            text,
            keywords,
            source_app,
            weight,
            support,
            last_seen_at,
            produced_at,
            is_retired
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, 0);",
        params![
            fragment.id.to_string(),
            fragment.key.as_str(),
            fragment.kind.as_str(),
            fragment.text.as_str(),
            keywords.as_str(),
            fragment.source_app.as_deref(),
            fragment.weight,
            i64::from(fragment.support),
            fragment.last_seen_at,
            fragment.produced_at,
        ],
    )?;
    Ok(true)
}

fn active_fragment_keys(conn: &Connection) -> RepoResult<Vec<String>> {
    let mut stmt =
        conn.prepare("SELECT fragment_key FROM psp_fragments WHERE is_retired = 0;")?;
    let keys = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn read_strategy_weights(conn: &Connection) -> RepoResult<StrategyWeights> {
    let row = conn
        .query_row(
            "SELECT relevance, weight, recency, source_match, sample_count
             FROM strategy_weights
             WHERE id = 1;",
            [],
            |row| {
                Ok((
                    row.get::<_, f64>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, f64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((relevance, weight, recency, source_match, samples)) = row else {
        return Err(RepoError::InvalidData(
            "strategy_weights row is missing".to_string(),
        ));
    };
    let weights = StrategyWeights {
        relevance,
        weight,
        recency,
        source_match,
        sample_count: u32_from_db(samples, "strategy_weights.sample_count")?,
    };
    if !weights.is_normalized() {
        return Err(RepoError::InvalidData(format!(
            "strategy weights are not normalized: {weights:?}"
        )));
    }
    Ok(weights)
}

fn exists(conn: &Connection, sql: &str, uuid: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(sql, [uuid], |row| row.get(0))?;
    Ok(exists == 1)
}

fn parse_fragment_row(row: &Row<'_>) -> RepoResult<PspFragment> {
    let uuid_text: String = row.get("uuid")?;
    let id = parse_uuid(&uuid_text, "psp_fragments.uuid")?;

    let kind_text: String = row.get("kind")?;
    let kind = FragmentKind::parse(&kind_text).ok_or_else(|| {
        RepoError::InvalidData(format!("invalid fragment kind `{kind_text}` in psp_fragments.kind"))
    })?;

    let keywords_text: String = row.get("keywords")?;
    let keywords: Vec<String> = serde_json::from_str(&keywords_text).map_err(|err| {
        RepoError::InvalidData(format!("invalid keywords JSON in psp_fragments.keywords: {err}"))
    })?;

    let fragment = PspFragment {
        id,
        kind,
        key: row.get("fragment_key")?,
        text: row.get("text")?,
        keywords,
        source_app: row.get("source_app")?,
        weight: row.get("weight")?,
        support: u32_from_db(row.get("support")?, "psp_fragments.support")?,
        last_seen_at: row.get("last_seen_at")?,
        produced_at: row.get("produced_at")?,
    };
    fragment.validate()?;
    Ok(fragment)
}

fn to_db_count(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn usize_from_db(value: i64, column: &str) -> RepoResult<usize> {
    usize::try_from(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid size value `{value}` in {column}")))
}
