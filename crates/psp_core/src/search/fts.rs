//! Keyword search over stored records (SQLite FTS5).
//!
//! # Invariants
//! - Tombstoned records never appear in hits.
//! - Hit order is bm25 rank, then newest capture, then id.

use crate::db::DbError;
use crate::model::hinata::HiNataId;
use crate::repo::parse_uuid;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type SearchResult<T> = Result<T, SearchError>;

const DEFAULT_LIMIT: u32 = 20;
const SNIPPET_TOKENS: i64 = 12;

#[derive(Debug)]
pub enum SearchError {
    /// Raw FTS5 expression rejected by SQLite.
    InvalidQuery { query: String, message: String },
    Db(DbError),
    InvalidData(String),
}

impl Display for SearchError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidQuery { query, message } => {
                write!(f, "cannot parse search `{query}`: {message}")
            }
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "corrupt search row: {message}"),
        }
    }
}

impl Error for SearchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidQuery { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for SearchError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for SearchError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    pub source_app: Option<String>,
    /// Only records carrying this tag (case-insensitive).
    pub tag: Option<String>,
    /// Only records captured at or after this epoch ms.
    pub since: Option<i64>,
    pub limit: u32,
    /// Pass `text` to FTS5 unchanged. Otherwise every whitespace-separated
    /// word is quoted and all words must match.
    pub raw_fts_syntax: bool,
}

impl SearchQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source_app: None,
            tag: None,
            since: None,
            limit: DEFAULT_LIMIT,
            raw_fts_syntax: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchHit {
    pub record_id: HiNataId,
    pub source_app: String,
    /// Matched excerpt with terms wrapped in `[` `]`.
    pub snippet: String,
    pub recorded_at: i64,
}

/// Runs `query`. Blank text or a zero limit yields no hits.
pub fn search_records(conn: &Connection, query: &SearchQuery) -> SearchResult<Vec<SearchHit>> {
    let Some(expression) = match_expression(query) else {
        return Ok(Vec::new());
    };
    if query.limit == 0 {
        return Ok(Vec::new());
    }

    let mut sql = format!(
        "SELECT r.uuid, r.source_app, r.recorded_at,
                snippet(hinata_fts, -1, '[', ']', ' ... ', {SNIPPET_TOKENS})
         FROM hinata_fts
         JOIN hinata_records r ON r.rowid = hinata_fts.rowid
         WHERE hinata_fts MATCH ?
           AND r.is_deleted = 0"
    );
    let mut binds = vec![Value::Text(expression.clone())];

    if let Some(source_app) = query.source_app.as_deref().map(str::trim) {
        sql.push_str(" AND r.source_app = ?");
        binds.push(Value::Text(source_app.to_string()));
    }
    if let Some(tag) = query.tag.as_deref().map(str::trim) {
        sql.push_str(
            " AND EXISTS (
                SELECT 1 FROM record_tags rt
                JOIN tags t ON t.id = rt.tag_id
                WHERE rt.record_uuid = r.uuid AND t.name = ?
            )",
        );
        binds.push(Value::Text(tag.to_string()));
    }
    if let Some(since) = query.since {
        sql.push_str(" AND r.recorded_at >= ?");
        binds.push(Value::Integer(since));
    }
    sql.push_str(" ORDER BY bm25(hinata_fts), r.recorded_at DESC, r.uuid ASC LIMIT ?");
    binds.push(Value::Integer(i64::from(query.limit)));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(binds), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })
        .map_err(|err| classify(err, &expression))?;

    let mut hits = Vec::new();
    for row in rows {
        let (uuid, source_app, recorded_at, snippet) =
            row.map_err(|err| classify(err, &expression))?;
        let record_id = parse_uuid(&uuid, "hinata_records.uuid")
            .map_err(|err| SearchError::InvalidData(err.to_string()))?;
        hits.push(SearchHit {
            record_id,
            source_app,
            snippet,
            recorded_at,
        });
    }
    Ok(hits)
}

fn match_expression(query: &SearchQuery) -> Option<String> {
    let text = query.text.trim();
    if text.is_empty() {
        return None;
    }
    if query.raw_fts_syntax {
        return Some(text.to_string());
    }
    let quoted: Vec<String> = text
        .split_whitespace()
        .map(|word| format!("\"{}\"", word.replace('"', "\"\"")))
        .collect();
    Some(quoted.join(" AND "))
}

fn classify(err: rusqlite::Error, expression: &str) -> SearchError {
    let syntax = match &err {
        rusqlite::Error::SqliteFailure(_, Some(message)) => {
            let message = message.to_ascii_lowercase();
            message.contains("syntax error")
                || message.contains("malformed match")
                || message.contains("unterminated")
                || message.contains("no such column")
        }
        _ => false,
    };
    if syntax {
        SearchError::InvalidQuery {
            query: expression.to_string(),
            message: err.to_string(),
        }
    } else {
        SearchError::Db(DbError::Sqlite(err))
    }
}
