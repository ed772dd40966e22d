//! HiNATA record repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist validated records together with their tag links.
//! - Provide filtered listings for analysis and local inspection.
//!
//! # Invariants
//! - Write paths call `HiNataRecord::validate()` before SQL mutations.
//! - A record and its tag links are written in one transaction.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::model::hinata::{AccessLevel, HiNataId, HiNataRecord};
use crate::repo::{
    begin_immediate, bool_to_int, parse_flag, parse_uuid, RepoError, RepoResult,
};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

const RECORD_SELECT_SQL: &str = "SELECT
    uuid,
    recorded_at,
    source_app,
    highlight,
    note,
    address,
    access_level,
    is_deleted
FROM hinata_records";

/// Query options for listing records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordListQuery {
    pub source_app: Option<String>,
    /// Exact tag match, case-insensitive.
    pub tag: Option<String>,
    /// Only records captured at or after this epoch ms.
    pub since: Option<i64>,
    pub include_deleted: bool,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Repository interface for HiNATA records.
pub trait HiNataRepository {
    /// Inserts one record and its tags. Fails with `Duplicate` on a known id.
    fn insert_record(&self, record: &HiNataRecord) -> RepoResult<HiNataId>;
    /// Inserts all records or none.
    fn insert_records(&self, records: &[HiNataRecord]) -> RepoResult<Vec<HiNataId>>;
    fn get_record(&self, id: HiNataId, include_deleted: bool) -> RepoResult<Option<HiNataRecord>>;
    /// Lists records newest first, ties broken by id.
    fn list_records(&self, query: &RecordListQuery) -> RepoResult<Vec<HiNataRecord>>;
    fn soft_delete_record(&self, id: HiNataId) -> RepoResult<()>;
    fn count_records(&self, include_deleted: bool) -> RepoResult<u64>;
    /// Returns all known tags sorted by name.
    fn list_tags(&self) -> RepoResult<Vec<String>>;
}

/// SQLite-backed HiNATA repository.
pub struct SqliteHiNataRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteHiNataRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl HiNataRepository for SqliteHiNataRepository<'_> {
    fn insert_record(&self, record: &HiNataRecord) -> RepoResult<HiNataId> {
        record.validate()?;

        let tx = begin_immediate(self.conn)?;
        insert_record_in(&tx, record)?;
        tx.commit()?;
        Ok(record.id)
    }

    fn insert_records(&self, records: &[HiNataRecord]) -> RepoResult<Vec<HiNataId>> {
        for record in records {
            record.validate()?;
        }

        let tx = begin_immediate(self.conn)?;
        let mut ids = Vec::with_capacity(records.len());
        for record in records {
            insert_record_in(&tx, record)?;
            ids.push(record.id);
        }
        tx.commit()?;
        Ok(ids)
    }

    fn get_record(&self, id: HiNataId, include_deleted: bool) -> RepoResult<Option<HiNataRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "{RECORD_SELECT_SQL}
             WHERE uuid = ?1
               AND (?2 = 1 OR is_deleted = 0);"
        ))?;

        let mut rows = stmt.query(params![id.to_string(), bool_to_int(include_deleted)])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(self.parse_record_row(row)?));
        }

        Ok(None)
    }

    fn list_records(&self, query: &RecordListQuery) -> RepoResult<Vec<HiNataRecord>> {
        let mut sql = format!("{RECORD_SELECT_SQL} WHERE 1 = 1");
        let mut bind_values: Vec<Value> = Vec::new();

        if !query.include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }
        if let Some(source_app) = query.source_app.as_deref() {
            sql.push_str(" AND source_app = ?");
            bind_values.push(Value::Text(source_app.trim().to_string()));
        }
        if let Some(tag) = query.tag.as_deref() {
            sql.push_str(
                " AND uuid IN (
                    SELECT rt.record_uuid
                    FROM record_tags rt
                    JOIN tags t ON t.id = rt.tag_id
                    WHERE t.name = ? COLLATE NOCASE
                )",
            );
            bind_values.push(Value::Text(tag.trim().to_string()));
        }
        if let Some(since) = query.since {
            sql.push_str(" AND recorded_at >= ?");
            bind_values.push(Value::Integer(since));
        }

        sql.push_str(" ORDER BY recorded_at DESC, uuid ASC");

        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(self.parse_record_row(row)?);
        }

        Ok(records)
    }

    fn soft_delete_record(&self, id: HiNataId) -> RepoResult<()> {
        let changed = self.conn.execute(
            "UPDATE hinata_records
             SET
                is_deleted = 1,
                updated_at = (strftime('%s', 'now') * 1000)
             WHERE uuid = ?1
               AND is_deleted = 0;",
            [id.to_string()],
        )?;

        if changed == 0 {
            return Err(RepoError::NotFound(id));
        }

        Ok(())
    }

    fn count_records(&self, include_deleted: bool) -> RepoResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM hinata_records WHERE (?1 = 1 OR is_deleted = 0);",
            [bool_to_int(include_deleted)],
            |row| row.get(0),
        )?;
        u64::try_from(count)
            .map_err(|_| RepoError::InvalidData(format!("negative record count `{count}`")))
    }

    fn list_tags(&self) -> RepoResult<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM tags ORDER BY name COLLATE NOCASE ASC;")?;
        let tags = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

impl SqliteHiNataRepository<'_> {
    fn parse_record_row(&self, row: &Row<'_>) -> RepoResult<HiNataRecord> {
        let uuid_text: String = row.get("uuid")?;
        let id = parse_uuid(&uuid_text, "hinata_records.uuid")?;

        let access_text: String = row.get("access_level")?;
        let access_level = AccessLevel::parse(&access_text).ok_or_else(|| {
            RepoError::InvalidData(format!(
                "invalid access level `{access_text}` in hinata_records.access_level"
            ))
        })?;

        let record = HiNataRecord {
            id,
            timestamp: row.get("recorded_at")?,
            source_app: row.get("source_app")?,
            highlight: row.get("highlight")?,
            note: row.get("note")?,
            address: row.get("address")?,
            tags: self.load_tags(&uuid_text)?,
            access_level,
            is_deleted: parse_flag(row.get("is_deleted")?, "hinata_records.is_deleted")?,
        };
        record.validate()?;
        Ok(record)
    }

    fn load_tags(&self, record_uuid: &str) -> RepoResult<Vec<String>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT t.name
             FROM record_tags rt
             JOIN tags t ON t.id = rt.tag_id
             WHERE rt.record_uuid = ?1
             ORDER BY t.name COLLATE NOCASE ASC;",
        )?;
        let tags = stmt
            .query_map([record_uuid], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tags)
    }
}

fn insert_record_in(conn: &Connection, record: &HiNataRecord) -> RepoResult<()> {
    let record_uuid = record.id.to_string();
    if record_exists(conn, &record_uuid)? {
        return Err(RepoError::Duplicate(record.id));
    }

    conn.execute(
        "INSERT INTO hinata_records (
            uuid,
            recorded_at,
            source_app,
            highlight,
            note,
            address,
            access_level,
            is_deleted
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
        params![
            record_uuid.as_str(),
            record.timestamp,
            record.source_app.as_str(),
            record.highlight.as_str(),
            record.note.as_str(),
            record.address.as_str(),
            record.access_level.as_str(),
            bool_to_int(record.is_deleted),
        ],
    )?;

    for tag in &record.tags {
        conn.execute(
            "INSERT OR IGNORE INTO tags (name) VALUES (?1);",
            [tag.as_str()],
        )?;
        conn.execute(
            "INSERT OR IGNORE INTO record_tags (record_uuid, tag_id)
             SELECT ?1, id
             FROM tags
             WHERE name = ?2 COLLATE NOCASE;",
            params![record_uuid.as_str(), tag.as_str()],
        )?;
    }

    Ok(())
}

fn record_exists(conn: &Connection, record_uuid: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM hinata_records WHERE uuid = ?1);",
        [record_uuid],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
