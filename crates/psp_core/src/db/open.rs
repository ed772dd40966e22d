//! Connection setup.
//!
//! # Invariants
//! - Returned connections enforce foreign keys and wait on a busy store.
//! - Returned connections are at [`latest_version`](super::migrations::latest_version).

use super::migrations::apply_migrations;
use super::{DbError, DbResult};
use log::{info, warn};
use rusqlite::Connection;
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, PartialEq, Eq)]
enum StoreKind {
    File,
    Memory,
}

impl StoreKind {
    fn as_str(self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Memory => "memory",
        }
    }
}

/// Opens (or creates) the store at `path` and migrates it.
///
/// Missing parent directories are created. File stores use WAL journaling.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|source| DbError::StoreDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    connect(StoreKind::File, || Connection::open(path))
}

/// Opens a migrated in-memory store. Used by tests and ephemeral engines.
pub fn open_db_in_memory() -> DbResult<Connection> {
    connect(StoreKind::Memory, Connection::open_in_memory)
}

fn connect(
    kind: StoreKind,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
) -> DbResult<Connection> {
    let started = Instant::now();
    let result = open()
        .map_err(DbError::from)
        .and_then(|mut conn| configure(&mut conn, kind).map(|()| conn));

    match &result {
        Ok(_) => info!(
            "event=db_open module=db status=ok mode={} duration_ms={}",
            kind.as_str(),
            started.elapsed().as_millis()
        ),
        Err(err) => warn!(
            "event=db_open module=db status=error mode={} duration_ms={} error_code={}",
            kind.as_str(),
            started.elapsed().as_millis(),
            err.code()
        ),
    }
    result
}

fn configure(conn: &mut Connection, kind: StoreKind) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    if kind == StoreKind::File {
        conn.query_row("PRAGMA journal_mode = WAL;", [], |_| Ok(()))?;
    }
    apply_migrations(conn)
}
