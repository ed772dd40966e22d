//! Domain model for HiNATA ingestion and PSP composition.
//!
//! # Responsibility
//! - Define canonical data structures used by core business logic.
//! - Keep validation next to the types it protects.
//!
//! # Invariants
//! - Every record, fragment and invocation is identified by a stable UUID.
//! - Deletion is represented by soft-delete tombstones, not hard delete.

pub mod feedback;
pub mod hinata;
pub mod psp;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current wall-clock time in Unix epoch milliseconds.
///
/// Returns `0` when the system clock is set before the epoch.
pub fn now_epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| i64::try_from(elapsed.as_millis()).unwrap_or(i64::MAX))
        .unwrap_or(0)
}
