//! Full-text search entry points.
//!
//! # Responsibility
//! - Expose keyword search over stored HiNATA records via SQLite FTS5.
//! - Keep search result shaping inside core.

pub mod fts;
