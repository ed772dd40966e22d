//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository and strategy calls into use-case level APIs.
//! - Keep callers decoupled from storage details.

pub mod engine;
pub mod feedback;
pub mod ingestion;
