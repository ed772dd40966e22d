//! PSP strategies.
//!
//! # Responsibility
//! - `production`: low-frequency analysis pass that refreshes fragments.
//! - `invocation`: per-request scoring and bounded prompt composition.
//! - `weights`: learned feature weights shared by invocation and feedback.

pub mod invocation;
pub mod production;
pub mod weights;
