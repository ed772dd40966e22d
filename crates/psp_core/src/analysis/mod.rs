//! Local analysis of accumulated HiNATA records.
//!
//! Everything here is pure and deterministic: no I/O and no clock reads.

pub mod sentiment;
pub mod signals;
pub mod tokenize;

pub use signals::{
    LocalAnalyzer, PreferenceSignal, QuoteCandidate, SignalSnapshot, SourceSignal, TagSignal,
    TopicSignal,
};
