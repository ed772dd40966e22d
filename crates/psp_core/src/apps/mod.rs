//! Third-party app registration and scope checks.
//!
//! An empty registry means authorization is disabled and every app id is
//! accepted as long as it is well-formed.

pub mod manifest;
pub mod registry;
