//! # Context Store Core
//!
//! Shared, I/O-free logic for Context Store: context records, the
//! embedding provider trait, the records-plus-vectors index, the ranking
//! algorithm, and the story ledger.
//!
//! This crate performs no filesystem or network access. Concrete embedding
//! backends, snapshot files, and configuration live in the `context-store`
//! application crate.

pub mod embedding;
pub mod error;
pub mod index;
pub mod ingest;
pub mod ledger;
pub mod models;
pub mod search;

pub use error::{Result, StoreError};
