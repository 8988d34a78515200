//! Remote record stores consumed by the reconciliation core.
//!
//! Every store exposes the same paginated shape: `list` pages through a
//! scope with an opaque cursor, `fetch` resolves ids, and `delete_many` /
//! `upsert_many` apply one bulk mutation. The core never looks inside a
//! cursor; it hands back whatever the previous page returned.

pub mod memory;
pub mod table;
pub mod vector;

use crate::reconcile::models::{Record, RecordError, Scope};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

pub use memory::InMemoryStore;
pub use table::TableStore;
pub use vector::VectorIndexStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Scope not found: {0}")]
    ScopeNotFound(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Request rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Store-specific continuation token. Opaque to everything but its store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<Record>,
    pub next_cursor: Option<Cursor>,
}

/// How completely `list` covers a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListingCoverage {
    /// A true list operation; every record in scope is returned.
    Exhaustive,
    /// Approximated by overlapping similarity queries; records may be missed.
    Approximate,
}

/// Best-effort per-id failures from an otherwise accepted bulk call.
#[derive(Debug, Clone, Default)]
pub struct MutationOutcome {
    pub failed: Vec<RecordError>,
}

impl MutationOutcome {
    pub fn ok() -> Self {
        Self::default()
    }
}

#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Short name used in logs and reports.
    fn name(&self) -> &str;

    fn coverage(&self) -> ListingCoverage {
        ListingCoverage::Exhaustive
    }

    async fn list(&self, scope: &Scope, cursor: Option<&Cursor>) -> StoreResult<Page>;

    async fn fetch(&self, scope: &Scope, ids: &[String]) -> StoreResult<HashMap<String, Record>>;

    /// Errors only when the whole call fails.
    async fn delete_many(&self, scope: &Scope, ids: &[String]) -> StoreResult<MutationOutcome>;

    /// Errors only when the whole call fails.
    async fn upsert_many(&self, scope: &Scope, records: &[Record]) -> StoreResult<MutationOutcome>;
}
