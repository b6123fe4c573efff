//! # Listing store
//!
//! The narrow persistence contract the reconciler works against. Every call
//! may block; implementations own their connection handling and any retry
//! policy. There is no hard delete: removal is `deactivate`.

pub mod memory;
pub mod query;
pub mod sqlite;

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use thiserror::Error;

use crate::listing::{CanonicalRecord, ChangeLogEntry, ListingId, PersistedListing};

pub use memory::MemoryStore;
pub use query::{ListingQuery, ListingSort, LocationStats};
pub use sqlite::SqliteStore;

/// Errors produced by [`ListingStore`] operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("listing {0} not found")]
    NotFound(ListingId),
    #[error("identity key already stored: {0}")]
    Duplicate(String),
    #[error("schema error: {0}")]
    Schema(String),
    #[error("injected failure in {0}")]
    Injected(&'static str),
}

pub trait ListingStore: Send + Sync {
    /// Identity keys of every listing with `is_active = true`.
    fn active_identity_keys(&self) -> Result<HashSet<String>, StoreError>;

    fn exists(&self, identity_key: &str) -> Result<bool, StoreError> {
        Ok(self.find_id(identity_key)?.is_some())
    }

    fn find_id(&self, identity_key: &str) -> Result<Option<ListingId>, StoreError>;

    fn find_listing(&self, id: ListingId) -> Result<Option<PersistedListing>, StoreError>;

    /// Insert a new active listing; `at` becomes `created_at`.
    fn insert(&self, record: &CanonicalRecord, at: DateTime<Utc>) -> Result<ListingId, StoreError>;

    /// Mark active again, clear `closed_at` and carry the fresh field values forward.
    /// `created_at` and `id` are preserved.
    fn reactivate(
        &self,
        id: ListingId,
        record: &CanonicalRecord,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// `is_active = false`, `closed_at = at`.
    fn deactivate(&self, id: ListingId, at: DateTime<Utc>) -> Result<(), StoreError>;

    fn append_change_log(&self, entry: &ChangeLogEntry) -> Result<(), StoreError>;

    /// Audit trail in append order, optionally for a single key.
    fn change_log(&self, identity_key: Option<&str>) -> Result<Vec<ChangeLogEntry>, StoreError>;

    /// Active listings matching `query`, in `query.sort` order.
    fn active_listings(&self, query: &ListingQuery) -> Result<Vec<PersistedListing>, StoreError>;

    /// Per-location counts and salary averages over active listings, most
    /// listings first.
    fn stats_by_location(&self) -> Result<Vec<LocationStats>, StoreError>;
}
