// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ingest;
pub mod listing;
pub mod metrics;
pub mod reconcile;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::ingest::types::{FetchError, MappingError, SourceProvider, TransportError};
pub use crate::listing::{CanonicalRecord, ChangeKind, ChangeLogEntry, PersistedListing};
pub use crate::reconcile::{CycleError, CycleReport, Reconciler};
pub use crate::store::{ListingStore, StoreError};
