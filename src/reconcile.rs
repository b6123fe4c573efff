//! # Reconciliation
//!
//! Diffs one fetched batch against the store's active listings and applies
//! the resulting transitions, one audit entry per successful transition.
//!
//! Planning is pure: every distinct identity key is classified once, before
//! any mutation, as
//!
//! | stored state        | outcome                    |
//! |---------------------|----------------------------|
//! | unseen              | insert, `ADDED`            |
//! | stored, inactive    | reactivate, `UPDATED`      |
//! | stored, active      | skip (fields untouched)    |
//!
//! and every previously active key missing from the batch is deactivated
//! with a `REMOVED` entry, unless its source failed to fetch this cycle.
//! A key seen twice in one batch is planned once from its first occurrence.
//! Failures are isolated per key; only a failed read of the active-key
//! baseline aborts the cycle.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;

use crate::ingest::{self, types::SourceProvider, Batch};
use crate::listing::{CanonicalRecord, ChangeKind, ChangeLogEntry, FieldSnapshot, ListingId};
use crate::store::{ListingStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    New,
    Reactivate(ListingId),
    Skip,
}

/// Classify one key. `lookup` is only consulted for keys outside `active`.
pub fn classify<F>(key: &str, active: &HashSet<String>, lookup: F) -> Result<KeyState, StoreError>
where
    F: FnOnce(&str) -> Result<Option<ListingId>, StoreError>,
{
    if active.contains(key) {
        return Ok(KeyState::Skip);
    }
    Ok(match lookup(key)? {
        None => KeyState::New,
        Some(id) => KeyState::Reactivate(id),
    })
}

#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub inserts: Vec<CanonicalRecord>,
    pub reactivations: Vec<(ListingId, CanonicalRecord)>,
    /// Sorted for a stable application order.
    pub removals: Vec<String>,
    pub skipped: usize,
    /// Repeat occurrences of a key already planned this cycle. Dropped even
    /// when the first occurrence later fails to apply.
    pub duplicates: usize,
    /// Keys whose stored state could not be read. Left untouched.
    pub lookup_failures: usize,
}

/// Build the plan for `batch` against the `active` baseline.
pub fn plan<F>(
    batch: Vec<CanonicalRecord>,
    active: &HashSet<String>,
    mut lookup: F,
) -> ReconcilePlan
where
    F: FnMut(&str) -> Result<Option<ListingId>, StoreError>,
{
    let mut out = ReconcilePlan::default();
    let mut fetched: HashSet<String> = HashSet::with_capacity(batch.len());

    for rec in batch {
        if !fetched.insert(rec.identity_key.clone()) {
            out.duplicates += 1;
            continue;
        }
        match classify(&rec.identity_key, active, &mut lookup) {
            Ok(KeyState::New) => out.inserts.push(rec),
            Ok(KeyState::Reactivate(id)) => out.reactivations.push((id, rec)),
            Ok(KeyState::Skip) => out.skipped += 1,
            Err(e) => {
                tracing::warn!(
                    target: "reconcile",
                    key = %rec.identity_key,
                    error = %e,
                    "lookup failed, key left as is"
                );
                out.lookup_failures += 1;
            }
        }
    }

    let mut removals: Vec<String> = active.difference(&fetched).cloned().collect();
    removals.sort();
    out.removals = removals;
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub fetched: usize,
    pub failed_sources: usize,
    pub added: usize,
    pub reactivated: usize,
    pub removed: usize,
    pub skipped: usize,
    pub duplicates: usize,
    /// Absent from the batch but owned by a source whose fetch failed. Left active.
    pub retained: usize,
    pub failed_mutations: usize,
    pub failed_audits: usize,
}

impl CycleReport {
    pub fn mutations(&self) -> usize {
        self.added + self.reactivated + self.removed
    }
}

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("cannot read active listings: {0}")]
    Baseline(#[source] StoreError),
    #[error("reconciliation task did not complete: {0}")]
    Aborted(#[from] tokio::task::JoinError),
}

type Clock = Box<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct Reconciler {
    providers: Vec<Box<dyn SourceProvider>>,
    store: Arc<dyn ListingStore>,
    clock: Clock,
    running: tokio::sync::Mutex<()>,
}

impl Reconciler {
    pub fn new(providers: Vec<Box<dyn SourceProvider>>, store: Arc<dyn ListingStore>) -> Self {
        Self {
            providers,
            store,
            clock: Box::new(Utc::now),
            running: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// One full fetch → diff → mutate pass. Cycles on the same reconciler
    /// never overlap. Store work runs on the blocking pool.
    pub async fn run_cycle(&self) -> Result<CycleReport, CycleError> {
        let _guard = self.running.lock().await;
        let at = (self.clock)();

        let batch = ingest::fetch_all(&self.providers).await;
        let store = Arc::clone(&self.store);
        let report =
            tokio::task::spawn_blocking(move || reconcile_batch(store.as_ref(), batch, at))
                .await??;

        gauge!("reconcile_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "reconcile",
            fetched = report.fetched,
            added = report.added,
            reactivated = report.reactivated,
            removed = report.removed,
            skipped = report.skipped,
            retained = report.retained,
            failed = report.failed_mutations,
            "cycle finished"
        );
        Ok(report)
    }
}

/// Diff `batch` against the store and apply the result. Blocking.
fn reconcile_batch(
    store: &dyn ListingStore,
    batch: Batch,
    at: DateTime<Utc>,
) -> Result<CycleReport, CycleError> {
    let mut report = CycleReport {
        fetched: batch.records.len(),
        failed_sources: batch.failed_sources.len(),
        ..CycleReport::default()
    };

    let active = store.active_identity_keys().map_err(|e| {
        tracing::error!(target: "reconcile", error = %e, "cannot read active listings, cycle aborted");
        counter!("reconcile_failures_total").increment(1);
        CycleError::Baseline(e)
    })?;

    let plan = plan(batch.records, &active, |key| store.find_id(key));
    report.skipped = plan.skipped;
    report.duplicates = plan.duplicates;
    report.failed_mutations = plan.lookup_failures;

    let failed: HashSet<&str> = batch.failed_sources.iter().copied().collect();
    Applier {
        store,
        at,
        report: &mut report,
    }
    .apply(plan, &failed);
    Ok(report)
}

struct Applier<'a> {
    store: &'a dyn ListingStore,
    at: DateTime<Utc>,
    report: &'a mut CycleReport,
}

impl Applier<'_> {
    /// Inserts and reactivations first, then deactivations. Listings owned by
    /// a source in `failed_sources` are never deactivated.
    fn apply(&mut self, plan: ReconcilePlan, failed_sources: &HashSet<&str>) {
        for rec in plan.inserts {
            match self.store.insert(&rec, self.at) {
                Ok(id) => {
                    self.report.added += 1;
                    counter!("reconcile_added_total").increment(1);
                    self.audit(ChangeKind::Added, Some(id), &rec.identity_key, rec.snapshot());
                }
                Err(e) => self.mutation_failed("insert", &rec.identity_key, &e),
            }
        }

        for (id, rec) in plan.reactivations {
            match self.store.reactivate(id, &rec, self.at) {
                Ok(()) => {
                    self.report.reactivated += 1;
                    counter!("reconcile_reactivated_total").increment(1);
                    self.audit(ChangeKind::Updated, Some(id), &rec.identity_key, rec.snapshot());
                }
                Err(e) => self.mutation_failed("reactivate", &rec.identity_key, &e),
            }
        }

        for key in plan.removals {
            self.remove(&key, failed_sources);
        }
    }

    fn remove(&mut self, key: &str, failed_sources: &HashSet<&str>) {
        let listing = match self.store.find_id(key) {
            Ok(Some(id)) => self.store.find_listing(id),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        let listing = match listing {
            Ok(Some(l)) => l,
            Ok(None) => {
                let e = StoreError::Schema(format!("active key {key} has no listing"));
                return self.mutation_failed("deactivate", key, &e);
            }
            Err(e) => return self.mutation_failed("deactivate", key, &e),
        };

        if failed_sources.contains(listing.record.source_name.as_str()) {
            tracing::debug!(
                target: "reconcile",
                %key,
                source = %listing.record.source_name,
                "source failed this cycle, listing kept active"
            );
            self.report.retained += 1;
            counter!("reconcile_retained_total").increment(1);
            return;
        }

        if let Err(e) = self.store.deactivate(listing.id, self.at) {
            return self.mutation_failed("deactivate", key, &e);
        }
        self.report.removed += 1;
        counter!("reconcile_removed_total").increment(1);
        // deactivate only touches lifecycle columns, so the pre-read fields are current.
        self.audit(ChangeKind::Removed, Some(listing.id), key, listing.record.snapshot());
    }

    fn audit(
        &mut self,
        kind: ChangeKind,
        listing_id: Option<ListingId>,
        key: &str,
        snapshot: FieldSnapshot,
    ) {
        let entry = ChangeLogEntry {
            listing_id,
            identity_key: key.to_string(),
            kind,
            event_time: self.at,
            snapshot,
        };
        if let Err(e) = self.store.append_change_log(&entry) {
            // The listing mutation stands; only the audit row is missing.
            tracing::warn!(target: "reconcile", %key, %kind, error = %e, "audit append failed");
            counter!("reconcile_failures_total").increment(1);
            self.report.failed_audits += 1;
        }
    }

    fn mutation_failed(&mut self, op: &str, key: &str, e: &StoreError) {
        tracing::warn!(target: "reconcile", op, %key, error = %e, "mutation failed");
        counter!("reconcile_failures_total").increment(1);
        self.report.failed_mutations += 1;
    }
}
