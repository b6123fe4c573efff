// src/store/memory.rs
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use super::{ListingQuery, ListingStore, LocationStats, StoreError};
use crate::listing::{CanonicalRecord, ChangeLogEntry, ListingId, PersistedListing};

/// In-process store for tests and dry runs.
///
/// Counts every mutating call per operation name ("insert", "reactivate",
/// "deactivate", "append_change_log") and can be told to fail an operation,
/// either always or only for one identity key. An optional per-call latency
/// stands in for a slow disk.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    listings: Vec<PersistedListing>,
    by_key: HashMap<String, ListingId>,
    changes: Vec<ChangeLogEntry>,
    calls: HashMap<&'static str, usize>,
    failures: Vec<(&'static str, Option<String>)>,
    latency: Duration,
}

impl Inner {
    fn check(&self, op: &'static str, key: Option<&str>) -> Result<(), StoreError> {
        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }
        let hit = self.failures.iter().any(|(o, k)| {
            *o == op
                && match k {
                    None => true,
                    Some(k) => key == Some(k.as_str()),
                }
        });
        if hit {
            Err(StoreError::Injected(op))
        } else {
            Ok(())
        }
    }

    fn listing_mut(&mut self, id: ListingId) -> Result<&mut PersistedListing, StoreError> {
        let idx = usize::try_from(id - 1).map_err(|_| StoreError::NotFound(id))?;
        self.listings.get_mut(idx).ok_or(StoreError::NotFound(id))
    }

    fn key_of(&self, id: ListingId) -> Option<String> {
        let idx = usize::try_from(id - 1).ok()?;
        self.listings.get(idx).map(|l| l.record.identity_key.clone())
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned test store is still readable.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a listing directly, bypassing call counters and the audit log.
    pub fn seed(&self, record: CanonicalRecord, is_active: bool, at: DateTime<Utc>) -> ListingId {
        let mut g = self.lock();
        let id = g.listings.len() as ListingId + 1;
        g.by_key.insert(record.identity_key.clone(), id);
        g.listings.push(PersistedListing {
            id,
            record,
            is_active,
            closed_at: if is_active { None } else { Some(at) },
            created_at: at,
        });
        id
    }

    /// Make `op` fail for every call (`key = None`) or for one identity key.
    pub fn fail_on(&self, op: &'static str, key: Option<&str>) {
        self.lock().failures.push((op, key.map(str::to_string)));
    }

    /// Block every checked call for `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    pub fn clear_failures(&self) {
        self.lock().failures.clear();
    }

    pub fn calls(&self, op: &str) -> usize {
        self.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        self.lock().calls.clear();
    }

    pub fn listing_by_key(&self, key: &str) -> Option<PersistedListing> {
        let g = self.lock();
        let id = *g.by_key.get(key)?;
        g.listings.get((id - 1) as usize).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ListingStore for MemoryStore {
    fn active_identity_keys(&self) -> Result<HashSet<String>, StoreError> {
        let g = self.lock();
        g.check("active_identity_keys", None)?;
        Ok(g
            .listings
            .iter()
            .filter(|l| l.is_active)
            .map(|l| l.record.identity_key.clone())
            .collect())
    }

    fn find_id(&self, identity_key: &str) -> Result<Option<ListingId>, StoreError> {
        let g = self.lock();
        g.check("find_id", Some(identity_key))?;
        Ok(g.by_key.get(identity_key).copied())
    }

    fn find_listing(&self, id: ListingId) -> Result<Option<PersistedListing>, StoreError> {
        let g = self.lock();
        g.check("find_listing", g.key_of(id).as_deref())?;
        let Ok(idx) = usize::try_from(id - 1) else {
            return Ok(None);
        };
        Ok(g.listings.get(idx).cloned())
    }

    fn insert(&self, record: &CanonicalRecord, at: DateTime<Utc>) -> Result<ListingId, StoreError> {
        let mut g = self.lock();
        *g.calls.entry("insert").or_default() += 1;
        g.check("insert", Some(record.identity_key.as_str()))?;
        if g.by_key.contains_key(&record.identity_key) {
            return Err(StoreError::Duplicate(record.identity_key.clone()));
        }
        let id = g.listings.len() as ListingId + 1;
        g.by_key.insert(record.identity_key.clone(), id);
        g.listings.push(PersistedListing {
            id,
            record: record.clone(),
            is_active: true,
            closed_at: None,
            created_at: at,
        });
        Ok(id)
    }

    fn reactivate(
        &self,
        id: ListingId,
        record: &CanonicalRecord,
        _at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut g = self.lock();
        *g.calls.entry("reactivate").or_default() += 1;
        g.check("reactivate", Some(record.identity_key.as_str()))?;
        let l = g.listing_mut(id)?;
        l.record = record.clone();
        l.is_active = true;
        l.closed_at = None;
        Ok(())
    }

    fn deactivate(&self, id: ListingId, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut g = self.lock();
        *g.calls.entry("deactivate").or_default() += 1;
        let key = g.key_of(id);
        g.check("deactivate", key.as_deref())?;
        let l = g.listing_mut(id)?;
        l.is_active = false;
        l.closed_at = Some(at);
        Ok(())
    }

    fn append_change_log(&self, entry: &ChangeLogEntry) -> Result<(), StoreError> {
        let mut g = self.lock();
        *g.calls.entry("append_change_log").or_default() += 1;
        g.check("append_change_log", Some(entry.identity_key.as_str()))?;
        g.changes.push(entry.clone());
        Ok(())
    }

    fn change_log(&self, identity_key: Option<&str>) -> Result<Vec<ChangeLogEntry>, StoreError> {
        let g = self.lock();
        Ok(g
            .changes
            .iter()
            .filter(|c| identity_key.map_or(true, |k| c.identity_key == k))
            .cloned()
            .collect())
    }

    fn active_listings(&self, query: &ListingQuery) -> Result<Vec<PersistedListing>, StoreError> {
        let g = self.lock();
        let mut out: Vec<_> = g
            .listings
            .iter()
            .filter(|l| l.is_active && query.matches(&l.record))
            .cloned()
            .collect();
        out.sort_by(|a, b| query.sort.compare(a, b));
        Ok(out)
    }

    fn stats_by_location(&self) -> Result<Vec<LocationStats>, StoreError> {
        fn mean(v: &[i64]) -> Option<f64> {
            (!v.is_empty()).then(|| v.iter().sum::<i64>() as f64 / v.len() as f64)
        }

        let g = self.lock();
        let mut groups: HashMap<Option<String>, (usize, Vec<i64>, Vec<i64>)> = HashMap::new();
        for l in g.listings.iter().filter(|l| l.is_active) {
            let e = groups.entry(l.record.location.clone()).or_default();
            e.0 += 1;
            e.1.extend(l.record.compensation_min);
            e.2.extend(l.record.compensation_max);
        }
        let mut out: Vec<_> = groups
            .into_iter()
            .map(|(location, (count, mins, maxs))| LocationStats {
                location,
                count,
                avg_compensation_min: mean(&mins),
                avg_compensation_max: mean(&maxs),
            })
            .collect();
        out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.location.cmp(&b.location)));
        Ok(out)
    }
}
