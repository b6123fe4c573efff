// tests/scheduler.rs
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use job_listing_sync::ingest::scheduler::{spawn_scheduler, SchedulerCfg};
use job_listing_sync::ingest::types::{FetchError, SourceProvider};
use job_listing_sync::store::{ListingStore, MemoryStore};
use job_listing_sync::{CanonicalRecord, Reconciler};

struct OneListing;

#[async_trait]
impl SourceProvider for OneListing {
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError> {
        Ok(vec![CanonicalRecord::new(
            "https://hh.ru/vacancy/1",
            "hh.ru",
            Utc::now(),
        )])
    }
    fn name(&self) -> &'static str {
        "one"
    }
}

#[tokio::test]
async fn first_tick_runs_a_cycle_immediately() {
    let store = Arc::new(MemoryStore::new());
    let dyn_store: Arc<dyn ListingStore> = store.clone();
    let providers: Vec<Box<dyn SourceProvider>> = vec![Box::new(OneListing)];
    let reconciler = Arc::new(Reconciler::new(providers, dyn_store));

    let handle = spawn_scheduler(SchedulerCfg { interval_secs: 3600 }, reconciler);
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.abort();

    assert_eq!(store.calls("insert"), 1);
    assert!(store.listing_by_key("https://hh.ru/vacancy/1").unwrap().is_active);
}

#[tokio::test]
async fn failed_cycle_keeps_the_loop_alive() {
    let store = Arc::new(MemoryStore::new());
    store.fail_on("active_identity_keys", None);
    let dyn_store: Arc<dyn ListingStore> = store.clone();
    let providers: Vec<Box<dyn SourceProvider>> = vec![Box::new(OneListing)];
    let reconciler = Arc::new(Reconciler::new(providers, dyn_store));

    let handle = spawn_scheduler(SchedulerCfg { interval_secs: 3600 }, reconciler);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!handle.is_finished());
    handle.abort();
    assert!(store.is_empty());
}
