// tests/reconcile_cycle.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use job_listing_sync::ingest::fetch::{FetchResponse, HttpFetcher, MockFetcher};
use job_listing_sync::ingest::providers::hh::HhProvider;
use job_listing_sync::ingest::providers::SourceSettings;
use job_listing_sync::ingest::types::{FetchError, SourceProvider, TransportError};
use job_listing_sync::store::{ListingQuery, ListingStore, MemoryStore};
use job_listing_sync::{CanonicalRecord, ChangeKind, Reconciler};

/// Serves whatever records the test put in `records` at fetch time.
struct ScriptedProvider {
    name: &'static str,
    records: Arc<Mutex<Vec<CanonicalRecord>>>,
}

#[async_trait]
impl SourceProvider for ScriptedProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError> {
        Ok(self.records.lock().unwrap().clone())
    }
    fn name(&self) -> &'static str {
        self.name
    }
}

struct DownProvider;

#[async_trait]
impl SourceProvider for DownProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError> {
        Err(FetchError {
            source_name: "down.example",
            page: 0,
            cause: TransportError {
                url: "https://down.example/api".into(),
                message: "connection refused".into(),
            }
            .into(),
        })
    }
    fn name(&self) -> &'static str {
        "down"
    }
}

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 3, 20, 12, 0, 0).unwrap()
}

fn rec(key: &str) -> CanonicalRecord {
    let mut r = CanonicalRecord::new(key, "test.example", t0());
    r.title = Some(format!("Title {key}"));
    r
}

fn recs(keys: &[&str]) -> Vec<CanonicalRecord> {
    keys.iter().map(|k| rec(k)).collect()
}

struct Harness {
    store: Arc<MemoryStore>,
    feed: Arc<Mutex<Vec<CanonicalRecord>>>,
    reconciler: Reconciler,
}

fn harness(initial: Vec<CanonicalRecord>) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let feed = Arc::new(Mutex::new(initial));
    let providers: Vec<Box<dyn SourceProvider>> = vec![Box::new(ScriptedProvider {
        name: "scripted",
        records: feed.clone(),
    })];
    let dyn_store: Arc<dyn ListingStore> = store.clone();
    let reconciler = Reconciler::new(providers, dyn_store).with_clock(t0);
    Harness {
        store,
        feed,
        reconciler,
    }
}

fn kinds(store: &MemoryStore, key: &str) -> Vec<ChangeKind> {
    store
        .change_log(Some(key))
        .unwrap()
        .into_iter()
        .map(|c| c.kind)
        .collect()
}

#[tokio::test]
async fn new_keys_get_one_insert_and_one_added_entry_each() {
    let h = harness(recs(&["A", "B", "C"]));
    let report = h.reconciler.run_cycle().await.unwrap();

    assert_eq!(report.fetched, 3);
    assert_eq!(report.added, 3);
    assert_eq!(h.store.calls("insert"), 3);
    for key in ["A", "B", "C"] {
        assert_eq!(kinds(&h.store, key), vec![ChangeKind::Added]);
        let l = h.store.listing_by_key(key).unwrap();
        assert!(l.is_active);
        assert_eq!(l.created_at, t0());
    }
    let entry = &h.store.change_log(Some("A")).unwrap()[0];
    assert_eq!(entry.event_time, t0());
    assert_eq!(entry.snapshot.title.as_deref(), Some("Title A"));
}

#[tokio::test]
async fn second_cycle_with_unchanged_source_mutates_nothing() {
    let h = harness(recs(&["A", "B"]));
    h.reconciler.run_cycle().await.unwrap();
    h.store.reset_calls();

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.mutations(), 0);
    assert_eq!(report.skipped, 2);
    assert_eq!(h.store.calls("insert"), 0);
    assert_eq!(h.store.calls("reactivate"), 0);
    assert_eq!(h.store.calls("deactivate"), 0);
    assert_eq!(h.store.calls("append_change_log"), 0);
    assert_eq!(h.store.change_log(None).unwrap().len(), 2);
}

#[tokio::test]
async fn vanished_key_is_deactivated_once_with_removed_snapshot() {
    let h = harness(recs(&["B"]));
    h.store.seed(rec("A"), true, t0() - chrono::Duration::days(3));

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(h.store.calls("deactivate"), 1);
    assert_eq!(h.store.calls("reactivate"), 0);

    let a = h.store.listing_by_key("A").unwrap();
    assert!(!a.is_active);
    assert_eq!(a.closed_at, Some(t0()));

    let log = h.store.change_log(Some("A")).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, ChangeKind::Removed);
    assert_eq!(log[0].listing_id, Some(a.id));
    assert_eq!(log[0].snapshot.title.as_deref(), Some("Title A"));

    // Already inactive: not removed again.
    h.store.reset_calls();
    h.reconciler.run_cycle().await.unwrap();
    assert_eq!(h.store.calls("deactivate"), 0);
}

#[tokio::test]
async fn reappearing_key_is_reactivated_with_fresh_fields() {
    let created = t0() - chrono::Duration::days(30);
    let mut fresh = rec("Z");
    fresh.title = Some("Senior Z".into());
    fresh.compensation_max = Some(500_000);
    let h = harness(vec![fresh]);
    let id = h.store.seed(rec("Z"), false, created);

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.reactivated, 1);
    assert_eq!(report.added, 0);
    assert_eq!(h.store.calls("reactivate"), 1);
    assert_eq!(h.store.calls("insert"), 0);

    let z = h.store.listing_by_key("Z").unwrap();
    assert_eq!(z.id, id);
    assert!(z.is_active);
    assert_eq!(z.closed_at, None);
    assert_eq!(z.created_at, created);
    assert_eq!(z.record.title.as_deref(), Some("Senior Z"));
    assert_eq!(z.record.compensation_max, Some(500_000));

    let log = h.store.change_log(Some("Z")).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, ChangeKind::Updated);
    assert_eq!(log[0].snapshot.title.as_deref(), Some("Senior Z"));
}

#[tokio::test]
async fn duplicate_key_in_one_batch_is_inserted_once() {
    let h = harness(recs(&["C", "C"]));
    let report = h.reconciler.run_cycle().await.unwrap();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.added, 1);
    assert_eq!(report.duplicates, 1);
    assert_eq!(report.failed_mutations, 0);
    assert_eq!(h.store.calls("insert"), 1);
    assert_eq!(kinds(&h.store, "C"), vec![ChangeKind::Added]);
}

#[tokio::test]
async fn active_ab_fetched_bc() {
    let h = harness(recs(&["B", "C"]));
    h.store.seed(rec("A"), true, t0());
    h.store.seed(rec("B"), true, t0());

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.removed, 1);
    assert_eq!(report.skipped, 1);

    assert!(kinds(&h.store, "B").is_empty());
    assert_eq!(kinds(&h.store, "C"), vec![ChangeKind::Added]);
    assert_eq!(kinds(&h.store, "A"), vec![ChangeKind::Removed]);
    assert!(h.store.listing_by_key("B").unwrap().is_active);
    assert!(!h.store.listing_by_key("A").unwrap().is_active);

    // Inserts are applied before deactivations.
    let order: Vec<_> = h
        .store
        .change_log(None)
        .unwrap()
        .into_iter()
        .map(|c| c.identity_key)
        .collect();
    assert_eq!(order, vec!["C".to_string(), "A".to_string()]);
}

#[tokio::test]
async fn store_failure_on_one_record_does_not_stop_the_rest() {
    let h = harness(recs(&["K1", "K2", "K3"]));
    h.store.fail_on("insert", Some("K2"));

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.added, 2);
    assert_eq!(report.failed_mutations, 1);
    assert!(h.store.listing_by_key("K1").is_some());
    assert!(h.store.listing_by_key("K2").is_none());
    assert!(h.store.listing_by_key("K3").is_some());
    assert!(kinds(&h.store, "K2").is_empty());

    // Next cycle picks it up.
    h.store.clear_failures();
    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(kinds(&h.store, "K2"), vec![ChangeKind::Added]);
}

#[tokio::test]
async fn failed_audit_append_keeps_the_mutation() {
    let h = harness(recs(&["A"]));
    h.store.fail_on("append_change_log", None);

    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.added, 1);
    assert_eq!(report.failed_audits, 1);
    assert!(h.store.listing_by_key("A").unwrap().is_active);
    assert!(h.store.change_log(None).unwrap().is_empty());
}

#[tokio::test]
async fn unreadable_active_set_aborts_before_any_mutation() {
    let h = harness(recs(&["N"]));
    h.store.seed(rec("OLD"), true, t0());
    h.store.fail_on("active_identity_keys", None);

    let err = h.reconciler.run_cycle().await.unwrap_err();
    assert!(err.to_string().contains("active_identity_keys"));
    assert_eq!(h.store.calls("insert"), 0);
    assert_eq!(h.store.calls("deactivate"), 0);
    assert_eq!(h.store.calls("append_change_log"), 0);
    assert!(h.store.listing_by_key("OLD").unwrap().is_active);
}

#[tokio::test]
async fn failing_source_does_not_block_the_others() {
    let store = Arc::new(MemoryStore::new());
    let feed = Arc::new(Mutex::new(recs(&["X", "Y"])));
    let providers: Vec<Box<dyn SourceProvider>> = vec![
        Box::new(DownProvider),
        Box::new(ScriptedProvider {
            name: "scripted",
            records: feed,
        }),
    ];
    let dyn_store: Arc<dyn ListingStore> = store.clone();
    let reconciler = Reconciler::new(providers, dyn_store).with_clock(t0);

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.failed_sources, 1);
    assert_eq!(report.added, 2);
    assert!(store.listing_by_key("X").is_some());
    assert!(store.listing_by_key("Y").is_some());
}

#[tokio::test]
async fn feed_changes_between_cycles_are_tracked() {
    let h = harness(recs(&["A", "B"]));
    h.reconciler.run_cycle().await.unwrap();

    *h.feed.lock().unwrap() = recs(&["B"]);
    h.reconciler.run_cycle().await.unwrap();

    *h.feed.lock().unwrap() = recs(&["A", "B"]);
    let report = h.reconciler.run_cycle().await.unwrap();
    assert_eq!(report.reactivated, 1);

    assert_eq!(
        kinds(&h.store, "A"),
        vec![ChangeKind::Added, ChangeKind::Removed, ChangeKind::Updated]
    );
    assert_eq!(kinds(&h.store, "B"), vec![ChangeKind::Added]);
    let active: Vec<_> = h
        .store
        .active_listings(&ListingQuery::default())
        .unwrap()
        .into_iter()
        .map(|l| l.record.identity_key)
        .collect();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn outage_of_a_source_keeps_its_listings_active() {
    let store = Arc::new(MemoryStore::new());
    for n in 1..=3 {
        let r = CanonicalRecord::new(format!("https://hh.ru/vacancy/{n}"), "hh.ru", t0());
        store.seed(r, true, t0());
    }
    store.seed(rec("elsewhere"), true, t0());

    let fetcher: Arc<dyn HttpFetcher> = Arc::new(MockFetcher::with_responses([
        FetchResponse::status(503, "<html>down</html>"),
    ]));
    let providers: Vec<Box<dyn SourceProvider>> =
        vec![Box::new(HhProvider::new(fetcher, SourceSettings::default()))];
    let dyn_store: Arc<dyn ListingStore> = store.clone();
    let reconciler = Reconciler::new(providers, dyn_store).with_clock(t0);

    let report = reconciler.run_cycle().await.unwrap();
    assert_eq!(report.failed_sources, 1);
    assert_eq!(report.retained, 3);
    // Owned by a source that did not fail, so it still goes.
    assert_eq!(report.removed, 1);
    assert_eq!(store.calls("deactivate"), 1);
    for n in 1..=3 {
        let l = store.listing_by_key(&format!("https://hh.ru/vacancy/{n}")).unwrap();
        assert!(l.is_active);
    }
    let log = store.change_log(None).unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].identity_key, "elsewhere");
}

#[tokio::test]
async fn slow_store_does_not_stall_the_runtime() {
    let h = harness(recs(&["A", "B", "C"]));
    h.store.set_latency(Duration::from_millis(20));

    let ticks = Arc::new(AtomicUsize::new(0));
    let counter = ticks.clone();
    let ticker = tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_millis(5)).await;
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let report = h.reconciler.run_cycle().await.unwrap();
    ticker.abort();
    assert_eq!(report.added, 3);
    // About ten store calls at 20ms each; the ticker kept running meanwhile.
    assert!(ticks.load(Ordering::SeqCst) >= 10, "ticks = {}", ticks.load(Ordering::SeqCst));
}
