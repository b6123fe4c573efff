// tests/metrics_cycle.rs
use std::sync::Arc;

use job_listing_sync::ingest::fetch::{FetchResponse, HttpFetcher, MockFetcher};
use job_listing_sync::ingest::providers::hh::HhProvider;
use job_listing_sync::ingest::providers::SourceSettings;
use job_listing_sync::ingest::types::SourceProvider;
use job_listing_sync::store::{ListingStore, MemoryStore};
use job_listing_sync::Reconciler;
use metrics_exporter_prometheus::PrometheusBuilder;

#[tokio::test]
async fn cycle_metrics_are_exposed() {
    // One recorder per process; this file holds the only test that installs it.
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let page = std::fs::read_to_string("tests/fixtures/hh_page.json").expect("fixture");
    let fetcher: Arc<dyn HttpFetcher> =
        Arc::new(MockFetcher::with_responses([FetchResponse::ok(page)]));
    let down: Arc<dyn HttpFetcher> = Arc::new(MockFetcher::with_responses([
        FetchResponse::status(503, "<html>Service Unavailable</html>"),
    ]));
    let providers: Vec<Box<dyn SourceProvider>> = vec![
        Box::new(HhProvider::new(fetcher, SourceSettings::default())),
        Box::new(HhProvider::new(down, SourceSettings::default())),
    ];
    let store: Arc<dyn ListingStore> = Arc::new(MemoryStore::new());
    let report = Reconciler::new(providers, store).run_cycle().await.unwrap();
    assert_eq!(report.added, 3);
    assert_eq!(report.failed_sources, 1);

    let out = handle.render();
    assert!(out.contains("ingest_pages_total"));
    assert!(out.contains("ingest_records_total"));
    assert!(out.contains("ingest_mapping_errors_total"));
    assert!(out.contains("ingest_fetch_ms"));
    // Per page request vs. per provider.
    assert!(out.contains("ingest_provider_errors_total"));
    assert!(out.contains("ingest_provider_failures_total"));
    assert!(out.contains("reconcile_added_total"));
    assert!(out.contains("reconcile_last_run_ts"));
}
