use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;

/// One-time metrics registration (so series show up before the first cycle).
pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_pages_total", "Source pages requested successfully.");
        describe_counter!("ingest_records_total", "Records mapped from source pages.");
        describe_counter!(
            "ingest_mapping_errors_total",
            "Items skipped because they could not be mapped."
        );
        describe_counter!(
            "ingest_provider_errors_total",
            "Page requests that failed in transport or returned an unparseable body."
        );
        describe_counter!(
            "ingest_provider_failures_total",
            "Providers whose fetch was aborted for a cycle."
        );
        describe_histogram!("ingest_fetch_ms", "Page request time in milliseconds.");
        describe_counter!("reconcile_added_total", "Listings inserted.");
        describe_counter!("reconcile_reactivated_total", "Listings reactivated.");
        describe_counter!("reconcile_removed_total", "Listings deactivated.");
        describe_counter!(
            "reconcile_retained_total",
            "Listings kept active because their source failed this cycle."
        );
        describe_counter!(
            "reconcile_failures_total",
            "Store mutations or audit appends that failed."
        );
        describe_gauge!(
            "reconcile_last_run_ts",
            "Unix ts when the last reconciliation cycle finished."
        );
    });
}

/// Install the Prometheus recorder with its own HTTP listener on `addr`.
pub fn install_prometheus(addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr.parse()?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;
    ensure_described();
    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}
