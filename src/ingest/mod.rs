// src/ingest/mod.rs
pub mod config;
pub mod fetch;
pub mod json;
pub mod normalize;
pub mod paginate;
pub mod providers;
pub mod scheduler;
pub mod types;

use crate::ingest::types::SourceProvider;
use crate::listing::CanonicalRecord;
use metrics::counter;

/// Records gathered from every provider for one cycle.
#[derive(Debug, Default)]
pub struct Batch {
    /// Provider registration order, then page order within a provider.
    pub records: Vec<CanonicalRecord>,
    /// Provenance names (`CanonicalRecord::source_name`) of providers whose
    /// fetch failed this cycle.
    pub failed_sources: Vec<&'static str>,
}

/// Run every provider once, in registration order. A failing provider is
/// logged and counted; the others still contribute.
pub async fn fetch_all(providers: &[Box<dyn SourceProvider>]) -> Batch {
    crate::metrics::ensure_described();

    let mut batch = Batch::default();
    for p in providers {
        match p.fetch().await {
            Ok(mut v) => {
                tracing::debug!(target: "ingest", provider = p.name(), records = v.len(), "provider done");
                batch.records.append(&mut v);
            }
            Err(e) => {
                tracing::warn!(target: "ingest", error = ?e, provider = p.name(), "provider error");
                counter!("ingest_provider_failures_total").increment(1);
                batch.failed_sources.push(e.source_name);
            }
        }
    }
    batch
}
