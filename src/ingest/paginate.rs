// src/ingest/paginate.rs
//! The page loop shared by every JSON search source.
//!
//! Termination, in order of precedence:
//! 1. a client-error status other than 401 (the sources answer 400 past the last page);
//! 2. an absent or empty item collection;
//! 3. a short page (fewer items than requested);
//! 4. the configured page cap.
//!
//! A transport error or a body that is not JSON aborts the whole fetch with a
//! [`FetchError`]; a source outage must never look like an empty result.

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use serde_json::Value;

use crate::ingest::fetch::HttpFetcher;
use crate::ingest::json::items_at;
use crate::ingest::types::{FetchError, MappingError};
use crate::listing::CanonicalRecord;

/// Per-source knowledge the page loop needs.
pub trait PagedSource: Send + Sync {
    fn source_name(&self) -> &'static str;
    fn page_size(&self) -> u32;
    fn max_pages(&self) -> u32;
    fn page_url(&self, page: u32) -> String;
    fn headers(&self) -> Vec<(String, String)> {
        Vec::new()
    }
    /// Key of the item array in a page body.
    fn items_key(&self) -> &'static str;
    /// Map one item. `now` is the fallback publish time.
    fn map_item(&self, item: &Value, now: DateTime<Utc>) -> Result<CanonicalRecord, MappingError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStatus {
    Ok,
    /// Logged, body still inspected.
    Degraded,
    EndOfResults,
}

pub fn classify_status(status: u16) -> PageStatus {
    match status {
        200..=299 => PageStatus::Ok,
        401 => PageStatus::Degraded,
        400..=499 => PageStatus::EndOfResults,
        _ => PageStatus::Degraded,
    }
}

pub async fn fetch_all_pages<S>(
    source: &S,
    fetcher: &dyn HttpFetcher,
) -> Result<Vec<CanonicalRecord>, FetchError>
where
    S: PagedSource + ?Sized,
{
    let name = source.source_name();
    let page_size = source.page_size().max(1) as usize;
    let headers = source.headers();
    let mut out = Vec::new();
    let mut requests = 0u32;

    let mut page = 0u32;
    loop {
        if page >= source.max_pages() {
            tracing::warn!(target: "ingest", source = name, page, "page cap reached, stopping");
            break;
        }

        let url = source.page_url(page);
        let t0 = std::time::Instant::now();
        let resp = match fetcher.get(&url, &headers).await {
            Ok(r) => r,
            Err(cause) => {
                tracing::warn!(target: "ingest", source = name, page, error = %cause, "page request failed");
                counter!("ingest_provider_errors_total").increment(1);
                return Err(FetchError {
                    source_name: name,
                    page,
                    cause: cause.into(),
                });
            }
        };
        requests += 1;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        counter!("ingest_pages_total").increment(1);

        match classify_status(resp.status) {
            PageStatus::EndOfResults => {
                tracing::debug!(target: "ingest", source = name, page, status = resp.status, "end of results");
                break;
            }
            PageStatus::Degraded => {
                tracing::warn!(target: "ingest", source = name, page, status = resp.status, "non-success response");
            }
            PageStatus::Ok => {}
        }

        let root: Value = match serde_json::from_str(&resp.body) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    target: "ingest",
                    source = name,
                    page,
                    status = resp.status,
                    error = %e,
                    "unparseable page body"
                );
                counter!("ingest_provider_errors_total").increment(1);
                return Err(FetchError {
                    source_name: name,
                    page,
                    cause: e.into(),
                });
            }
        };
        let items = match items_at(&root, source.items_key()) {
            Some(items) if !items.is_empty() => items,
            _ => break,
        };

        let now = Utc::now();
        let mut mapped = 0usize;
        for item in items {
            match source.map_item(item, now) {
                Ok(rec) => {
                    out.push(rec);
                    mapped += 1;
                }
                Err(e) => {
                    tracing::warn!(target: "ingest", source = name, page, error = %e, "skipping item");
                    counter!("ingest_mapping_errors_total").increment(1);
                }
            }
        }
        counter!("ingest_records_total").increment(mapped as u64);

        if items.len() < page_size {
            break;
        }
        page += 1;
    }

    tracing::info!(target: "ingest", source = name, requests, records = out.len(), "source fetched");
    Ok(out)
}
