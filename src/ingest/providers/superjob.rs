// src/ingest/providers/superjob.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;

use crate::ingest::fetch::HttpFetcher;
use crate::ingest::json::{int_at, text_at, value_at};
use crate::ingest::normalize::{from_unix, normalize_opt, parse_timestamp, positive};
use crate::ingest::paginate::{fetch_all_pages, PagedSource};
use crate::ingest::providers::SourceSettings;
use crate::ingest::types::{FetchError, MappingError, SourceProvider};
use crate::listing::CanonicalRecord;

pub const SOURCE_NAME: &str = "superjob.ru";
pub const BASE_URL: &str = "https://api.superjob.ru/2.0/vacancies/";
const APP_ID_HEADER: &str = "X-Api-App-Id";

/// superjob.ru vacancy search (API 2.0).
pub struct SuperJobProvider {
    fetcher: Arc<dyn HttpFetcher>,
    base: Url,
    settings: SourceSettings,
    app_id: Option<String>,
}

impl SuperJobProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, settings: SourceSettings) -> Self {
        let base = Url::parse(BASE_URL).expect("superjob base url is valid");
        Self {
            fetcher,
            base,
            settings,
            app_id: None,
        }
    }

    pub fn with_app_id(mut self, app_id: Option<String>) -> Self {
        self.app_id = app_id.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn with_base_url(mut self, base: &str) -> anyhow::Result<Self> {
        self.base = Url::parse(base)?;
        Ok(self)
    }
}

impl PagedSource for SuperJobProvider {
    fn source_name(&self) -> &'static str {
        SOURCE_NAME
    }

    fn page_size(&self) -> u32 {
        self.settings.page_size
    }

    fn max_pages(&self) -> u32 {
        self.settings.max_pages
    }

    fn page_url(&self, page: u32) -> String {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair("keyword", &self.settings.search_text)
            .append_pair("count", &self.settings.page_size.to_string())
            .append_pair("page", &page.to_string());
        url.into()
    }

    fn headers(&self) -> Vec<(String, String)> {
        match &self.app_id {
            Some(id) => vec![(APP_ID_HEADER.to_string(), id.clone())],
            None => Vec::new(),
        }
    }

    fn items_key(&self) -> &'static str {
        "objects"
    }

    fn map_item(&self, item: &Value, now: DateTime<Utc>) -> Result<CanonicalRecord, MappingError> {
        map_vacancy(item, now)
    }
}

/// `date_published` is unix seconds in API 2.0; older payloads carry an ISO string.
fn published_at(item: &Value) -> Option<DateTime<Utc>> {
    match value_at(item, &["date_published"])? {
        Value::Number(n) => n.as_i64().and_then(from_unix),
        Value::String(s) => parse_timestamp(s).or_else(|| s.trim().parse().ok().and_then(from_unix)),
        _ => None,
    }
}

pub fn map_vacancy(item: &Value, now: DateTime<Utc>) -> Result<CanonicalRecord, MappingError> {
    if !item.is_object() {
        return Err(MappingError::NotAnObject);
    }
    let link = text_at(item, &["link"])
        .filter(|s| !s.trim().is_empty())
        .ok_or(MappingError::MissingIdentity("link"))?;

    let mut rec = CanonicalRecord::new(link, SOURCE_NAME, published_at(item).unwrap_or(now));
    rec.title = normalize_opt(text_at(item, &["profession"]));
    rec.organization = text_at(item, &["client", "title"]).or_else(|| text_at(item, &["firm_name"]));
    rec.location = text_at(item, &["town", "title"]);
    rec.compensation_min = positive(
        int_at(item, &["payment_from"]).or_else(|| int_at(item, &["payment", "from"])),
    );
    rec.compensation_max = positive(
        int_at(item, &["payment_to"]).or_else(|| int_at(item, &["payment", "to"])),
    );
    rec.currency = text_at(item, &["currency"]).or_else(|| text_at(item, &["payment", "currency"]));
    rec.schedule = text_at(item, &["type_of_work", "title"]);
    rec.description = normalize_opt(text_at(item, &["vacancyRichText"]));
    rec.requirements = normalize_opt(text_at(item, &["candidat"]));
    Ok(rec)
}

#[async_trait]
impl SourceProvider for SuperJobProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError> {
        fetch_all_pages(self, self.fetcher.as_ref()).await
    }

    fn name(&self) -> &'static str {
        "superjob"
    }
}
