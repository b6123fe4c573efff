// src/ingest/providers/hh.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Url;
use serde_json::Value;

use crate::ingest::fetch::HttpFetcher;
use crate::ingest::json::{int_at, join_present, text_at};
use crate::ingest::normalize::{normalize_opt, parse_timestamp, positive};
use crate::ingest::paginate::{fetch_all_pages, PagedSource};
use crate::ingest::providers::SourceSettings;
use crate::ingest::types::{FetchError, MappingError, SourceProvider};
use crate::listing::CanonicalRecord;

pub const SOURCE_NAME: &str = "hh.ru";
pub const BASE_URL: &str = "https://api.hh.ru/vacancies";

/// hh.ru public vacancy search.
pub struct HhProvider {
    fetcher: Arc<dyn HttpFetcher>,
    base: Url,
    settings: SourceSettings,
}

impl HhProvider {
    pub fn new(fetcher: Arc<dyn HttpFetcher>, settings: SourceSettings) -> Self {
        let base = Url::parse(BASE_URL).expect("hh base url is valid");
        Self {
            fetcher,
            base,
            settings,
        }
    }

    /// Point the provider at another endpoint (mirrors, test servers).
    pub fn with_base_url(mut self, base: &str) -> anyhow::Result<Self> {
        self.base = Url::parse(base)?;
        Ok(self)
    }
}

impl PagedSource for HhProvider {
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
            .append_pair("text", &self.settings.search_text)
            .append_pair("per_page", &self.settings.page_size.to_string())
            .append_pair("page", &page.to_string());
        url.into()
    }

    fn items_key(&self) -> &'static str {
        "items"
    }

    fn map_item(&self, item: &Value, now: DateTime<Utc>) -> Result<CanonicalRecord, MappingError> {
        map_vacancy(item, now)
    }
}

pub fn map_vacancy(item: &Value, now: DateTime<Utc>) -> Result<CanonicalRecord, MappingError> {
    if !item.is_object() {
        return Err(MappingError::NotAnObject);
    }
    let url = text_at(item, &["alternate_url"])
        .filter(|s| !s.trim().is_empty())
        .ok_or(MappingError::MissingIdentity("alternate_url"))?;

    let published_at = text_at(item, &["published_at"])
        .as_deref()
        .and_then(parse_timestamp)
        .unwrap_or(now);

    let mut rec = CanonicalRecord::new(url, SOURCE_NAME, published_at);
    rec.title = normalize_opt(text_at(item, &["name"]));
    rec.organization = text_at(item, &["employer", "name"]);
    rec.location = text_at(item, &["area", "name"]);
    rec.compensation_min = positive(int_at(item, &["salary", "from"]));
    rec.compensation_max = positive(int_at(item, &["salary", "to"]));
    rec.currency = text_at(item, &["salary", "currency"]);
    rec.schedule = text_at(item, &["schedule", "name"]);
    rec.description = normalize_opt(text_at(item, &["description"]));
    rec.requirements = join_present(
        [
            normalize_opt(text_at(item, &["snippet", "requirement"])),
            normalize_opt(text_at(item, &["snippet", "responsibility"])),
        ],
        " | ",
    );
    Ok(rec)
}

#[async_trait]
impl SourceProvider for HhProvider {
    async fn fetch(&self) -> Result<Vec<CanonicalRecord>, FetchError> {
        fetch_all_pages(self, self.fetcher.as_ref()).await
    }

    fn name(&self) -> &'static str {
        "hh"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::fetch::MockFetcher;
    use serde_json::json;

    fn provider() -> HhProvider {
        HhProvider::new(Arc::new(MockFetcher::new()), SourceSettings::default())
    }

    #[test]
    fn page_url_carries_query() {
        let url = provider().page_url(3);
        assert!(url.starts_with("https://api.hh.ru/vacancies?"));
        assert!(url.contains("text=java"));
        assert!(url.contains("per_page=100"));
        assert!(url.ends_with("page=3"));
    }

    #[test]
    fn maps_full_item() {
        let now = Utc::now();
        let item = json!({
            "name": "Java Developer",
            "employer": {"name": "Test Company"},
            "area": {"name": "Moscow"},
            "salary": {"from": 100000, "to": 150000, "currency": "RUR"},
            "snippet": {"requirement": "Spring <highlighttext>Java</highlighttext>", "responsibility": "Code"},
            "alternate_url": "https://hh.ru/vacancy/123",
            "published_at": "2024-03-20T10:00:00+0300",
            "schedule": {"id": "remote", "name": "Удаленная работа"}
        });
        let r = map_vacancy(&item, now).unwrap();
        assert_eq!(r.identity_key, "https://hh.ru/vacancy/123");
        assert_eq!(r.source_ref, r.identity_key);
        assert_eq!(r.source_name, "hh.ru");
        assert_eq!(r.organization.as_deref(), Some("Test Company"));
        assert_eq!(r.compensation_min, Some(100_000));
        assert_eq!(r.compensation_max, Some(150_000));
        assert_eq!(r.requirements.as_deref(), Some("Spring Java | Code"));
        assert_eq!(r.schedule.as_deref(), Some("Удаленная работа"));
        assert_ne!(r.published_at, now);
    }

    #[test]
    fn missing_salary_and_date_are_tolerated() {
        let now = Utc::now();
        let item = json!({"name": "QA", "salary": null, "alternate_url": "https://hh.ru/vacancy/9"});
        let r = map_vacancy(&item, now).unwrap();
        assert!(r.compensation_unspecified());
        assert_eq!(r.currency, None);
        assert_eq!(r.published_at, now);
        assert_eq!(r.requirements, None);
    }

    #[test]
    fn item_without_url_is_a_mapping_error() {
        let err = map_vacancy(&json!({"name": "x"}), Utc::now()).unwrap_err();
        assert!(matches!(err, MappingError::MissingIdentity("alternate_url")));
        assert!(matches!(
            map_vacancy(&json!("str"), Utc::now()),
            Err(MappingError::NotAnObject)
        ));
    }
}
