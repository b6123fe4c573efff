// src/ingest/providers/mod.rs
pub mod hh;
pub mod superjob;

use std::sync::Arc;

use crate::ingest::config::SyncConfig;
use crate::ingest::fetch::HttpFetcher;
use crate::ingest::types::SourceProvider;

/// Query parameters shared by all search sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSettings {
    pub search_text: String,
    pub page_size: u32,
    pub max_pages: u32,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            search_text: "java".to_string(),
            page_size: 100,
            max_pages: 20,
        }
    }
}

impl From<&SyncConfig> for SourceSettings {
    fn from(cfg: &SyncConfig) -> Self {
        Self {
            search_text: cfg.search_text.clone(),
            page_size: cfg.page_size,
            max_pages: cfg.max_pages,
        }
    }
}

/// Build providers in the order their keys appear in `cfg.sources`.
/// Unknown keys are logged and skipped.
pub fn build_providers(
    cfg: &SyncConfig,
    fetcher: Arc<dyn HttpFetcher>,
) -> Vec<Box<dyn SourceProvider>> {
    let settings = SourceSettings::from(cfg);
    let mut out: Vec<Box<dyn SourceProvider>> = Vec::new();
    for key in &cfg.sources {
        let built: anyhow::Result<Box<dyn SourceProvider>> =
            match key.trim().to_ascii_lowercase().as_str() {
                "hh" => {
                    let p = hh::HhProvider::new(fetcher.clone(), settings.clone());
                    match &cfg.hh_base_url {
                        Some(url) => p.with_base_url(url).map(|p| Box::new(p) as Box<dyn SourceProvider>),
                        None => Ok(Box::new(p)),
                    }
                }
                "superjob" => {
                    let p = superjob::SuperJobProvider::new(fetcher.clone(), settings.clone())
                        .with_app_id(cfg.superjob_app_id.clone());
                    match &cfg.superjob_base_url {
                        Some(url) => p.with_base_url(url).map(|p| Box::new(p) as Box<dyn SourceProvider>),
                        None => Ok(Box::new(p)),
                    }
                }
                other => {
                    tracing::warn!(target: "ingest", source = other, "unknown source key, ignored");
                    continue;
                }
            };
        match built {
            Ok(p) => out.push(p),
            Err(e) => {
                tracing::warn!(target: "ingest", source = %key, error = %e, "bad base url, source skipped")
            }
        }
    }
    out
}
