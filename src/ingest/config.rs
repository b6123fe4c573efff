// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const ENV_CONFIG_PATH: &str = "JOB_SYNC_CONFIG_PATH";
const ENV_SUPERJOB_APP_ID: &str = "SUPERJOB_APP_ID";

fn default_sources() -> Vec<String> {
    vec!["hh".to_string(), "superjob".to_string()]
}
fn default_search_text() -> String {
    "java".to_string()
}
fn default_page_size() -> u32 {
    100
}
fn default_max_pages() -> u32 {
    20
}
fn default_interval_secs() -> u64 {
    3600
}
fn default_database_path() -> String {
    "job_listings.db".to_string()
}
fn default_user_agent() -> String {
    concat!("job-listing-sync/", env!("CARGO_PKG_VERSION")).to_string()
}
fn default_request_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncConfig {
    /// Source keys in registration order: "hh" | "superjob".
    #[serde(default = "default_sources")]
    pub sources: Vec<String>,
    #[serde(default = "default_search_text")]
    pub search_text: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Upper bound on requests per source per cycle.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// "ENV" means: read from SUPERJOB_APP_ID
    #[serde(default)]
    pub superjob_app_id: Option<String>,
    /// Prometheus listener, e.g. "127.0.0.1:9100". Disabled when absent.
    #[serde(default)]
    pub metrics_addr: Option<String>,
    /// Endpoint overrides for mirrors and local stubs.
    #[serde(default)]
    pub hh_base_url: Option<String>,
    #[serde(default)]
    pub superjob_base_url: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            sources: default_sources(),
            search_text: default_search_text(),
            page_size: default_page_size(),
            max_pages: default_max_pages(),
            interval_secs: default_interval_secs(),
            database_path: default_database_path(),
            user_agent: default_user_agent(),
            request_timeout_secs: default_request_timeout_secs(),
            superjob_app_id: None,
            metrics_addr: None,
            hh_base_url: None,
            superjob_base_url: None,
        }
    }
}

impl SyncConfig {
    /// Load config from an explicit path. Supports TOML or JSON formats.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let cfg = parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.resolved()
    }

    /// Load config using env var + fallbacks:
    /// 1) $JOB_SYNC_CONFIG_PATH
    /// 2) config/sync.toml
    /// 3) config/sync.json
    /// 4) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            } else {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
        }
        let toml_p = PathBuf::from("config/sync.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/sync.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Self::default().resolved()
    }

    /// Resolve secrets and sanitize numeric ranges.
    fn resolved(mut self) -> Result<Self> {
        if let Some(id) = &self.superjob_app_id {
            if id.trim().eq_ignore_ascii_case("env") {
                self.superjob_app_id = Some(
                    std::env::var(ENV_SUPERJOB_APP_ID)
                        .map_err(|_| anyhow!("Missing {ENV_SUPERJOB_APP_ID} env var"))?,
                );
            }
        }

        self.sources = clean_list(std::mem::take(&mut self.sources));
        if self.search_text.trim().is_empty() {
            self.search_text = default_search_text();
        }
        // superjob caps `count` at 100
        if !(1..=100).contains(&self.page_size) {
            self.page_size = default_page_size();
        }
        if self.max_pages == 0 {
            self.max_pages = default_max_pages();
        }
        if self.interval_secs < 60 {
            self.interval_secs = 60;
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        Ok(self)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    if hint_ext == "json" {
        return Ok(serde_json::from_str(s)?);
    }
    if hint_ext == "toml" {
        return Ok(toml::from_str(s)?);
    }
    // No usable extension: try JSON, then TOML.
    if let Ok(v) = serde_json::from_str(s) {
        return Ok(v);
    }
    toml::from_str(s).map_err(|e| anyhow!("unsupported config format: {e}"))
}

/// Trim, drop blanks, keep first occurrence order.
fn clean_list(items: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for it in items {
        let t = it.trim().to_ascii_lowercase();
        if !t.is_empty() && !out.contains(&t) {
            out.push(t);
        }
    }
    out
}
