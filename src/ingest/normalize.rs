// src/ingest/normalize.rs
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;

/// Cap for free-text fields (chars).
pub const MAX_TEXT_CHARS: usize = 4000;

/// Normalize free text: decode entities, strip tags, collapse whitespace.
/// Returns `None` when nothing is left.
pub fn normalize_text(s: &str) -> Option<String> {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags (hh.ru wraps matches in <highlighttext>)
    static RE_TAGS: OnceCell<Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| Regex::new(r"(?is)</?[a-z][^>]*>").expect("tag regex"));
    out = re_tags.replace_all(&out, " ").to_string();

    // 3) Collapse whitespace
    static RE_WS: OnceCell<Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| Regex::new(r"\s+").expect("ws regex"));
    out = re_ws.replace_all(&out, " ").trim().to_string();

    // 4) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

pub fn normalize_opt(s: Option<String>) -> Option<String> {
    s.as_deref().and_then(normalize_text)
}

/// Parse a publish timestamp as the sources emit it:
/// RFC 3339, ISO-8601 with a `+0300` style offset, or a naive local stamp (read as UTC).
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Unix seconds → UTC. Non-positive values are treated as missing.
pub fn from_unix(secs: i64) -> Option<DateTime<Utc>> {
    if secs <= 0 {
        return None;
    }
    DateTime::from_timestamp(secs, 0)
}

/// Sources report "0" for an unknown salary bound.
pub fn positive(v: Option<i64>) -> Option<i64> {
    v.filter(|n| *n > 0)
}
