// src/ingest/json.rs
//! Safe navigation over `serde_json::Value`. Every accessor returns `None`
//! when any segment of the path is absent or null.

use serde_json::Value;

pub fn value_at<'a>(node: &'a Value, path: &[&str]) -> Option<&'a Value> {
    let mut cur = node;
    for seg in path {
        cur = cur.get(seg)?;
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

/// Text at `path`. Numbers and booleans are rendered; objects/arrays are not text.
pub fn text_at(node: &Value, path: &[&str]) -> Option<String> {
    match value_at(node, path)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Integer at `path`, accepting floats (truncated) and numeric strings.
pub fn int_at(node: &Value, path: &[&str]) -> Option<i64> {
    match value_at(node, path)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The array at `key` of a page body, or `None` when absent or not an array.
pub fn items_at<'a>(root: &'a Value, key: &str) -> Option<&'a Vec<Value>> {
    value_at(root, &[key])?.as_array()
}

/// Joins the present, non-empty parts with `sep`. `None` when nothing remains.
pub fn join_present<I>(parts: I, sep: &str) -> Option<String>
where
    I: IntoIterator<Item = Option<String>>,
{
    let kept: Vec<String> = parts
        .into_iter()
        .flatten()
        .filter(|s| !s.is_empty())
        .collect();
    if kept.is_empty() {
        None
    } else {
        Some(kept.join(sep))
    }
}
