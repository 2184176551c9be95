//! Defensive sanitizers for extension-supplied payloads.
//!
//! Extensions are untrusted input sources. Every field of an incoming tab
//! list is independently re-typed and bounded here before it touches a
//! store, so one malformed field never discards a whole tab and nothing
//! oversized survives.

use chrono::Utc;
use serde_json::Value;
use url::Url;

use crate::limits::{MAX_TITLE_LENGTH, MAX_URL_LENGTH};
use crate::model::Tab;

/// Schemes a sent tab is allowed to carry.
const SENDABLE_SCHEMES: [&str; 3] = ["http", "https", "ftp"];

/// Ids that are serialization artifacts rather than identities.
const SENTINEL_IDS: [&str; 2] = ["null", "undefined"];

/// True when `id` may key a browser record.
pub fn valid_browser_id(id: &str) -> bool {
    !id.is_empty() && !SENTINEL_IDS.contains(&id)
}

/// True when `url` may be pushed at another browser.
///
/// Stored tab lists keep whatever scheme the browser reported; only
/// cross-browser sends are restricted to web-openable URLs.
pub fn is_sendable_url(raw: &str) -> bool {
    match Url::parse(raw) {
        Ok(url) => SENDABLE_SCHEMES.contains(&url.scheme()),
        Err(_) => false,
    }
}

/// Rebuild an untrusted tab array into typed, bounded snapshots.
///
/// Non-array input yields an empty list. At most `max_tabs` entries are
/// kept, in their original order.
pub fn sanitize_tab_list(raw: &Value, max_tabs: usize) -> Vec<Tab> {
    let Some(items) = raw.as_array() else {
        return Vec::new();
    };
    items.iter().take(max_tabs).map(sanitize_tab).collect()
}

fn sanitize_tab(raw: &Value) -> Tab {
    Tab {
        id: raw.get("id").and_then(Value::as_i64).unwrap_or(0),
        url: clamped_string(raw.get("url"), MAX_URL_LENGTH, ""),
        title: clamped_string(raw.get("title"), MAX_TITLE_LENGTH, "New Tab"),
        fav_icon_url: clamped_string(raw.get("favIconUrl"), MAX_URL_LENGTH, ""),
        pinned: raw.get("pinned").and_then(Value::as_bool).unwrap_or(false),
        window_id: raw.get("windowId").and_then(Value::as_i64).unwrap_or(0),
        active: raw.get("active").and_then(Value::as_bool).unwrap_or(false),
        last_accessed: raw
            .get("lastAccessed")
            .and_then(Value::as_f64)
            .unwrap_or_else(now_ms),
        incognito: raw
            .get("incognito")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

fn clamped_string(raw: Option<&Value>, max_chars: usize, fallback: &str) -> String {
    match raw.and_then(Value::as_str) {
        Some(s) => truncate_chars(s, max_chars),
        None => fallback.to_string(),
    }
}

/// Truncate to at most `max_chars` characters without splitting one.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}
