//! Data model shared between the wire protocol and the durable stores.
//!
//! Field spellings follow the extension protocol: camelCase in JSON, both
//! on the wire and in the store files, so a stored record can be replayed
//! to a client verbatim.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One tab as reported by a browser extension, after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tab {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub fav_icon_url: String,
    pub pinned: bool,
    pub window_id: i64,
    pub active: bool,
    /// Milliseconds since the Unix epoch, as reported by the browser.
    pub last_accessed: f64,
    pub incognito: bool,
}

/// Durable record for one known browser, keyed by its self-asserted id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserRecord {
    pub browser_name: String,
    #[serde(default)]
    pub tabs: Vec<Tab>,
    pub last_seen: DateTime<Utc>,
    /// True only while a live socket holds this id. Forced false at load
    /// since liveness never survives a restart.
    #[serde(default)]
    pub online: bool,
}

/// A tab waiting in the queue for an offline target to reconnect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTab {
    pub url: String,
    pub title: String,
    pub fav_icon_url: String,
    pub sender_browser_id: String,
    pub sender_browser_name: String,
    pub sent_at: DateTime<Utc>,
}
