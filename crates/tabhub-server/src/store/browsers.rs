//! Durable per-browser tab store backed by `tabs.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tabhub_core::limits::STALE_AFTER_DAYS;
use tabhub_core::validate::valid_browser_id;
use tabhub_core::{BrowserRecord, HubResult, Tab};

use super::flush::Debouncer;

const STORE_FILE: &str = "tabs.json";

struct Inner {
    records: HashMap<String, BrowserRecord>,
    path: PathBuf,
}

/// Durable map of every browser this hub has seen, keyed by browser id.
///
/// The file is pretty-printed JSON so it stays hand-editable while the
/// service is stopped.
pub struct BrowserStore {
    inner: Arc<RwLock<Inner>>,
    debouncer: Debouncer,
}

/// Per-browser digest served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserSummary {
    pub browser_name: String,
    pub tab_count: usize,
    pub online: bool,
    pub last_seen: DateTime<Utc>,
}

impl BrowserStore {
    /// Open the store under `data_dir`, creating the directory if needed.
    ///
    /// A missing or corrupt file starts an empty store; only directory
    /// creation failures are fatal.
    pub async fn open(data_dir: &Path) -> HubResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(STORE_FILE);
        let records = load_records(&path);
        info!(count = records.len(), path = %path.display(), "browser store loaded");

        let inner = Arc::new(RwLock::new(Inner { records, path }));
        let debouncer = {
            let inner = Arc::clone(&inner);
            Debouncer::spawn(move || {
                let inner = Arc::clone(&inner);
                async move { write_records(&inner).await }
            })
        };
        Ok(Self { inner, debouncer })
    }

    /// Upsert `id` on a successful registration and return the snapshot
    /// for the caller (caller excluded) plus the refreshed timestamp.
    ///
    /// Offline records under a different id with the same display name
    /// are dropped first; they are almost always the same install after
    /// it regenerated its id. Ids in `live_ids` are never dropped.
    pub async fn register(
        &self,
        id: &str,
        name: &str,
        live_ids: &[String],
    ) -> (HashMap<String, BrowserRecord>, DateTime<Utc>) {
        let mut guard = self.inner.write().await;

        let duplicates: Vec<String> = guard
            .records
            .iter()
            .filter(|(other_id, record)| {
                other_id.as_str() != id
                    && record.browser_name == name
                    && !record.online
                    && !live_ids.contains(other_id)
            })
            .map(|(other_id, _)| other_id.clone())
            .collect();
        for duplicate in duplicates {
            debug!(browser = %name, old_id = %duplicate, new_id = %id, "removed duplicate offline entry");
            guard.records.remove(&duplicate);
        }

        let now = Utc::now();
        guard
            .records
            .entry(id.to_string())
            .and_modify(|record| {
                record.browser_name = name.to_string();
                record.online = true;
                record.last_seen = now;
            })
            .or_insert_with(|| BrowserRecord {
                browser_name: name.to_string(),
                tabs: Vec::new(),
                last_seen: now,
                online: true,
            });

        let snapshot = state_snapshot(&guard.records, id);
        drop(guard);
        self.debouncer.schedule();
        (snapshot, now)
    }

    /// Replace the stored tab list. Returns the refreshed record for the
    /// update broadcast, or `None` when `id` was never registered.
    pub async fn update_tabs(&self, id: &str, tabs: Vec<Tab>) -> Option<BrowserRecord> {
        let mut guard = self.inner.write().await;
        let record = guard.records.get_mut(id)?;
        record.tabs = tabs;
        record.last_seen = Utc::now();
        let updated = record.clone();
        drop(guard);
        self.debouncer.schedule();
        Some(updated)
    }

    /// Record a disconnect. Returns the display name and timestamp for
    /// the presence broadcast, or `None` when `id` is unknown.
    pub async fn mark_offline(&self, id: &str) -> Option<(String, DateTime<Utc>)> {
        let mut guard = self.inner.write().await;
        let record = guard.records.get_mut(id)?;
        record.online = false;
        record.last_seen = Utc::now();
        let result = (record.browser_name.clone(), record.last_seen);
        drop(guard);
        self.debouncer.schedule();
        Some(result)
    }

    /// Full snapshot for one client, that client excluded.
    pub async fn state_for(&self, exclude: &str) -> HashMap<String, BrowserRecord> {
        let guard = self.inner.read().await;
        state_snapshot(&guard.records, exclude)
    }

    /// Display name for `id`, if known.
    pub async fn display_name(&self, id: &str) -> Option<String> {
        let guard = self.inner.read().await;
        guard.records.get(id).map(|r| r.browser_name.clone())
    }

    /// Name, tab count, presence and last-seen per id, for `/health`.
    pub async fn summaries(&self) -> HashMap<String, BrowserSummary> {
        let guard = self.inner.read().await;
        guard
            .records
            .iter()
            .filter(|(id, _)| valid_browser_id(id))
            .map(|(id, record)| {
                (
                    id.clone(),
                    BrowserSummary {
                        browser_name: record.browser_name.clone(),
                        tab_count: record.tabs.len(),
                        online: record.online,
                        last_seen: record.last_seen,
                    },
                )
            })
            .collect()
    }

    /// Number of known browsers.
    pub async fn count(&self) -> usize {
        self.inner.read().await.records.len()
    }

    /// Re-home the backing file under `new_dir` and persist immediately.
    pub async fn relocate(&self, new_dir: &Path) -> HubResult<()> {
        std::fs::create_dir_all(new_dir)?;
        let new_path = new_dir.join(STORE_FILE);
        let old_path = {
            let mut guard = self.inner.write().await;
            let old = guard.path.clone();
            guard.path = new_path.clone();
            old
        };
        if old_path != new_path && old_path.exists() {
            if let Err(e) = std::fs::rename(&old_path, &new_path) {
                warn!(error = %e, "could not move browser store file");
            }
        }
        self.flush().await;
        Ok(())
    }

    /// Write pending changes to disk now.
    pub async fn flush(&self) {
        self.debouncer.flush_now().await;
    }
}

/// All records except `exclude`, sentinel ids and nameless entries
/// filtered out.
fn state_snapshot(
    records: &HashMap<String, BrowserRecord>,
    exclude: &str,
) -> HashMap<String, BrowserRecord> {
    records
        .iter()
        .filter(|(id, record)| {
            id.as_str() != exclude && valid_browser_id(id) && !record.browser_name.is_empty()
        })
        .map(|(id, record)| (id.clone(), record.clone()))
        .collect()
}

fn load_records(path: &Path) -> HashMap<String, BrowserRecord> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "cannot read browser store, starting fresh");
            return HashMap::new();
        }
    };
    let parsed: HashMap<String, Value> = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "browser store corrupt, starting fresh");
            return HashMap::new();
        }
    };

    let cutoff = Utc::now() - Duration::days(STALE_AFTER_DAYS);
    let mut records = HashMap::new();
    for (id, value) in parsed {
        if !valid_browser_id(&id) {
            debug!(id = %id, "dropped invalid store key");
            continue;
        }
        let Ok(mut record) = serde_json::from_value::<BrowserRecord>(value) else {
            debug!(id = %id, "dropped unreadable store entry");
            continue;
        };
        if record.browser_name.is_empty() {
            continue;
        }
        if record.last_seen < cutoff {
            debug!(browser = %record.browser_name, id = %id, "dropped stale store entry");
            continue;
        }
        // Liveness never survives a restart.
        record.online = false;
        records.insert(id, record);
    }
    records
}

async fn write_records(inner: &RwLock<Inner>) -> HubResult<()> {
    let (json, path) = {
        let guard = inner.read().await;
        (serde_json::to_vec_pretty(&guard.records)?, guard.path.clone())
    };
    super::atomic_write(&path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn record(name: &str, last_seen: DateTime<Utc>, online: bool) -> BrowserRecord {
        BrowserRecord {
            browser_name: name.to_string(),
            tabs: Vec::new(),
            last_seen,
            online,
        }
    }

    fn seed_store(dir: &TempDir, records: &HashMap<String, BrowserRecord>) {
        let json = serde_json::to_vec_pretty(records).unwrap();
        std::fs::write(dir.path().join(STORE_FILE), json).unwrap();
    }

    #[tokio::test]
    async fn open_on_empty_dir_starts_empty() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn corrupt_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(STORE_FILE), b"{not json").unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn register_persists_through_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = BrowserStore::open(dir.path()).await.unwrap();
            store.register("b1", "Firefox", &[]).await;
            store
                .update_tabs(
                    "b1",
                    vec![Tab {
                        id: 1,
                        url: "https://example.com/".into(),
                        title: "Example".into(),
                        fav_icon_url: String::new(),
                        pinned: false,
                        window_id: 0,
                        active: true,
                        last_accessed: 0.0,
                        incognito: false,
                    }],
                )
                .await
                .unwrap();
            store.flush().await;
        }

        let reopened = BrowserStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.count().await, 1);
        let state = reopened.state_for("someone-else").await;
        let entry = &state["b1"];
        assert_eq!(entry.browser_name, "Firefox");
        assert_eq!(entry.tabs.len(), 1);
        // Nobody is live right after a restart.
        assert!(!entry.online);
    }

    #[tokio::test]
    async fn load_drops_stale_sentinel_and_nameless_entries() {
        let dir = TempDir::new().unwrap();
        let mut seeded = HashMap::new();
        seeded.insert("fresh".to_string(), record("Firefox", Utc::now(), true));
        seeded.insert(
            "stale".to_string(),
            record("Chrome", Utc::now() - Duration::days(STALE_AFTER_DAYS + 10), false),
        );
        seeded.insert("null".to_string(), record("Ghost", Utc::now(), false));
        seeded.insert("nameless".to_string(), record("", Utc::now(), false));
        seed_store(&dir, &seeded);

        let store = BrowserStore::open(dir.path()).await.unwrap();
        assert_eq!(store.count().await, 1);
        let state = store.state_for("").await;
        assert!(state.contains_key("fresh"));
        // The seeded online flag does not survive the reload.
        assert!(!state["fresh"].online);
    }

    #[tokio::test]
    async fn register_dedups_offline_entries_with_same_name() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        store.register("old-id", "Firefox", &[]).await;
        store.mark_offline("old-id").await.unwrap();

        let (snapshot, _) = store.register("new-id", "Firefox", &[]).await;
        assert!(snapshot.is_empty());
        assert_eq!(store.count().await, 1);
        assert!(store.display_name("new-id").await.is_some());
        assert!(store.display_name("old-id").await.is_none());
    }

    #[tokio::test]
    async fn register_keeps_same_name_entries_that_are_live() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        store.register("a", "Firefox", &[]).await;

        // Still online: a second id with the same name must not evict it.
        let live = vec!["a".to_string()];
        store.register("b", "Firefox", &live).await;
        assert_eq!(store.count().await, 2);
    }

    #[tokio::test]
    async fn snapshot_excludes_the_caller() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        store.register("a", "Firefox", &[]).await;
        let (snapshot, _) = store.register("b", "Chrome", &[]).await;
        assert!(snapshot.contains_key("a"));
        assert!(!snapshot.contains_key("b"));
    }

    #[tokio::test]
    async fn update_tabs_for_unknown_id_is_none() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        assert!(store.update_tabs("ghost", Vec::new()).await.is_none());
        assert!(store.mark_offline("ghost").await.is_none());
    }

    #[tokio::test]
    async fn flush_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        store.register("b1", "Firefox", &[]).await;
        store.flush().await;
        assert!(dir.path().join(STORE_FILE).exists());
        assert!(!dir.path().join("tabs.json.tmp").exists());
    }

    #[tokio::test]
    async fn relocate_moves_the_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = BrowserStore::open(dir.path()).await.unwrap();
        store.register("b1", "Firefox", &[]).await;
        store.flush().await;

        let new_dir = dir.path().join("moved");
        store.relocate(&new_dir).await.unwrap();
        assert!(new_dir.join(STORE_FILE).exists());

        let reopened = BrowserStore::open(&new_dir).await.unwrap();
        assert_eq!(reopened.count().await, 1);
    }
}
