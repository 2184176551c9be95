//! Offline delivery queue backed by `pending-tabs.json`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use tabhub_core::limits::{MAX_PENDING_PER_BROWSER, STALE_AFTER_DAYS};
use tabhub_core::validate::valid_browser_id;
use tabhub_core::{HubError, HubResult, PendingTab};

use super::flush::Debouncer;

const QUEUE_FILE: &str = "pending-tabs.json";

struct Inner {
    queues: HashMap<String, Vec<PendingTab>>,
    path: PathBuf,
}

/// Tabs sent to browsers that were offline at the time, keyed by the
/// target browser id. Each queue drains in full on the target's next
/// registration.
pub struct PendingStore {
    inner: Arc<RwLock<Inner>>,
    debouncer: Debouncer,
}

impl PendingStore {
    /// Open the queue file under `data_dir`, creating the directory if
    /// needed. Missing or corrupt files start empty.
    pub async fn open(data_dir: &Path) -> HubResult<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(QUEUE_FILE);
        let queues = load_queues(&path);
        info!(targets = queues.len(), path = %path.display(), "pending queue loaded");

        let inner = Arc::new(RwLock::new(Inner { queues, path }));
        let debouncer = {
            let inner = Arc::clone(&inner);
            Debouncer::spawn(move || {
                let inner = Arc::clone(&inner);
                async move { write_queues(&inner).await }
            })
        };
        Ok(Self { inner, debouncer })
    }

    /// Append a tab to `target`'s queue.
    ///
    /// Fails with [`HubError::QueueFull`] once the queue holds
    /// [`MAX_PENDING_PER_BROWSER`] entries; the sender decides whether
    /// to surface that to the user.
    pub async fn enqueue(&self, target: &str, tab: PendingTab) -> HubResult<usize> {
        let mut guard = self.inner.write().await;
        let queue = guard.queues.entry(target.to_string()).or_default();
        if queue.len() >= MAX_PENDING_PER_BROWSER {
            return Err(HubError::QueueFull(target.to_string()));
        }
        queue.push(tab);
        let depth = queue.len();
        drop(guard);
        self.debouncer.schedule();
        Ok(depth)
    }

    /// Take everything queued for `target`, oldest first. Returns `None`
    /// when nothing is waiting.
    pub async fn drain(&self, target: &str) -> Option<Vec<PendingTab>> {
        let mut guard = self.inner.write().await;
        let tabs = match guard.queues.remove(target) {
            Some(tabs) if !tabs.is_empty() => tabs,
            Some(_) | None => return None,
        };
        drop(guard);
        self.debouncer.schedule();
        Some(tabs)
    }

    /// Total queued tabs across all targets.
    pub async fn total(&self) -> usize {
        let guard = self.inner.read().await;
        guard.queues.values().map(Vec::len).sum()
    }

    /// Re-home the backing file under `new_dir` and persist immediately.
    pub async fn relocate(&self, new_dir: &Path) -> HubResult<()> {
        std::fs::create_dir_all(new_dir)?;
        let new_path = new_dir.join(QUEUE_FILE);
        let old_path = {
            let mut guard = self.inner.write().await;
            let old = guard.path.clone();
            guard.path = new_path.clone();
            old
        };
        if old_path != new_path && old_path.exists() {
            if let Err(e) = std::fs::rename(&old_path, &new_path) {
                warn!(error = %e, "could not move pending queue file");
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

fn load_queues(path: &Path) -> HashMap<String, Vec<PendingTab>> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            warn!(error = %e, path = %path.display(), "cannot read pending queue, starting fresh");
            return HashMap::new();
        }
    };
    let parsed: HashMap<String, Vec<Value>> = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            warn!(error = %e, path = %path.display(), "pending queue corrupt, starting fresh");
            return HashMap::new();
        }
    };

    let cutoff = Utc::now() - Duration::days(STALE_AFTER_DAYS);
    let mut queues = HashMap::new();
    for (target, values) in parsed {
        if !valid_browser_id(&target) {
            debug!(target = %target, "dropped queue for invalid target id");
            continue;
        }
        let tabs: Vec<PendingTab> = values
            .into_iter()
            .filter_map(|value| serde_json::from_value::<PendingTab>(value).ok())
            .filter(|tab| tab.sent_at > cutoff && !tab.url.is_empty())
            .collect();
        if !tabs.is_empty() {
            queues.insert(target, tabs);
        }
    }
    queues
}

async fn write_queues(inner: &RwLock<Inner>) -> HubResult<()> {
    let (json, path) = {
        let guard = inner.read().await;
        (serde_json::to_vec_pretty(&guard.queues)?, guard.path.clone())
    };
    super::atomic_write(&path, &json)
}
