//! Coordination core: routes client messages between the connection
//! registry and the durable stores.
//!
//! Registration order matters and is load-bearing: bind the connection,
//! upsert the store, hand the newcomer its snapshot, announce presence,
//! then drain any queued tabs. Clients rely on the snapshot arriving
//! before the queued tabs do.

use std::time::Instant;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use tabhub_core::limits::{MAX_TITLE_LENGTH, MAX_URL_LENGTH};
use tabhub_core::messages::close_code;
use tabhub_core::validate::{is_sendable_url, sanitize_tab_list, truncate_chars, valid_browser_id};
use tabhub_core::{ClientMessage, DeliveryStatus, PendingTab, ServerMessage};

use crate::config::SharedSettings;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::store::browsers::BrowserStore;
use crate::store::pending::PendingStore;

/// Per-connection dispatch state, owned by the socket task.
pub struct ConnState {
    pub handle: ConnectionHandle,
    /// Set once registration succeeds; gates every other message.
    pub browser_id: Option<String>,
}

/// Everything the handlers share.
pub struct Hub {
    pub settings: SharedSettings,
    pub browsers: BrowserStore,
    pub pending: PendingStore,
    pub connections: ConnectionRegistry,
    started_at: Instant,
}

impl Hub {
    pub fn new(settings: SharedSettings, browsers: BrowserStore, pending: PendingStore) -> Self {
        Self {
            settings,
            browsers,
            pending,
            connections: ConnectionRegistry::new(),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Route one parsed client message.
    pub async fn dispatch(&self, conn: &mut ConnState, msg: ClientMessage) {
        match msg {
            ClientMessage::Register {
                browser_id,
                browser_name,
            } => self.handle_register(conn, browser_id, browser_name).await,
            ClientMessage::TabsUpdate { tabs } => self.handle_tabs_update(conn, &tabs).await,
            ClientMessage::RequestState => self.handle_request_state(conn).await,
            ClientMessage::SendTab {
                target_browser_id,
                tab,
            } => self.handle_send_tab(conn, &target_browser_id, &tab).await,
        }
    }

    async fn handle_register(
        &self,
        conn: &mut ConnState,
        browser_id: Option<String>,
        browser_name: Option<String>,
    ) {
        let id = browser_id.unwrap_or_default();
        if !valid_browser_id(&id) {
            conn.handle.push(ServerMessage::Error {
                message: "Invalid browserId".to_string(),
            });
            conn.handle.close(close_code::INVALID_ID, "Invalid browserId");
            return;
        }
        let name = browser_name.unwrap_or_default();
        if name.is_empty() {
            conn.handle.push(ServerMessage::Error {
                message: "Missing browserName".to_string(),
            });
            conn.handle
                .close(close_code::MISSING_NAME, "Missing browserName");
            return;
        }

        conn.browser_id = Some(id.clone());
        self.connections.register(&id, conn.handle.clone()).await;

        let live = self.connections.ids().await;
        let (browsers, last_seen) = self.browsers.register(&id, &name, &live).await;

        conn.handle.push(ServerMessage::FullState { browsers });
        self.connections
            .broadcast(
                &ServerMessage::Presence {
                    browser_id: id.clone(),
                    browser_name: name.clone(),
                    online: true,
                    last_seen,
                },
                Some(&id),
            )
            .await;
        info!(browser = %name, browser_id = %id, "browser registered");

        if let Some(tabs) = self.pending.drain(&id).await {
            info!(browser = %name, count = tabs.len(), "delivering queued tabs");
            conn.handle.push(ServerMessage::PendingTabs { tabs });
        }
    }

    async fn handle_tabs_update(&self, conn: &ConnState, tabs: &Value) {
        let Some(id) = conn.browser_id.as_deref() else {
            debug!("tabs update before registration ignored");
            return;
        };
        let max = self.settings.read().await.max_tabs_per_browser;
        let tabs = sanitize_tab_list(tabs, max);
        let Some(record) = self.browsers.update_tabs(id, tabs).await else {
            debug!(browser_id = %id, "tabs update for unknown browser ignored");
            return;
        };
        self.connections
            .broadcast(
                &ServerMessage::BrowserTabsUpdated {
                    browser_id: id.to_string(),
                    browser_name: record.browser_name,
                    tabs: record.tabs,
                    last_seen: record.last_seen,
                    online: true,
                },
                Some(id),
            )
            .await;
    }

    async fn handle_request_state(&self, conn: &ConnState) {
        let Some(id) = conn.browser_id.as_deref() else {
            debug!("state request before registration ignored");
            return;
        };
        let browsers = self.browsers.state_for(id).await;
        conn.handle.push(ServerMessage::FullState { browsers });
    }

    async fn handle_send_tab(&self, conn: &ConnState, target: &str, tab: &Value) {
        let Some(sender_id) = conn.browser_id.as_deref() else {
            debug!("send-tab before registration ignored");
            return;
        };
        let Some(sender_name) = self.browsers.display_name(sender_id).await else {
            debug!(browser_id = %sender_id, "send-tab from unknown browser ignored");
            return;
        };

        let url = tab.get("url").and_then(Value::as_str).unwrap_or_default();
        if target.is_empty() || url.is_empty() {
            conn.handle.push(ServerMessage::Error {
                message: "Invalid send-tab payload".to_string(),
            });
            return;
        }
        if !is_sendable_url(url) {
            conn.handle.push(ServerMessage::Error {
                message: "Invalid URL".to_string(),
            });
            return;
        }

        let pending_tab = PendingTab {
            url: truncate_chars(url, MAX_URL_LENGTH),
            title: tab
                .get("title")
                .and_then(Value::as_str)
                .map(|t| truncate_chars(t, MAX_TITLE_LENGTH))
                .unwrap_or_default(),
            fav_icon_url: tab
                .get("favIconUrl")
                .and_then(Value::as_str)
                .map(|f| truncate_chars(f, MAX_URL_LENGTH))
                .unwrap_or_default(),
            sender_browser_id: sender_id.to_string(),
            sender_browser_name: sender_name,
            sent_at: Utc::now(),
        };

        if let Some(target_conn) = self.connections.get(target).await {
            target_conn.push(ServerMessage::PendingTabs {
                tabs: vec![pending_tab],
            });
            conn.handle.push(ServerMessage::SendTabAck {
                status: DeliveryStatus::Delivered,
                target_browser_id: target.to_string(),
            });
            debug!(from = %sender_id, to = %target, "tab delivered live");
            return;
        }

        match self.pending.enqueue(target, pending_tab).await {
            Ok(depth) => {
                conn.handle.push(ServerMessage::SendTabAck {
                    status: DeliveryStatus::Queued,
                    target_browser_id: target.to_string(),
                });
                debug!(from = %sender_id, to = %target, depth, "tab queued for offline browser");
            }
            Err(e) => {
                warn!(to = %target, error = %e, "sent tab dropped");
                conn.handle.push(ServerMessage::Error {
                    message: "Pending queue full for target browser".to_string(),
                });
            }
        }
    }

    /// Tear down after the socket closed or errored.
    ///
    /// A replaced connection still reaches this on its way out; the
    /// ownership check keeps it from knocking its successor offline.
    pub async fn handle_disconnect(&self, conn: &ConnState) {
        let Some(id) = conn.browser_id.as_deref() else {
            return;
        };
        if !self
            .connections
            .remove_if_owner(id, conn.handle.conn_id())
            .await
        {
            debug!(browser_id = %id, "stale connection closed");
            return;
        }
        let Some((name, last_seen)) = self.browsers.mark_offline(id).await else {
            return;
        };
        self.connections
            .broadcast(
                &ServerMessage::Presence {
                    browser_id: id.to_string(),
                    browser_name: name.clone(),
                    online: false,
                    last_seen,
                },
                None,
            )
            .await;
        info!(browser = %name, browser_id = %id, "browser disconnected");
    }

    /// Close every socket and record the disconnects, so records do not
    /// stay online across a listener restart.
    pub async fn shutdown_connections(&self) {
        for id in self.connections.close_all("Server shutting down").await {
            self.browsers.mark_offline(&id).await;
        }
    }

    /// Flush both stores to disk now.
    pub async fn flush_all(&self) {
        self.browsers.flush().await;
        self.pending.flush().await;
    }
}
