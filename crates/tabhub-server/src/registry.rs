//! Registry of live WebSocket connections, keyed by browser id.
//!
//! Each socket task owns an outbound queue; the registry holds the
//! sending halves so the hub can target or broadcast without touching
//! the sockets themselves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};

use tabhub_core::messages::close_code;
use tabhub_core::ServerMessage;

/// Frame queued for a connection's writer half.
#[derive(Debug)]
pub enum Outbound {
    /// Message to serialize and send as a text frame.
    Message(ServerMessage),
    /// Close the socket with the given code and reason.
    Close { code: u16, reason: &'static str },
}

/// Sending side of one connection's outbound queue.
///
/// `conn_id` is unique per accepted socket and never reused, so a
/// replaced connection can be told apart from its successor even when
/// both carried the same browser id.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    conn_id: u64,
    tx: mpsc::Sender<Outbound>,
}

impl ConnectionHandle {
    pub fn conn_id(&self) -> u64 {
        self.conn_id
    }

    /// Queue a message. Returns `false` when the writer has fallen so
    /// far behind that its queue is full; the message is dropped.
    pub fn push(&self, msg: ServerMessage) -> bool {
        self.tx.try_send(Outbound::Message(msg)).is_ok()
    }

    /// Ask the writer to close the socket.
    pub fn close(&self, code: u16, reason: &'static str) {
        let _ = self.tx.try_send(Outbound::Close { code, reason });
    }
}

/// All registered connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionHandle>>,
    next_conn_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Wrap a socket's outbound queue in a handle with a fresh id.
    pub fn new_handle(&self, tx: mpsc::Sender<Outbound>) -> ConnectionHandle {
        ConnectionHandle {
            conn_id: self.next_conn_id.fetch_add(1, Ordering::Relaxed),
            tx,
        }
    }

    /// Bind `handle` to `browser_id`, closing any previous connection
    /// that still holds the id.
    pub async fn register(&self, browser_id: &str, handle: ConnectionHandle) {
        let mut guard = self.connections.write().await;
        if let Some(old) = guard.get(browser_id) {
            if old.conn_id != handle.conn_id {
                info!(browser_id = %browser_id, "replacing existing connection");
                old.close(close_code::REPLACED, "Replaced by new connection");
            }
        }
        guard.insert(browser_id.to_string(), handle);
    }

    /// Drop the binding only while `conn_id` still owns it. A replaced
    /// socket's late disconnect must not evict its successor.
    pub async fn remove_if_owner(&self, browser_id: &str, conn_id: u64) -> bool {
        let mut guard = self.connections.write().await;
        match guard.get(browser_id) {
            Some(current) if current.conn_id == conn_id => {
                guard.remove(browser_id);
                true
            }
            _ => false,
        }
    }

    pub async fn get(&self, browser_id: &str) -> Option<ConnectionHandle> {
        self.connections.read().await.get(browser_id).cloned()
    }

    /// Send `msg` to every connection except `exclude`.
    pub async fn broadcast(&self, msg: &ServerMessage, exclude: Option<&str>) {
        let guard = self.connections.read().await;
        for (id, handle) in guard.iter() {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if !handle.push(msg.clone()) {
                debug!(browser_id = %id, "dropped broadcast to slow connection");
            }
        }
    }

    pub async fn count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Browser ids with a live connection.
    pub async fn ids(&self) -> Vec<String> {
        self.connections.read().await.keys().cloned().collect()
    }

    /// Close every connection with a going-away frame. Returns the ids
    /// that were connected.
    pub async fn close_all(&self, reason: &'static str) -> Vec<String> {
        let mut guard = self.connections.write().await;
        let mut ids = Vec::with_capacity(guard.len());
        for (id, handle) in guard.drain() {
            debug!(browser_id = %id, "closing connection");
            handle.close(1001, reason);
            ids.push(id);
        }
        ids
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(registry: &ConnectionRegistry) -> (ConnectionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.new_handle(tx), rx)
    }

    fn error(message: &str) -> ServerMessage {
        ServerMessage::Error {
            message: message.to_string(),
        }
    }

    #[tokio::test]
    async fn handles_get_distinct_conn_ids() {
        let registry = ConnectionRegistry::new();
        let (a, _rx_a) = connect(&registry);
        let (b, _rx_b) = connect(&registry);
        assert_ne!(a.conn_id(), b.conn_id());
    }

    #[tokio::test]
    async fn register_closes_the_replaced_connection() {
        let registry = ConnectionRegistry::new();
        let (old, mut old_rx) = connect(&registry);
        registry.register("b1", old).await;

        let (new, _new_rx) = connect(&registry);
        let new_id = new.conn_id();
        registry.register("b1", new).await;

        assert!(matches!(
            old_rx.try_recv(),
            Ok(Outbound::Close {
                code: close_code::REPLACED,
                ..
            })
        ));
        assert_eq!(registry.count().await, 1);
        let current = registry.get("b1").await.unwrap();
        assert_eq!(current.conn_id(), new_id);
    }

    #[tokio::test]
    async fn re_registering_the_same_connection_does_not_close_it() {
        let registry = ConnectionRegistry::new();
        let (handle, mut rx) = connect(&registry);
        registry.register("b1", handle.clone()).await;
        registry.register("b1", handle).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn remove_is_gated_on_ownership() {
        let registry = ConnectionRegistry::new();
        let (old, _old_rx) = connect(&registry);
        let old_id = old.conn_id();
        registry.register("b1", old).await;

        let (new, _new_rx) = connect(&registry);
        registry.register("b1", new).await;

        // The replaced socket's disconnect must not evict the new one.
        assert!(!registry.remove_if_owner("b1", old_id).await);
        assert_eq!(registry.count().await, 1);

        let current_id = registry.get("b1").await.unwrap().conn_id();
        assert!(registry.remove_if_owner("b1", current_id).await);
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    async fn broadcast_skips_the_excluded_id() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry);
        let (b, mut rx_b) = connect(&registry);
        registry.register("a", a).await;
        registry.register("b", b).await;

        registry.broadcast(&error("hello"), Some("a")).await;
        assert!(rx_a.try_recv().is_err());
        assert!(matches!(rx_b.try_recv(), Ok(Outbound::Message(_))));
    }

    #[tokio::test]
    async fn close_all_drains_the_registry() {
        let registry = ConnectionRegistry::new();
        let (a, mut rx_a) = connect(&registry);
        registry.register("a", a).await;

        let ids = registry.close_all("shutting down").await;
        assert_eq!(ids, vec!["a".to_string()]);
        assert_eq!(registry.count().await, 0);
        assert!(matches!(
            rx_a.try_recv(),
            Ok(Outbound::Close { code: 1001, .. })
        ));
    }
}
