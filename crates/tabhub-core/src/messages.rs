//! Wire messages exchanged with browser extensions.
//!
//! Everything travels as JSON text frames with a `type` discriminator in
//! kebab-case and camelCase payload fields. Frames that do not match one
//! of the [`ClientMessage`] shapes are dropped by the transport layer
//! without a reply.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{BrowserRecord, PendingTab, Tab};

/// WebSocket close codes used by the registration handshake.
pub mod close_code {
    /// The supplied browser id was missing or a serialization artifact.
    pub const INVALID_ID: u16 = 4000;
    /// No browser name accompanied the registration.
    pub const MISSING_NAME: u16 = 4001;
    /// A newer connection registered the same browser id.
    pub const REPLACED: u16 = 4002;
}

/// Messages an extension may send to the hub.
///
/// Identity fields are optional or defaulted on purpose: registration
/// decides how to fail, not the deserializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim a browser id for this connection. Must precede everything
    /// else; all other messages are ignored until it succeeds.
    #[serde(rename_all = "camelCase")]
    Register {
        #[serde(default)]
        browser_id: Option<String>,
        #[serde(default)]
        browser_name: Option<String>,
    },
    /// Replace the caller's stored tab list.
    TabsUpdate {
        /// Raw payload; sanitized by the validator, never trusted as-is.
        #[serde(default)]
        tabs: serde_json::Value,
    },
    /// Ask for a fresh full-state snapshot, caller excluded.
    RequestState,
    /// Push one tab at another browser, queueing it if the target is
    /// offline.
    #[serde(rename_all = "camelCase")]
    SendTab {
        #[serde(default)]
        target_browser_id: String,
        #[serde(default)]
        tab: serde_json::Value,
    },
}

/// Messages the hub pushes to extensions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Snapshot of every known browser except the receiver.
    FullState {
        browsers: HashMap<String, BrowserRecord>,
    },
    /// A peer connected or disconnected.
    #[serde(rename_all = "camelCase")]
    Presence {
        browser_id: String,
        browser_name: String,
        online: bool,
        last_seen: DateTime<Utc>,
    },
    /// A peer replaced its tab list; carries the complete new list.
    #[serde(rename_all = "camelCase")]
    BrowserTabsUpdated {
        browser_id: String,
        browser_name: String,
        tabs: Vec<Tab>,
        last_seen: DateTime<Utc>,
        online: bool,
    },
    /// Tabs for the receiver to open, either live or drained from its
    /// offline queue.
    PendingTabs { tabs: Vec<PendingTab> },
    /// Outcome of a send-tab request.
    #[serde(rename_all = "camelCase")]
    SendTabAck {
        status: DeliveryStatus,
        target_browser_id: String,
    },
    /// Protocol-level rejection; the connection usually stays open.
    Error { message: String },
}

/// How a sent tab reached (or will reach) its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Pushed to a live connection.
    Delivered,
    /// Stored for delivery on the target's next registration.
    Queued,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_tags_are_kebab_case() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"register","browserId":"b1","browserName":"Firefox"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Register {
                browser_id,
                browser_name,
            } => {
                assert_eq!(browser_id.as_deref(), Some("b1"));
                assert_eq!(browser_name.as_deref(), Some("Firefox"));
            }
            other => panic!("wrong variant: {other:?}"),
        }

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"request-state"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::RequestState));
    }

    #[test]
    fn register_fields_are_optional() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"register"}"#).unwrap();
        match msg {
            ClientMessage::Register {
                browser_id,
                browser_name,
            } => {
                assert!(browser_id.is_none());
                assert!(browser_name.is_none());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn send_tab_defaults_missing_fields() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"send-tab"}"#).unwrap();
        match msg {
            ClientMessage::SendTab {
                target_browser_id,
                tab,
            } => {
                assert!(target_browser_id.is_empty());
                assert!(tab.is_null());
            }
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"type":"gossip"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>(r#"{"no":"type"}"#).is_err());
    }

    #[test]
    fn ack_spelling_matches_protocol() {
        let ack = ServerMessage::SendTabAck {
            status: DeliveryStatus::Queued,
            target_browser_id: "b2".into(),
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "send-tab-ack");
        assert_eq!(json["status"], "queued");
        assert_eq!(json["targetBrowserId"], "b2");
    }

    #[test]
    fn presence_spelling_matches_protocol() {
        let msg = ServerMessage::Presence {
            browser_id: "b1".into(),
            browser_name: "Firefox".into(),
            online: true,
            last_seen: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "presence");
        assert_eq!(json["browserId"], "b1");
        assert_eq!(json["online"], true);
        assert!(json["lastSeen"].is_string());
    }

    #[test]
    fn full_state_keys_browsers_by_id() {
        let mut browsers = HashMap::new();
        browsers.insert(
            "b2".to_string(),
            BrowserRecord {
                browser_name: "Chrome".into(),
                tabs: Vec::new(),
                last_seen: Utc::now(),
                online: true,
            },
        );
        let json = serde_json::to_value(ServerMessage::FullState { browsers }).unwrap();
        assert_eq!(json["type"], "full-state");
        assert_eq!(json["browsers"]["b2"]["browserName"], "Chrome");
        assert_eq!(json["browsers"]["b2"]["online"], true);
    }
}
