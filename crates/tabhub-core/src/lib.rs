//! tabhub-core: Shared protocol library for tabhub.
//!
//! Provides the JSON wire messages, the durable browser/tab model,
//! protocol bounds, and the defensive validators applied to extension
//! input before it touches any store.

pub mod error;
pub mod limits;
pub mod messages;
pub mod model;
pub mod validate;

// Re-export commonly used items at crate root.
pub use error::{HubError, HubResult};
pub use messages::{close_code, ClientMessage, DeliveryStatus, ServerMessage};
pub use model::{BrowserRecord, PendingTab, Tab};
pub use validate::{is_sendable_url, sanitize_tab_list, valid_browser_id};
