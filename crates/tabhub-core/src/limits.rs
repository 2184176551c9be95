//! Protocol bounds shared by the server, the stores, and their tests.
//!
//! These caps exist so one misbehaving extension cannot bloat the wire,
//! the memory footprint, or the on-disk stores for everyone else.

use std::time::Duration;

/// Default TCP port for the loopback service.
pub const DEFAULT_PORT: u16 = 9234;

/// Largest WebSocket frame the server will accept (512 KiB).
pub const MAX_MESSAGE_SIZE: usize = 512 * 1024;

/// Most tabs retained per browser; extra entries are dropped in order.
pub const MAX_TABS_PER_BROWSER: usize = 500;

/// Most queued tabs held for a single offline target.
pub const MAX_PENDING_PER_BROWSER: usize = 50;

/// Longest URL kept in a tab snapshot, in characters.
pub const MAX_URL_LENGTH: usize = 2048;

/// Longest title kept in a tab snapshot, in characters.
pub const MAX_TITLE_LENGTH: usize = 500;

/// Sliding window over which inbound frames are counted.
pub const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(10);

/// Frames allowed within [`RATE_LIMIT_WINDOW`] before throttling.
pub const RATE_LIMIT_MAX_MESSAGES: usize = 50;

/// Quiet period between a store mutation and its flush to disk.
pub const SAVE_DEBOUNCE: Duration = Duration::from_millis(500);

/// Records and queued tabs idle longer than this are evicted at load.
pub const STALE_AFTER_DAYS: i64 = 30;
