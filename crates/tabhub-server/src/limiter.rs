//! Sliding-window flood guard for WebSocket messages.
//!
//! Each connection task owns one window, so there is no shared state
//! and no per-key map to garbage-collect.

use std::time::{Duration, Instant};

use tabhub_core::limits::{RATE_LIMIT_MAX_MESSAGES, RATE_LIMIT_WINDOW};

/// Counts recent message timestamps over a rolling window.
#[derive(Debug)]
pub struct SlidingWindow {
    timestamps: Vec<Instant>,
    window: Duration,
    max_messages: usize,
}

impl SlidingWindow {
    /// Create a window allowing `max_messages` per `window`.
    pub fn new(max_messages: usize, window: Duration) -> Self {
        Self {
            timestamps: Vec::new(),
            window,
            max_messages,
        }
    }

    /// Record one message and report whether the sender is over the
    /// limit. Rejected messages still count, so a client that keeps
    /// hammering stays limited.
    pub fn is_limited(&mut self) -> bool {
        self.record_at(Instant::now())
    }

    fn record_at(&mut self, at: Instant) -> bool {
        if let Some(cutoff) = at.checked_sub(self.window) {
            self.timestamps.retain(|t| *t > cutoff);
        }
        self.timestamps.push(at);
        self.timestamps.len() > self.max_messages
    }
}

impl Default for SlidingWindow {
    fn default() -> Self {
        Self::new(RATE_LIMIT_MAX_MESSAGES, RATE_LIMIT_WINDOW)
    }
}
