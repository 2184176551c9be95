//! Durable stores: browser records and the offline tab queue.
//!
//! Both stores share the same discipline: lenient per-entry loads that
//! never fail startup, debounced flushes, and atomic writes.

pub mod browsers;
pub mod flush;
pub mod pending;

use std::path::Path;

use tabhub_core::HubResult;

/// Write `bytes` to `path` via a temp file and rename, so a crash never
/// leaves a half-written store behind.
pub(crate) fn atomic_write(path: &Path, bytes: &[u8]) -> HubResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
