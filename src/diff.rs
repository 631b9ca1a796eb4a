//! Catalogue change detection.
//!
//! A fresh snapshot is compared structurally against the persisted one:
//! object field order is irrelevant, array order is not. The file cache is
//! never touched here.

use dataset_search_core::Result;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::metadata::MetadataStore;

/// Decide whether `snapshot` differs from the persisted snapshot.
///
/// Returns `false` only when a persisted snapshot exists and is
/// structurally equal. In every other case the new snapshot is persisted
/// and `true` is returned. A persisted snapshot that cannot be read counts
/// as changed.
pub fn should_sync(store: &MetadataStore, snapshot: &[Value]) -> Result<bool> {
    match store.load_snapshot() {
        Ok(Some(previous)) if previous.as_slice() == snapshot => {
            tracing::debug!(records = snapshot.len(), "catalogue snapshot unchanged");
            return Ok(false);
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "persisted catalogue snapshot unreadable, treating as changed");
        }
    }

    store.save_snapshot(snapshot)?;
    Ok(true)
}

/// SHA-256 (hex) of the canonical serialization of `snapshot`.
///
/// `serde_json` keeps object keys sorted, so equal snapshots always hash
/// equally regardless of the field order they arrived in.
pub fn fingerprint(snapshot: &[Value]) -> String {
    let canonical = serde_json::to_vec(snapshot).unwrap_or_default();
    hex::encode(Sha256::digest(&canonical))
}
