//! Persisted catalogue metadata.
//!
//! Two JSON documents live in the data directory:
//!
//! | File | Contents |
//! |------|----------|
//! | `catalogue-metadata.json` | the last raw catalogue snapshot (array of records) |
//! | `files-metadata.json` | the [`FileResource`]s derived from that snapshot |
//!
//! Both are read whole and written whole, atomically (temp file + rename),
//! so a crash mid-write never leaves a truncated document behind.
//!
//! A `sync-pending` marker exists while a reconcile for the persisted
//! snapshot has not completed.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use anyhow::Context;
use dataset_search_core::models::{CatalogueItem, DocumentRef, EntryKey, EntryKind, FileResource};
use dataset_search_core::Result;
use serde_json::Value;

use crate::catalogue;

pub const SNAPSHOT_FILE: &str = "catalogue-metadata.json";
pub const RESOURCES_FILE: &str = "files-metadata.json";
pub const PENDING_FILE: &str = "sync-pending";

/// Write `bytes` to `path` via a sibling temp file and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = parent.join(format!(".{}.tmp", file_name));
    {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    std::fs::rename(&temp_path, path)
}

/// Read a file, mapping "not found" to `None`.
fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join(SNAPSHOT_FILE)
    }

    pub fn resources_path(&self) -> PathBuf {
        self.dir.join(RESOURCES_FILE)
    }

    pub fn pending_path(&self) -> PathBuf {
        self.dir.join(PENDING_FILE)
    }

    /// Record that a reconcile is under way. Holds the fingerprint of the
    /// snapshot being reconciled.
    pub fn mark_pending(&self, fingerprint: &str) -> Result<()> {
        write_atomic(&self.pending_path(), fingerprint.as_bytes())?;
        Ok(())
    }

    /// Whether an earlier reconcile stopped before completing.
    pub fn is_pending(&self) -> bool {
        self.pending_path().is_file()
    }

    pub fn clear_pending(&self) -> Result<()> {
        match std::fs::remove_file(self.pending_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// The persisted snapshot, or `None` when no sync has completed yet.
    ///
    /// A file that exists but is not a JSON array is an error.
    pub fn load_snapshot(&self) -> Result<Option<Vec<Value>>> {
        let path = self.snapshot_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(None);
        };
        let snapshot: Vec<Value> = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt catalogue snapshot: {}", path.display()))?;
        Ok(Some(snapshot))
    }

    pub fn save_snapshot(&self, snapshot: &[Value]) -> Result<()> {
        let bytes = serde_json::to_vec(snapshot).context("serialize catalogue snapshot")?;
        write_atomic(&self.snapshot_path(), &bytes)?;
        Ok(())
    }

    /// Catalogue items of the persisted snapshot (empty before the first sync).
    pub fn load_items(&self) -> Result<Vec<CatalogueItem>> {
        Ok(self
            .load_snapshot()?
            .map(|snapshot| catalogue::parse_items(&snapshot))
            .unwrap_or_default())
    }

    pub fn save_resources(&self, resources: &[FileResource]) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(resources).context("serialize file resources")?;
        write_atomic(&self.resources_path(), &bytes)?;
        Ok(())
    }

    pub fn load_resources(&self) -> Result<Vec<FileResource>> {
        let path = self.resources_path();
        let Some(bytes) = read_optional(&path)? else {
            return Ok(Vec::new());
        };
        let resources = serde_json::from_slice(&bytes)
            .with_context(|| format!("corrupt file resource list: {}", path.display()))?;
        Ok(resources)
    }

    /// Modification stamp of both documents, used to tell whether an index
    /// built earlier is still current.
    pub fn stamp(&self) -> MetadataStamp {
        MetadataStamp {
            snapshot: file_stamp(&self.snapshot_path()),
            resources: file_stamp(&self.resources_path()),
        }
    }

    /// Build a lookup index over the persisted metadata.
    pub fn index(&self) -> Result<MetadataIndex> {
        Ok(MetadataIndex::new(&self.load_items()?, &self.load_resources()?))
    }
}

/// `(modified, len)` of each metadata document; `None` when absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataStamp {
    snapshot: Option<(SystemTime, u64)>,
    resources: Option<(SystemTime, u64)>,
}

fn file_stamp(path: &Path) -> Option<(SystemTime, u64)> {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

/// Resolves cache entry keys and item ids to their parent dataset.
#[derive(Debug, Clone, Default)]
pub struct MetadataIndex {
    items: HashMap<String, DocumentRef>,
    /// resource id → parent item id
    parents: HashMap<String, String>,
}

impl MetadataIndex {
    pub fn new(items: &[CatalogueItem], resources: &[FileResource]) -> Self {
        Self {
            items: items
                .iter()
                .map(|item| (item.id.clone(), item.to_document_ref()))
                .collect(),
            parents: resources
                .iter()
                .map(|res| (res.id.clone(), res.parent_id.clone()))
                .collect(),
        }
    }

    /// Resolve a document key to its parent catalogue item.
    ///
    /// Accepts a cache file name or path (`cache/profile-<rid>.pdf`), an
    /// entry key (`flyer-<rid>`, `notes-<iid>`) or a bare item id.
    pub fn resolve(&self, document_key: &str) -> Option<DocumentRef> {
        let last = document_key
            .rsplit(|c: char| c == '/' || c == '\\')
            .next()
            .unwrap_or(document_key);

        let entry = EntryKey::from_file_name(last).or_else(|| EntryKey::parse(last));
        if let Some(key) = entry {
            let item_id = match key.kind {
                EntryKind::Notes => Some(key.id.as_str()),
                EntryKind::Profile | EntryKind::Flyer => {
                    self.parents.get(&key.id).map(String::as_str)
                }
            };
            if let Some(doc) = item_id.and_then(|id| self.items.get(id)) {
                return Some(doc.clone());
            }
        }

        self.items.get(document_key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dataset_search_core::models::{RawResource, ResourceKind};
    use serde_json::json;
    use tempfile::TempDir;

    fn item(id: &str, title: &str) -> CatalogueItem {
        CatalogueItem {
            id: id.to_string(),
            title: title.to_string(),
            notes: None,
            url: Some(format!("https://catalogue/dataset/{}", id)),
            resources: Vec::<RawResource>::new(),
        }
    }

    fn resource(id: &str, parent: &str) -> FileResource {
        FileResource {
            id: id.to_string(),
            parent_id: parent.to_string(),
            name: "Profile".to_string(),
            format: "pdf".to_string(),
            url: format!("https://files/{}.pdf", id),
            kind: ResourceKind::Profile,
        }
    }

    #[test]
    fn test_snapshot_round_trip_and_absence() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path());
        assert!(store.load_snapshot().unwrap().is_none());
        assert!(store.load_items().unwrap().is_empty());
        assert!(store.load_resources().unwrap().is_empty());

        let snapshot = vec![json!({"id": "a", "title": "A"})];
        store.save_snapshot(&snapshot).unwrap();
        assert_eq!(store.load_snapshot().unwrap(), Some(snapshot));
        assert_eq!(store.load_items().unwrap()[0].title, "A");
    }

    #[test]
    fn test_pending_marker_lifecycle() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path());
        assert!(!store.is_pending());
        store.mark_pending("abc").unwrap();
        assert!(store.is_pending());
        assert_eq!(std::fs::read_to_string(store.pending_path()).unwrap(), "abc");
        store.clear_pending().unwrap();
        store.clear_pending().unwrap();
        assert!(!store.is_pending());
    }

    #[test]
    fn test_stamp_tracks_rewrites() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path());
        let empty = store.stamp();
        assert_eq!(empty, store.stamp());

        store.save_snapshot(&[json!({"id": "a"})]).unwrap();
        let first = store.stamp();
        assert_ne!(first, empty);
        store.save_snapshot(&[json!({"id": "a", "title": "Longer"})]).unwrap();
        assert_ne!(store.stamp(), first);
    }

    #[test]
    fn test_corrupt_snapshot_is_error() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path());
        std::fs::write(store.snapshot_path(), b"{not json").unwrap();
        assert!(store.load_snapshot().is_err());
    }

    #[test]
    fn test_atomic_write_leaves_no_temp_file() {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(tmp.path().join("nested"));
        store.save_resources(&[resource("r1", "a")]).unwrap();
        let names: Vec<String> = std::fs::read_dir(tmp.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec![RESOURCES_FILE.to_string()]);
        assert_eq!(store.load_resources().unwrap(), vec![resource("r1", "a")]);
    }

    #[test]
    fn test_resolve_keys_to_parent_item() {
        let index = MetadataIndex::new(
            &[item("a", "Dataset A"), item("b", "Dataset B")],
            &[resource("r1", "a")],
        );
        assert_eq!(index.resolve("profile-r1").unwrap().id, "a");
        assert_eq!(index.resolve("profile-r1.pdf").unwrap().title, "Dataset A");
        assert_eq!(index.resolve("data/cache/profile-r1.pdf").unwrap().id, "a");
        assert_eq!(index.resolve("notes-b.txt").unwrap().id, "b");
        assert_eq!(index.resolve("b").unwrap().title, "Dataset B");
        assert_eq!(
            index.resolve("a").unwrap().url.as_deref(),
            Some("https://catalogue/dataset/a")
        );
        assert!(index.resolve("profile-unknown").is_none());
        assert!(index.resolve("zzz").is_none());
    }
}
