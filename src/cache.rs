//! Local file cache and its manifest.
//!
//! The cache directory holds one file per required entry:
//!
//! | Entry | File name |
//! |-------|-----------|
//! | profile resource | `profile-{resource id}.{format}` |
//! | flyer resource | `flyer-{resource id}.{format}` |
//! | item notes | `notes-{item id}.txt` |
//!
//! `manifest.json` records which entries are present and under which file
//! name. It is rewritten atomically after every file write or delete, so the
//! reconciler works from an explicit set instead of re-listing the directory.
//!
//! # Reconciliation
//!
//! 1. Required set `R`: every file resource, plus every item with notes.
//! 2. Present set `P`: the manifest entries.
//! 3. Remove `P − R` (and entries whose expected file name changed).
//! 4. Write notes for `R − P` locally.
//! 5. Download resources for `R − P` after a single login. Empty URLs are
//!    skipped; files that appear on disk meanwhile are never re-downloaded.
//! 6. Per-file failures (download, write, an id that is not a valid file
//!    name) are recorded and do not stop the run. Only a failed login does.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use dataset_search_core::models::{CatalogueItem, EntryKey, FileResource};
use dataset_search_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::catalogue;
use crate::file_host::{FileHost, LoginCredentials};
use crate::metadata::write_atomic;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

pub const MANIFEST_FILE: &str = "manifest.json";
const MANIFEST_VERSION: u32 = 1;

/// Persisted set of cache entries, keyed by [`EntryKey`].
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheManifest {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    entries: BTreeMap<EntryKey, String>,
    #[serde(skip)]
    path: PathBuf,
}

impl CacheManifest {
    /// Load the manifest of `dir`.
    ///
    /// A missing or unreadable manifest is rebuilt from the directory
    /// listing. Entries whose file has vanished are dropped, and conforming
    /// files the manifest does not know about are adopted.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(MANIFEST_FILE);
        let mut manifest = match std::fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CacheManifest>(&bytes) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, path = %path.display(), "cache manifest unreadable, rebuilding");
                    CacheManifest::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheManifest::default(),
            Err(e) => return Err(e.into()),
        };
        manifest.path = path;
        manifest.version = MANIFEST_VERSION;

        manifest.entries.retain(|key, file_name| {
            if EntryKey::from_file_name(file_name).as_ref() != Some(key) {
                tracing::warn!(%key, file = %file_name, "manifest entry does not name its own file, dropping");
                return false;
            }
            let exists = dir.join(file_name.as_str()).is_file();
            if !exists {
                tracing::debug!(%key, "cache file vanished, dropping from manifest");
            }
            exists
        });

        for file_name in conforming_files(dir)? {
            if let Some(key) = EntryKey::from_file_name(&file_name) {
                manifest.entries.entry(key).or_insert(file_name);
            }
        }

        Ok(manifest)
    }

    pub fn save(&self) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|e| Error::Other(anyhow::anyhow!("serialize cache manifest: {}", e)))?;
        write_atomic(&self.path, &bytes)?;
        Ok(())
    }

    pub fn get(&self, key: &EntryKey) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &EntryKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntryKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn insert(&mut self, key: EntryKey, file_name: String) -> Result<()> {
        self.entries.insert(key, file_name);
        self.save()
    }

    fn remove(&mut self, key: &EntryKey) -> Result<()> {
        self.entries.remove(key);
        self.save()
    }

    fn tracked_files(&self) -> BTreeSet<&str> {
        self.entries.values().map(String::as_str).collect()
    }
}

/// Regular files in `dir` that follow the `{kind}-{id}.{ext}` convention.
fn conforming_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(e.into()),
    };
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') || name == MANIFEST_FILE {
            continue;
        }
        if EntryKey::from_file_name(&name).is_some() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Delete a file, tolerating that it is already gone.
fn remove_file_if_present(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// A download that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedEntry {
    pub key: EntryKey,
    pub reason: String,
}

/// What a reconciliation run did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub downloaded: Vec<EntryKey>,
    pub notes_written: Vec<EntryKey>,
    pub removed: Vec<EntryKey>,
    pub skipped: Vec<EntryKey>,
    pub failed: Vec<FailedEntry>,
}

impl ReconcileReport {
    /// No file was written or removed and nothing failed.
    pub fn is_noop(&self) -> bool {
        self.downloaded.is_empty()
            && self.notes_written.is_empty()
            && self.removed.is_empty()
            && self.failed.is_empty()
    }
}

/// How one required entry was materialized.
enum Fetched {
    Notes,
    Downloaded(usize),
    /// The file was already on disk when it was about to be written.
    AlreadyPresent,
    NoUrl,
}

enum Required<'a> {
    Notes(&'a CatalogueItem),
    Resource(&'a FileResource),
}

impl Required<'_> {
    fn file_name(&self) -> String {
        match self {
            Required::Notes(item) => item.notes_key().file_name("txt"),
            Required::Resource(res) => res.file_name(),
        }
    }
}

/// The on-disk cache directory.
#[derive(Debug, Clone)]
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn manifest(&self) -> Result<CacheManifest> {
        CacheManifest::load(&self.dir)
    }

    /// Bring the cache in line with `items` and `resources`.
    ///
    /// Returns `Err(Error::Auth)` when a download is needed and login fails
    /// or no credentials were supplied; removals and notes are persisted by
    /// then. Individual download failures land in [`ReconcileReport::failed`].
    pub async fn reconcile(
        &self,
        items: &[CatalogueItem],
        resources: &[FileResource],
        host: &dyn FileHost,
        credentials: Option<&LoginCredentials>,
        progress: &dyn SyncProgressReporter,
    ) -> Result<ReconcileReport> {
        std::fs::create_dir_all(&self.dir)?;
        let mut manifest = CacheManifest::load(&self.dir)?;
        let mut report = ReconcileReport::default();

        // R, keyed per kind so equal ids of different kinds never collide.
        let mut required: BTreeMap<EntryKey, Required<'_>> = BTreeMap::new();
        for item in items.iter().filter(|i| i.has_notes()) {
            required.insert(item.notes_key(), Required::Notes(item));
        }
        for res in resources {
            required.insert(res.entry_key(), Required::Resource(res));
        }

        // P − R, plus entries stored under a file name that is no longer expected.
        let to_remove: Vec<EntryKey> = manifest
            .keys()
            .filter(|key| match required.get(*key) {
                None => true,
                Some(req) => manifest.get(key) != Some(req.file_name().as_str()),
            })
            .cloned()
            .collect();
        for key in to_remove {
            if let Some(file_name) = manifest.get(&key).map(str::to_string) {
                remove_file_if_present(&self.dir.join(&file_name))?;
            }
            manifest.remove(&key)?;
            tracing::debug!(%key, "removed cache entry");
            report.removed.push(key);
        }

        // Conforming files the manifest does not reference (e.g. a second
        // extension for the same key).
        let tracked: BTreeSet<String> = manifest
            .tracked_files()
            .into_iter()
            .map(str::to_string)
            .collect();
        for file_name in conforming_files(&self.dir)? {
            if !tracked.contains(&file_name) {
                remove_file_if_present(&self.dir.join(&file_name))?;
                tracing::debug!(file = %file_name, "removed untracked cache file");
            }
        }

        // R − P
        let mut to_fetch: Vec<(&EntryKey, &Required<'_>)> = required
            .iter()
            .filter(|(key, _)| !manifest.contains(key))
            .collect();
        // Notes need no login; write them before anything can fail on auth.
        to_fetch.sort_by_key(|(_, req)| !matches!(req, Required::Notes(_)));
        let total = to_fetch.len() as u64;
        let mut done = 0u64;
        let mut logged_in = false;

        for (key, req) in to_fetch {
            let outcome = if key.is_file_safe() {
                self.fetch_entry(req, host, credentials, &mut logged_in)
                    .await
            } else {
                Err(Error::InvalidParameter(format!(
                    "id {:?} cannot be used as a file name",
                    key.id
                )))
            };

            match outcome {
                Ok(Fetched::NoUrl) => {
                    tracing::debug!(%key, "resource has no URL, skipping");
                    report.skipped.push(key.clone());
                }
                Ok(fetched) => {
                    manifest.insert(key.clone(), req.file_name())?;
                    match fetched {
                        Fetched::Notes => report.notes_written.push(key.clone()),
                        Fetched::Downloaded(bytes) => {
                            tracing::debug!(%key, bytes, "downloaded");
                            report.downloaded.push(key.clone());
                        }
                        Fetched::AlreadyPresent | Fetched::NoUrl => {
                            report.skipped.push(key.clone())
                        }
                    }
                }
                Err(e @ Error::Auth(_)) => return Err(e),
                Err(e) => {
                    tracing::warn!(%key, error = %e, "cache entry failed");
                    report.failed.push(FailedEntry {
                        key: key.clone(),
                        reason: e.to_string(),
                    });
                }
            }

            done += 1;
            progress.report(SyncProgressEvent::Reconciling { n: done, total });
        }

        Ok(report)
    }

    /// Write one required entry into the cache directory.
    ///
    /// Logs in on the first download of the run. `Error::Auth` means the
    /// run cannot continue; any other error concerns this entry only.
    async fn fetch_entry(
        &self,
        req: &Required<'_>,
        host: &dyn FileHost,
        credentials: Option<&LoginCredentials>,
        logged_in: &mut bool,
    ) -> Result<Fetched> {
        let path = self.dir.join(req.file_name());
        let res = match req {
            Required::Notes(item) => {
                write_atomic(&path, catalogue::notes_document(item).as_bytes())?;
                return Ok(Fetched::Notes);
            }
            Required::Resource(res) => res,
        };

        if res.url.is_empty() {
            return Ok(Fetched::NoUrl);
        }
        if path.is_file() {
            return Ok(Fetched::AlreadyPresent);
        }

        if !*logged_in {
            let creds = credentials.ok_or_else(|| {
                Error::Auth(
                    "file host credentials not configured \
                     (set CATALOGUE_USERNAME and CATALOGUE_PASSWORD)"
                        .to_string(),
                )
            })?;
            host.login(creds).await?;
            *logged_in = true;
        }

        let bytes = host.download(&res.url).await?;
        // Never overwrite a file that appeared while the download was in flight.
        if path.is_file() {
            return Ok(Fetched::AlreadyPresent);
        }
        write_atomic(&path, &bytes)?;
        Ok(Fetched::Downloaded(bytes.len()))
    }
}
