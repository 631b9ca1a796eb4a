//! Catalogue synchronization.
//!
//! One run: fetch the snapshot, decide whether it changed, derive the file
//! resources and reconcile the local cache. Runs are serialized through a
//! run-lock because reconciliation mutates the shared cache directory.
//!
//! The pending marker is set before the snapshot is persisted and cleared
//! only once reconcile returns. A run that stopped part-way is therefore
//! resumed by the next one even though the snapshot already compares equal.

use std::sync::Arc;

use dataset_search_core::models::FileResource;
use dataset_search_core::Result;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::cache::{FileCache, ReconcileReport};
use crate::catalogue::{self, CatalogueSource};
use crate::diff;
use crate::file_host::{FileHost, LoginCredentials};
use crate::metadata::MetadataStore;
use crate::progress::{SyncProgressEvent, SyncProgressReporter};

#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Reconcile even when the snapshot is unchanged, e.g. to retry
    /// downloads that failed in an earlier run.
    pub force: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SyncOutcome {
    Unchanged {
        fingerprint: String,
    },
    Reconciled {
        fingerprint: String,
        items: usize,
        resources: usize,
        report: ReconcileReport,
    },
}

pub struct SyncEngine {
    source: Arc<dyn CatalogueSource>,
    host: Arc<dyn FileHost>,
    credentials: Option<LoginCredentials>,
    metadata: MetadataStore,
    cache: FileCache,
    run_lock: Mutex<()>,
}

impl SyncEngine {
    pub fn new(
        source: Arc<dyn CatalogueSource>,
        host: Arc<dyn FileHost>,
        credentials: Option<LoginCredentials>,
        metadata: MetadataStore,
        cache: FileCache,
    ) -> Self {
        Self {
            source,
            host,
            credentials,
            metadata,
            cache,
            run_lock: Mutex::new(()),
        }
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Run one synchronization. Concurrent callers wait for the running one.
    ///
    /// A failed fetch aborts the run before anything is persisted, so the
    /// previous snapshot and cache stay intact.
    pub async fn run(
        &self,
        options: SyncOptions,
        progress: &dyn SyncProgressReporter,
    ) -> Result<SyncOutcome> {
        let _guard = self.run_lock.lock().await;

        progress.report(SyncProgressEvent::FetchingCatalogue);
        let snapshot = self.source.fetch_snapshot().await?;
        let fingerprint = diff::fingerprint(&snapshot);
        let items = catalogue::parse_items(&snapshot);

        let resuming = self.metadata.is_pending();
        self.metadata.mark_pending(&fingerprint)?;
        let changed = diff::should_sync(&self.metadata, &snapshot)?;
        if !changed && !resuming && !options.force {
            self.metadata.clear_pending()?;
            tracing::info!(%fingerprint, items = items.len(), "catalogue unchanged");
            progress.report(SyncProgressEvent::Unchanged);
            return Ok(SyncOutcome::Unchanged { fingerprint });
        }
        if resuming && !changed {
            tracing::info!(%fingerprint, "resuming interrupted reconcile");
        }

        let resources = FileResource::derive_all(&items);
        self.metadata.save_resources(&resources)?;
        tracing::info!(
            %fingerprint,
            items = items.len(),
            resources = resources.len(),
            changed,
            "reconciling file cache"
        );

        let report = self
            .cache
            .reconcile(
                &items,
                &resources,
                self.host.as_ref(),
                self.credentials.as_ref(),
                progress,
            )
            .await?;
        self.metadata.clear_pending()?;

        tracing::info!(
            downloaded = report.downloaded.len(),
            notes = report.notes_written.len(),
            removed = report.removed.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "sync complete"
        );

        Ok(SyncOutcome::Reconciled {
            fingerprint,
            items: items.len(),
            resources: resources.len(),
            report,
        })
    }
}
