//! Local state overview for `dsearch status`.
//!
//! Summarizes what the last sync left on disk: the persisted snapshot and
//! its fingerprint, the derived file resources, and the cache manifest.

use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::cache::{CacheManifest, MANIFEST_FILE};
use crate::config::Config;
use crate::diff;
use crate::metadata::MetadataStore;

#[derive(Debug, Default)]
pub struct StatusReport {
    /// `None` until the first successful sync.
    pub fingerprint: Option<String>,
    pub last_sync: Option<DateTime<Utc>>,
    pub items: usize,
    pub resources: usize,
    pub cached_entries: usize,
    pub cache_bytes: u64,
}

/// Collect the status of the data directory.
pub fn collect_status(config: &Config) -> Result<StatusReport> {
    let metadata = MetadataStore::new(&config.data.dir);
    let mut report = StatusReport::default();

    if let Some(snapshot) = metadata.load_snapshot()? {
        report.fingerprint = Some(diff::fingerprint(&snapshot));
        report.items = metadata.load_items()?.len();
        report.last_sync = std::fs::metadata(metadata.snapshot_path())
            .and_then(|m| m.modified())
            .ok()
            .map(DateTime::<Utc>::from);
    }
    report.resources = metadata.load_resources()?.len();

    let cache_dir = config.data.cache_dir();
    let manifest = CacheManifest::load(&cache_dir)?;
    report.cached_entries = manifest.len();
    if !manifest.is_empty() {
        report.cache_bytes = dir_size(&cache_dir);
    }

    Ok(report)
}

/// Run the status command and print a summary.
pub fn run_status(config: &Config) -> Result<()> {
    let report = collect_status(config)?;

    println!("Dataset Search Local Status");
    println!("===========================");
    println!();
    println!("  Data dir:     {}", config.data.dir.display());
    match &report.fingerprint {
        Some(fp) => {
            println!("  Snapshot:     {}", fp);
            if let Some(ts) = report.last_sync {
                println!("  Last sync:    {}", format_ts_relative(ts.timestamp()));
            }
        }
        None => println!("  Snapshot:     none (run `dsearch sync`)"),
    }
    println!();
    println!("  Datasets:     {}", report.items);
    println!("  Resources:    {}", report.resources);
    println!(
        "  Cached files: {} ({})",
        report.cached_entries,
        format_bytes(report.cache_bytes)
    );
    println!();

    Ok(())
}

fn dir_size(dir: &Path) -> u64 {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name() != MANIFEST_FILE)
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}
