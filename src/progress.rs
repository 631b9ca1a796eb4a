//! Sync progress reporting.
//!
//! Reports observable progress during `dsearch sync` so operators see which
//! phase is running and how many files are left. Progress is emitted on
//! **stderr** so stdout remains parseable for scripts.

use std::io::Write;

/// A single progress event for sync.
#[derive(Clone, Debug, PartialEq)]
pub enum SyncProgressEvent {
    /// Waiting on the remote catalogue.
    FetchingCatalogue,
    /// Snapshot equals the persisted one; nothing to reconcile.
    Unchanged,
    /// `n` of `total` required cache entries handled.
    Reconciling { n: u64, total: u64 },
}

/// Reports sync progress. Implementations write to stderr (human or JSON).
pub trait SyncProgressReporter: Send + Sync {
    /// Emit a progress event. Called from the sync engine.
    fn report(&self, event: SyncProgressEvent);
}

/// Human-friendly progress on stderr: "sync catalogue  reconciling  12 / 1,340 files".
pub struct StderrProgress;

impl SyncProgressReporter for StderrProgress {
    fn report(&self, event: SyncProgressEvent) {
        let line = match &event {
            SyncProgressEvent::FetchingCatalogue => "sync catalogue  fetching...\n".to_string(),
            SyncProgressEvent::Unchanged => "sync catalogue  unchanged\n".to_string(),
            SyncProgressEvent::Reconciling { n, total } => format!(
                "sync catalogue  reconciling  {} / {} files\n",
                format_number(*n),
                format_number(*total)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl SyncProgressReporter for JsonProgress {
    fn report(&self, event: SyncProgressEvent) {
        let obj = match &event {
            SyncProgressEvent::FetchingCatalogue => serde_json::json!({
                "event": "progress",
                "phase": "fetching"
            }),
            SyncProgressEvent::Unchanged => serde_json::json!({
                "event": "progress",
                "phase": "unchanged"
            }),
            SyncProgressEvent::Reconciling { n, total } => serde_json::json!({
                "event": "progress",
                "phase": "reconciling",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl SyncProgressReporter for NoProgress {
    fn report(&self, _event: SyncProgressEvent) {}
}

fn format_number(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn SyncProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "Unknown progress mode: '{}'. Must be off, human, or json.",
                other
            )),
        }
    }
}
