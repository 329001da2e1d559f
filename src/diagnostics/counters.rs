//! Recorder diagnostic counters.
//!
//! Counters are atomics so a shared handle can be read from the console loop
//! while the controller updates them. Totals persist across runs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Diagnostic counters for the current and previous sessions.
#[derive(Debug)]
pub struct Diagnostics {
    /// Samples delivered by the armband
    samples_received: AtomicU64,
    /// Samples stored in a window
    samples_appended: AtomicU64,
    /// Samples rejected because the window was full
    samples_dropped: AtomicU64,
    /// Buffered samples thrown away by a reconnect
    samples_discarded: AtomicU64,
    /// Rows written to logs
    records_written: AtomicU64,
    /// Non-empty windows flushed
    windows_flushed: AtomicU64,
    /// Flushes that failed to write
    flush_failures: AtomicU64,
    /// Sessions established
    connects: AtomicU64,
    /// Sessions lost
    disconnects: AtomicU64,
    /// Log files created
    logs_opened: AtomicU64,
    /// Session start time
    session_start: DateTime<Utc>,
    /// Path for persisting stats
    persist_path: Option<PathBuf>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self {
            samples_received: AtomicU64::new(0),
            samples_appended: AtomicU64::new(0),
            samples_dropped: AtomicU64::new(0),
            samples_discarded: AtomicU64::new(0),
            records_written: AtomicU64::new(0),
            windows_flushed: AtomicU64::new(0),
            flush_failures: AtomicU64::new(0),
            connects: AtomicU64::new(0),
            disconnects: AtomicU64::new(0),
            logs_opened: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create diagnostics that continue from the totals stored at `path`.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut diagnostics = Self::new();
        diagnostics.persist_path = Some(path);

        if let Err(e) = diagnostics.load() {
            warn!("Could not load previous diagnostics: {e}");
        }

        diagnostics
    }

    pub fn record_sample_received(&self) {
        self.samples_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_appended(&self) {
        self.samples_appended.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a sample rejected by a full window.
    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record buffered samples lost to a reconnect.
    pub fn record_samples_discarded(&self, count: u64) {
        self.samples_discarded.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a successful flush of `records` rows.
    pub fn record_flush(&self, records: u64) {
        if records > 0 {
            self.windows_flushed.fetch_add(1, Ordering::Relaxed);
            self.records_written.fetch_add(records, Ordering::Relaxed);
        }
    }

    pub fn record_flush_failure(&self) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connect(&self) {
        self.connects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_log_opened(&self) {
        self.logs_opened.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current statistics.
    pub fn stats(&self) -> DiagnosticsStats {
        DiagnosticsStats {
            samples_received: self.samples_received.load(Ordering::Relaxed),
            samples_appended: self.samples_appended.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
            samples_discarded: self.samples_discarded.load(Ordering::Relaxed),
            records_written: self.records_written.load(Ordering::Relaxed),
            windows_flushed: self.windows_flushed.load(Ordering::Relaxed),
            flush_failures: self.flush_failures.load(Ordering::Relaxed),
            connects: self.connects.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            logs_opened: self.logs_opened.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Get a summary string for display.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Recording Statistics:\n\
             - Samples received: {}\n\
             - Samples buffered: {}\n\
             - Samples dropped (window full): {}\n\
             - Samples discarded (reconnect): {}\n\
             - Records written: {}\n\
             - Windows flushed: {}\n\
             - Flush failures: {}\n\
             - Connects / disconnects: {} / {}\n\
             - Log files opened: {}\n\
             - Session duration: {} seconds",
            stats.samples_received,
            stats.samples_appended,
            stats.samples_dropped,
            stats.samples_discarded,
            stats.records_written,
            stats.windows_flushed,
            stats.flush_failures,
            stats.connects,
            stats.disconnects,
            stats.logs_opened,
            stats.session_duration_secs
        )
    }

    /// Save stats to disk.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                samples_received: stats.samples_received,
                samples_appended: stats.samples_appended,
                samples_dropped: stats.samples_dropped,
                samples_discarded: stats.samples_discarded,
                records_written: stats.records_written,
                windows_flushed: stats.windows_flushed,
                flush_failures: stats.flush_failures,
                connects: stats.connects,
                disconnects: stats.disconnects,
                logs_opened: stats.logs_opened,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;

            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.samples_received
                    .store(persisted.samples_received, Ordering::Relaxed);
                self.samples_appended
                    .store(persisted.samples_appended, Ordering::Relaxed);
                self.samples_dropped
                    .store(persisted.samples_dropped, Ordering::Relaxed);
                self.samples_discarded
                    .store(persisted.samples_discarded, Ordering::Relaxed);
                self.records_written
                    .store(persisted.records_written, Ordering::Relaxed);
                self.windows_flushed
                    .store(persisted.windows_flushed, Ordering::Relaxed);
                self.flush_failures
                    .store(persisted.flush_failures, Ordering::Relaxed);
                self.connects.store(persisted.connects, Ordering::Relaxed);
                self.disconnects
                    .store(persisted.disconnects, Ordering::Relaxed);
                self.logs_opened
                    .store(persisted.logs_opened, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of diagnostic counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsStats {
    pub samples_received: u64,
    pub samples_appended: u64,
    pub samples_dropped: u64,
    pub samples_discarded: u64,
    pub records_written: u64,
    pub windows_flushed: u64,
    pub flush_failures: u64,
    pub connects: u64,
    pub disconnects: u64,
    pub logs_opened: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

/// Stats format for persistence.
#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    samples_received: u64,
    samples_appended: u64,
    samples_dropped: u64,
    samples_discarded: u64,
    records_written: u64,
    windows_flushed: u64,
    flush_failures: u64,
    connects: u64,
    disconnects: u64,
    logs_opened: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe shared diagnostics.
pub type SharedDiagnostics = Arc<Diagnostics>;

pub fn create_shared_diagnostics() -> SharedDiagnostics {
    Arc::new(Diagnostics::new())
}

/// Create shared diagnostics that persist to `path`.
pub fn create_shared_diagnostics_with_persistence(path: PathBuf) -> SharedDiagnostics {
    Arc::new(Diagnostics::with_persistence(path))
}
