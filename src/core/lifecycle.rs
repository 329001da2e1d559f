//! Connection lifecycle of a recording.
//!
//! The [`LifecycleController`] is the single [`SampleListener`] of the
//! recorder. It owns the sample window, the energy filter, the flusher and the
//! current log destination, and moves between two states:
//!
//! ```text
//!                 on_connect: open new log, reset window
//!   Disconnected ───────────────────────────────────────▶ Connected
//!        ▲                                                    │
//!        └──────────── on_disconnect: zero snapshot ──────────┘
//! ```
//!
//! A disconnect leaves the window and the log in place; only the next
//! connect replaces them.

use crate::collector::types::{Channels, EmgSample, SampleListener, CHANNEL_COUNT};
use crate::config::Config;
use crate::core::energy::MovingEnergyFilter;
use crate::core::flush::{FlushReport, LogDestination, LogFormat, WindowFlusher};
use crate::core::window::SampleWindow;
use crate::diagnostics::SharedDiagnostics;
use crate::error::{RecorderError, RecorderResult};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, warn};

/// Session state as seen by the recorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connected,
}

/// Reacts to session events and supervises the log destination.
pub struct LifecycleController {
    state: ConnectionState,
    window: SampleWindow,
    filter: MovingEnergyFilter,
    flusher: WindowFlusher,
    destination: Option<LogDestination>,
    output_dir: PathBuf,
    format: LogFormat,
    snapshot: Channels,
    dropped_in_window: u64,
    pending_error: Option<RecorderError>,
    diagnostics: SharedDiagnostics,
}

impl LifecycleController {
    /// Create a disconnected controller with no log open.
    pub fn new(config: &Config, diagnostics: SharedDiagnostics) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            window: SampleWindow::new(config.window_capacity),
            filter: MovingEnergyFilter::new(config.smoothing_len, config.energy_divisor),
            flusher: WindowFlusher::new(),
            destination: None,
            output_dir: config.output_dir.clone(),
            format: config.log_format,
            snapshot: [0; CHANNEL_COUNT],
            dropped_in_window: 0,
            pending_error: None,
            diagnostics,
        }
    }

    /// Replace the flusher, e.g. to echo records to the console.
    pub fn with_flusher(mut self, flusher: WindowFlusher) -> Self {
        self.flusher = flusher;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn window(&self) -> &SampleWindow {
        &self.window
    }

    pub fn flusher(&self) -> &WindowFlusher {
        &self.flusher
    }

    /// Latest raw reading; all zeros while disconnected.
    pub fn snapshot(&self) -> Channels {
        self.snapshot
    }

    /// Path of the log currently receiving flushes.
    pub fn destination_path(&self) -> Option<&Path> {
        self.destination.as_ref().map(LogDestination::path)
    }

    pub fn diagnostics(&self) -> &SharedDiagnostics {
        &self.diagnostics
    }

    /// Take the error raised by the last connect, if opening its log failed.
    pub fn take_error(&mut self) -> Option<RecorderError> {
        self.pending_error.take()
    }

    /// Open a fresh log, closing the previous one.
    fn open_destination(&mut self) -> RecorderResult<()> {
        let opened = LogDestination::create(&self.output_dir, self.format);

        if let Some(previous) = self.destination.take() {
            let path = previous.path().to_path_buf();
            match previous.close() {
                Ok(()) => debug!(path = %path.display(), "Closed log destination"),
                Err(e) => warn!("Failed to close previous log cleanly: {e}"),
            }
        }

        let destination = opened?;
        info!(path = %destination.path().display(), "Logging to new file");
        self.diagnostics.record_log_opened();
        self.destination = Some(destination);
        Ok(())
    }

    /// Flush every buffered sample to the current log.
    ///
    /// Called by the polling driver. While connected without a log (the open
    /// on connect failed), the open is retried first. On failure the window
    /// keeps its samples.
    pub fn drain_and_flush(&mut self) -> RecorderResult<FlushReport> {
        if self.destination.is_none() {
            if self.state != ConnectionState::Connected {
                return Err(RecorderError::NoDestination);
            }
            if let Err(e) = self.open_destination() {
                self.diagnostics.record_flush_failure();
                return Err(e);
            }
        }
        let Some(destination) = self.destination.as_mut() else {
            return Err(RecorderError::NoDestination);
        };

        let pending = self.window.len();
        match self.flusher.flush(&mut self.window, destination) {
            Ok(report) => {
                self.diagnostics.record_flush(report.records as u64);
                if self.dropped_in_window > 0 {
                    warn!(
                        dropped = self.dropped_in_window,
                        capacity = self.window.capacity(),
                        "Window was full; samples dropped before this flush"
                    );
                    self.dropped_in_window = 0;
                }
                if report.records > 0 {
                    debug!(
                        records = report.records,
                        peak = report.peak_smoothed,
                        "Flushed window"
                    );
                }
                Ok(report)
            }
            Err(e) => {
                self.diagnostics.record_flush_failure();
                error!(pending, "Flush failed, buffered samples kept for retry: {e}");
                Err(e)
            }
        }
    }

    /// Flush what is buffered and close the log.
    pub fn shutdown(mut self) -> RecorderResult<FlushReport> {
        let report = match self.drain_and_flush() {
            Ok(report) => report,
            Err(RecorderError::NoDestination) => FlushReport::default(),
            Err(e) => return Err(e),
        };
        if let Some(destination) = self.destination.take() {
            destination.close()?;
        }
        Ok(report)
    }
}

impl SampleListener for LifecycleController {
    fn on_sample(&mut self, timestamp: u64, channels: Channels) {
        self.diagnostics.record_sample_received();
        self.snapshot = channels;

        let sample = EmgSample::new(timestamp, channels);
        match self.window.append(&sample) {
            Ok(slot) => {
                self.filter.apply(&mut self.window, slot);
                self.diagnostics.record_sample_appended();
            }
            Err(RecorderError::WindowFull { capacity }) => {
                if self.dropped_in_window == 0 {
                    debug!(capacity, "Window full, dropping samples until next flush");
                }
                self.dropped_in_window += 1;
                self.diagnostics.record_sample_dropped();
            }
            Err(e) => warn!("Unexpected append failure: {e}"),
        }
    }

    fn on_connect(&mut self) {
        self.state = ConnectionState::Connected;
        self.diagnostics.record_connect();

        if !self.window.is_empty() {
            let stale = self.window.len() as u64;
            warn!(stale, "Discarding unflushed samples from the previous session");
            self.diagnostics.record_samples_discarded(stale);
        }
        self.window.reset();
        self.dropped_in_window = 0;

        if let Err(e) = self.open_destination() {
            error!("Could not open log for new session: {e}");
            self.pending_error = Some(e);
        }
    }

    fn on_disconnect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.snapshot = [0; CHANNEL_COUNT];
        self.diagnostics.record_disconnect();
        info!("Armband disconnected");
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if !self.window.is_empty() {
            warn!(
                lost = self.window.len(),
                "Recorder released with unflushed samples"
            );
        }
    }
}
