//! EMG Recorder - windowed acquisition of armband EMG with energy smoothing.
//!
//! This library buffers 8-channel EMG samples from an armband session into
//! fixed-size windows, computes a trailing moving average of signal energy as
//! each sample arrives, and periodically flushes the window to a CSV log.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         EMG Recorder                          │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │  Collector  │──▶│ SampleWindow │──▶│ MovingEnergy │       │
//! │  │  (armband)  │   │  (250 slots) │   │   (60 slots) │       │
//! │  └─────────────┘   └──────────────┘   └──────────────┘       │
//! │         │                  │                                  │
//! │         ▼                  ▼  every 250ms                     │
//! │  ┌─────────────┐   ┌──────────────┐   ┌──────────────┐       │
//! │  │  Lifecycle  │──▶│ WindowFlusher│──▶│  emg-*.csv   │       │
//! │  │ (connect/dc)│   │              │   │              │       │
//! │  └─────────────┘   └──────────────┘   └──────────────┘       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use emg_recorder::{collector::SampleListener, config::Config, core::LifecycleController};
//! use emg_recorder::diagnostics::create_shared_diagnostics;
//!
//! let config = Config::default();
//! let mut recorder = LifecycleController::new(&config, create_shared_diagnostics());
//!
//! recorder.on_connect();
//! recorder.on_sample(0, [10, 0, 0, 0, 0, 0, 0, 0]);
//! recorder.drain_and_flush().expect("flush failed");
//! ```

pub mod collector;
pub mod config;
pub mod core;
pub mod diagnostics;
pub mod error;

// Re-export key types at crate root for convenience
pub use collector::{Collector, CollectorConfig, EmgSample, SampleListener, SessionEvent};
pub use config::{Config, ConfigError};
pub use core::{
    EnergyDivisor, FlushReport, LifecycleController, LogDestination, LogFormat,
    LogSink, MovingEnergyFilter, SampleWindow, WindowFlusher,
};
pub use diagnostics::{Diagnostics, SharedDiagnostics};
pub use error::{RecorderError, RecorderResult};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
