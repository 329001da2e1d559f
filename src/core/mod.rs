//! Core recording pipeline.
//!
//! This module contains:
//! - The fixed-capacity sample window
//! - The trailing moving-energy filter
//! - Window flushing to CSV log destinations
//! - The connection lifecycle controller tying them together

pub mod energy;
pub mod flush;
pub mod lifecycle;
pub mod window;

// Re-export commonly used types
pub use energy::{EnergyDivisor, MovingEnergyFilter, DEFAULT_SMOOTHING_LEN};
pub use flush::{FlushReport, LogDestination, LogFormat, LogSink, WindowFlusher};
pub use lifecycle::{ConnectionState, LifecycleController};
pub use window::{SampleWindow, WindowSlot};
