//! Session event sources for the recorder.
//!
//! The recorder core depends only on [`SampleListener`] and [`SessionEvent`].
//! A concrete source pushes events through a channel; the binary drains that
//! channel and dispatches each event into the listener.

pub mod simulator;
pub mod types;

// Re-export commonly used types
pub use simulator::{CollectorConfig, CollectorError, SimulatedArmband};
pub use types::{Channels, EmgSample, SampleListener, SessionEvent, CHANNEL_COUNT};

/// Event source used by the binary
pub type Collector = SimulatedArmband;
