//! Event types delivered by an armband session.
//!
//! A session produces three kinds of events: connection, disconnection and
//! raw EMG samples. The recorder core only ever sees these events, never the
//! device or transport behind them.

use serde::{Deserialize, Serialize};

/// Number of EMG pods on the armband.
pub const CHANNEL_COUNT: usize = 8;

/// Raw readings from every pod at one instant.
pub type Channels = [i8; CHANNEL_COUNT];

/// One EMG sample as delivered by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmgSample {
    /// Device arrival time in microseconds, monotonic within a session
    pub timestamp: u64,
    /// Raw per-pod readings
    pub channels: Channels,
}

impl EmgSample {
    pub fn new(timestamp: u64, channels: Channels) -> Self {
        Self {
            timestamp,
            channels,
        }
    }
}

/// Unified event type for an armband session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionEvent {
    Connected,
    Disconnected,
    Sample(EmgSample),
}

impl SessionEvent {
    /// Route this event into a listener.
    pub fn dispatch<L: SampleListener + ?Sized>(self, listener: &mut L) {
        match self {
            SessionEvent::Connected => listener.on_connect(),
            SessionEvent::Disconnected => listener.on_disconnect(),
            SessionEvent::Sample(s) => listener.on_sample(s.timestamp, s.channels),
        }
    }
}

/// Receiver of armband session events.
///
/// Implementors must tolerate any interleaving of connect and disconnect;
/// samples arrive in strict timestamp order.
pub trait SampleListener {
    /// Called once per physical sample.
    fn on_sample(&mut self, timestamp: u64, channels: Channels);

    /// Called once per successful session establishment.
    fn on_connect(&mut self);

    /// Called once per session loss.
    fn on_disconnect(&mut self);
}
