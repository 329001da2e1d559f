//! Fixed-capacity sample window.
//!
//! Samples are appended into numbered slots until the window is full. Later
//! arrivals are rejected rather than overwriting older slots, so a window
//! always holds the first `capacity` samples since the last reset. Only slots
//! below [`SampleWindow::len`] are ever readable.

use crate::collector::types::{Channels, EmgSample, CHANNEL_COUNT};
use crate::error::{RecorderError, RecorderResult};

/// One filled slot of a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSlot {
    /// Position within the window, oldest first
    pub index: usize,
    /// Device arrival time in microseconds
    pub timestamp: u64,
    /// Trailing mean energy computed when the slot was filled
    pub smoothed: f64,
    /// Raw per-pod readings
    pub channels: Channels,
}

/// Per-channel sample history with timestamps and smoothed energy.
#[derive(Debug, Clone)]
pub struct SampleWindow {
    channels: [Vec<i8>; CHANNEL_COUNT],
    smoothed: Vec<f64>,
    timestamps: Vec<u64>,
    filled: usize,
}

impl SampleWindow {
    /// Create an empty window holding up to `capacity` samples.
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: std::array::from_fn(|_| vec![0; capacity]),
            smoothed: vec![0.0; capacity],
            timestamps: vec![0; capacity],
            filled: 0,
        }
    }

    /// Maximum number of samples the window holds.
    pub fn capacity(&self) -> usize {
        self.timestamps.len()
    }

    /// Number of filled slots.
    pub fn len(&self) -> usize {
        self.filled
    }

    pub fn is_empty(&self) -> bool {
        self.filled == 0
    }

    pub fn is_full(&self) -> bool {
        self.filled == self.capacity()
    }

    /// Store a sample in the next free slot and return its index.
    ///
    /// A full window rejects the sample with [`RecorderError::WindowFull`]
    /// and is left unchanged.
    pub fn append(&mut self, sample: &EmgSample) -> RecorderResult<usize> {
        if self.is_full() {
            return Err(RecorderError::WindowFull {
                capacity: self.capacity(),
            });
        }

        let slot = self.filled;
        for (history, &value) in self.channels.iter_mut().zip(sample.channels.iter()) {
            history[slot] = value;
        }
        self.timestamps[slot] = sample.timestamp;
        self.smoothed[slot] = 0.0;
        self.filled += 1;
        Ok(slot)
    }

    /// Record the smoothed energy of the newest slot.
    ///
    /// Earlier slots are never rewritten.
    pub(crate) fn store_smoothed(&mut self, slot: usize, value: f64) {
        debug_assert_eq!(slot + 1, self.filled, "only the newest slot takes a smoothed value");
        if slot + 1 == self.filled {
            self.smoothed[slot] = value;
        }
    }

    /// Filled history of one channel.
    ///
    /// # Panics
    ///
    /// Panics if `channel >= CHANNEL_COUNT`.
    pub fn channel(&self, channel: usize) -> &[i8] {
        &self.channels[channel][..self.filled]
    }

    /// Sum of squared readings across all channels at `slot`.
    pub fn energy_at(&self, slot: usize) -> Option<f64> {
        if slot >= self.filled {
            return None;
        }
        Some(
            self.channels
                .iter()
                .map(|history| {
                    let v = f64::from(history[slot]);
                    v * v
                })
                .sum(),
        )
    }

    /// Smoothed values of the filled slots.
    pub fn smoothed(&self) -> &[f64] {
        &self.smoothed[..self.filled]
    }

    /// Arrival times of the filled slots.
    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps[..self.filled]
    }

    /// Read a filled slot.
    pub fn slot(&self, index: usize) -> Option<WindowSlot> {
        if index >= self.filled {
            return None;
        }
        Some(WindowSlot {
            index,
            timestamp: self.timestamps[index],
            smoothed: self.smoothed[index],
            channels: std::array::from_fn(|c| self.channels[c][index]),
        })
    }

    /// Iterate the filled slots, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = WindowSlot> + '_ {
        (0..self.filled).filter_map(move |i| self.slot(i))
    }

    /// Mark every slot free. Slot contents are left stale.
    pub fn reset(&mut self) {
        self.filled = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(ts: u64, first: i8) -> EmgSample {
        EmgSample::new(ts, [first, 0, 0, 0, 0, 0, 0, -first])
    }

    #[test]
    fn test_window_creation() {
        let window = SampleWindow::new(250);
        assert_eq!(window.capacity(), 250);
        assert!(window.is_empty());
        assert!(!window.is_full());
        assert!(window.slot(0).is_none());
    }

    #[test]
    fn test_append_increments_by_one() {
        let mut window = SampleWindow::new(4);
        for i in 0..4u64 {
            let before = window.len();
            let slot = window.append(&sample(i * 5000, i as i8)).unwrap();
            assert_eq!(slot, before);
            assert_eq!(window.len(), before + 1);
        }
        assert!(window.is_full());
        assert_eq!(window.timestamps(), &[0, 5000, 10000, 15000]);
        assert_eq!(window.channel(0), &[0, 1, 2, 3]);
        assert_eq!(window.channel(7), &[0, -1, -2, -3]);
    }

    #[test]
    fn test_full_window_rejects_and_keeps_contents() {
        let mut window = SampleWindow::new(3);
        for i in 0..3 {
            window.append(&sample(i, 1)).unwrap();
        }

        for _ in 0..5 {
            let err = window.append(&sample(99, 42)).unwrap_err();
            assert!(matches!(err, RecorderError::WindowFull { capacity: 3 }));
        }
        assert_eq!(window.len(), 3);
        assert_eq!(window.timestamps(), &[0, 1, 2]);
        assert!(window.iter().all(|s| s.channels[0] == 1));
    }

    #[test]
    fn test_reset_hides_stale_slots() {
        let mut window = SampleWindow::new(3);
        window.append(&sample(1, 9)).unwrap();
        window.append(&sample(2, 9)).unwrap();
        window.reset();

        assert!(window.is_empty());
        assert!(window.slot(0).is_none());
        assert!(window.channel(0).is_empty());
        assert_eq!(window.iter().count(), 0);

        assert_eq!(window.append(&sample(3, 4)).unwrap(), 0);
        assert_eq!(window.slot(0).unwrap().timestamp, 3);
    }

    #[test]
    fn test_smoothed_only_written_for_newest_slot() {
        let mut window = SampleWindow::new(3);
        let slot = window.append(&sample(1, 2)).unwrap();
        window.store_smoothed(slot, 12.5);
        window.append(&sample(2, 2)).unwrap();

        assert_eq!(window.smoothed(), &[12.5, 0.0]);
        assert_eq!(window.energy_at(0), Some(8.0));
        assert_eq!(window.energy_at(2), None);
    }

    #[test]
    fn test_energy_sums_squares_over_channels() {
        let mut window = SampleWindow::new(2);
        window.append(&EmgSample::new(0, [3, -4, 0, 0, 0, 0, 0, 0])).unwrap();
        window.append(&EmgSample::new(1, [i8::MIN; 8])).unwrap();

        assert_eq!(window.energy_at(0), Some(25.0));
        assert_eq!(window.energy_at(1), Some(8.0 * 16384.0));
    }

    #[test]
    fn test_zero_capacity_window_is_always_full() {
        let mut window = SampleWindow::new(0);
        assert!(window.is_full());
        assert!(window.append(&sample(0, 1)).is_err());
    }
}
