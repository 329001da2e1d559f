//! Trailing moving average of EMG energy.
//!
//! For slot `i` the filter sums the squared readings of all channels over the
//! slots `max(0, i - len) .. i` (the new sample itself is excluded) and
//! normalizes the sum according to an [`EnergyDivisor`].

use crate::core::window::SampleWindow;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default number of trailing slots averaged.
pub const DEFAULT_SMOOTHING_LEN: usize = 60;

/// Normalization applied to the trailing energy sum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyDivisor {
    /// Always divide by the smoothing length. Slots near the start of a window
    /// have fewer than `len` predecessors and come out under-weighted; this
    /// matches the values in logs recorded by earlier versions.
    #[default]
    Fixed,
    /// Divide by the number of trailing slots actually present.
    Available,
}

impl FromStr for EnergyDivisor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "fixed" => Ok(EnergyDivisor::Fixed),
            "available" => Ok(EnergyDivisor::Available),
            other => Err(format!(
                "unknown divisor '{other}' (expected fixed or available)"
            )),
        }
    }
}

/// Streaming smoothed-energy filter over a [`SampleWindow`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MovingEnergyFilter {
    len: usize,
    divisor: EnergyDivisor,
}

impl Default for MovingEnergyFilter {
    fn default() -> Self {
        Self::new(DEFAULT_SMOOTHING_LEN, EnergyDivisor::Fixed)
    }
}

impl MovingEnergyFilter {
    /// Create a filter over `len` trailing slots.
    ///
    /// A zero length is treated as one.
    pub fn new(len: usize, divisor: EnergyDivisor) -> Self {
        Self {
            len: len.max(1),
            divisor,
        }
    }

    /// Smoothed energy for `slot`, computed from the slots before it.
    ///
    /// Slots at or beyond `window.len()` contribute nothing.
    pub fn compute(&self, window: &SampleWindow, slot: usize) -> f64 {
        let start = slot.saturating_sub(self.len);
        let end = slot.min(window.len());
        if end <= start {
            return 0.0;
        }
        // fold from +0.0; an empty f64 sum would be -0.0 and print as "-0"
        let sum = (start..end)
            .filter_map(|i| window.energy_at(i))
            .fold(0.0, |acc, e| acc + e);

        let denominator = match self.divisor {
            EnergyDivisor::Fixed => self.len,
            EnergyDivisor::Available => end - start,
        };
        sum / denominator as f64
    }

    /// Compute the smoothed energy for the newest slot and store it.
    pub fn apply(&self, window: &mut SampleWindow, slot: usize) -> f64 {
        let value = self.compute(window, slot);
        window.store_smoothed(slot, value);
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::types::EmgSample;

    fn fill(
        window: &mut SampleWindow,
        filter: &MovingEnergyFilter,
        count: usize,
        channels: [i8; 8],
    ) {
        for i in 0..count {
            let slot = window.append(&EmgSample::new(i as u64, channels)).unwrap();
            filter.apply(window, slot);
        }
    }

    #[test]
    fn test_steady_signal_reaches_full_energy_at_slot_sixty() {
        let filter = MovingEnergyFilter::default();
        let mut window = SampleWindow::new(250);
        fill(&mut window, &filter, 61, [10, 0, 0, 0, 0, 0, 0, 0]);

        assert!((window.smoothed()[60] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_fixed_divisor_underweights_window_start() {
        let filter = MovingEnergyFilter::default();
        let mut window = SampleWindow::new(250);
        fill(&mut window, &filter, 31, [10, 0, 0, 0, 0, 0, 0, 0]);

        let smoothed = window.smoothed();
        assert_eq!(smoothed[0], 0.0);
        // one predecessor of energy 100 divided by 60
        assert!((smoothed[1] - 100.0 / 60.0).abs() < 1e-9);
        assert!((smoothed[30] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_available_divisor_normalizes_by_present_slots() {
        let filter = MovingEnergyFilter::new(60, EnergyDivisor::Available);
        let mut window = SampleWindow::new(250);
        fill(&mut window, &filter, 31, [10, 0, 0, 0, 0, 0, 0, 0]);

        let smoothed = window.smoothed();
        assert_eq!(smoothed[0], 0.0);
        assert!((smoothed[1] - 100.0).abs() < 1e-9);
        assert!((smoothed[30] - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_slides_past_old_slots() {
        let filter = MovingEnergyFilter::new(4, EnergyDivisor::Fixed);
        let mut window = SampleWindow::new(16);
        fill(&mut window, &filter, 4, [2, 2, 2, 2, 2, 2, 2, 2]); // energy 32
        fill(&mut window, &filter, 5, [0; 8]);

        let smoothed = window.smoothed();
        assert!((smoothed[4] - 32.0).abs() < 1e-9);
        assert!((smoothed[5] - 24.0).abs() < 1e-9);
        assert!((smoothed[8] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_channels_contribute() {
        let filter = MovingEnergyFilter::new(1, EnergyDivisor::Fixed);
        let mut window = SampleWindow::new(4);
        fill(&mut window, &filter, 2, [1, -2, 3, -4, 5, -6, 7, -8]);

        assert!((window.smoothed()[1] - 204.0).abs() < 1e-9);
    }

    #[test]
    fn test_compute_ignores_unfilled_slots() {
        let filter = MovingEnergyFilter::default();
        let mut window = SampleWindow::new(10);
        fill(&mut window, &filter, 2, [10, 0, 0, 0, 0, 0, 0, 0]);

        assert!((filter.compute(&window, 9) - 200.0 / 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_divisor_parsing() {
        assert_eq!("fixed".parse::<EnergyDivisor>(), Ok(EnergyDivisor::Fixed));
        assert_eq!("Available".parse::<EnergyDivisor>(), Ok(EnergyDivisor::Available));
        assert!("mean".parse::<EnergyDivisor>().is_err());
    }

    #[test]
    fn test_zero_length_treated_as_one() {
        let filter = MovingEnergyFilter::new(0, EnergyDivisor::Fixed);
        let mut window = SampleWindow::new(4);
        fill(&mut window, &filter, 2, [1, 1, 1, 1, 1, 1, 1, 1]);

        assert!((window.smoothed()[1] - 8.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_slot_is_positive_zero() {
        for divisor in [EnergyDivisor::Fixed, EnergyDivisor::Available] {
            let filter = MovingEnergyFilter::new(60, divisor);
            let mut window = SampleWindow::new(4);
            fill(&mut window, &filter, 1, [10, 0, 0, 0, 0, 0, 0, 0]);

            let first = window.smoothed()[0];
            assert_eq!(first, 0.0);
            assert!(first.is_sign_positive());
            assert_eq!(first.to_string(), "0");
        }
    }
}
