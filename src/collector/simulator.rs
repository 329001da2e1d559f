//! Simulated armband session.
//!
//! Stands in for the vendor hub: after an optional pairing delay it reports a
//! connection, streams 8-channel EMG samples at the configured rate, and can
//! periodically drop and re-establish the session to exercise reconnects.

use crate::collector::types::{Channels, EmgSample, SessionEvent, CHANNEL_COUNT};
use crate::error::RecorderError;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, info};

/// Queue depth between the session thread and the consumer.
const EVENT_QUEUE_CAPACITY: usize = 10_000;

/// Pause between a simulated drop and the following reconnect.
const RECONNECT_GAP: Duration = Duration::from_millis(200);

/// Configuration for the simulated armband.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Samples per second on every channel
    pub sample_rate_hz: u32,
    /// Peak muscle activation, in raw units
    pub amplitude: i8,
    /// Time before the armband pairs
    #[serde(with = "crate::config::duration_ms")]
    pub connect_delay: Duration,
    /// Drop and re-establish the session this often (disabled when `None`)
    #[serde(with = "crate::config::option_duration_ms")]
    pub dropout_every: Option<Duration>,
    /// Random seed for reproducible signals
    pub seed: Option<u64>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 200,
            amplitude: 60,
            connect_delay: Duration::from_millis(500),
            dropout_every: None,
            seed: None,
        }
    }
}

/// Errors that can occur while driving the simulated session.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector is already running")]
    AlreadyRunning,
    #[error("Sample rate must be non-zero")]
    InvalidRate,
    #[error("Failed to spawn session thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// A simulated armband that emits session events from a background thread.
pub struct SimulatedArmband {
    config: CollectorConfig,
    sender: Sender<SessionEvent>,
    receiver: Receiver<SessionEvent>,
    ready: Receiver<()>,
    ready_sender: Sender<()>,
    running: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl SimulatedArmband {
    /// Create a new simulated armband.
    pub fn new(config: CollectorConfig) -> Self {
        let (sender, receiver) = bounded(EVENT_QUEUE_CAPACITY);
        let (ready_sender, ready) = bounded(1);
        Self {
            config,
            sender,
            receiver,
            ready,
            ready_sender,
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// Start the session thread.
    pub fn start(&mut self) -> Result<(), CollectorError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning);
        }
        if self.config.sample_rate_hz == 0 {
            return Err(CollectorError::InvalidRate);
        }
        self.running.store(true, Ordering::SeqCst);

        let session = Session {
            config: self.config.clone(),
            events: self.sender.clone(),
            ready: self.ready_sender.clone(),
            running: Arc::clone(&self.running),
        };
        let handle = thread::Builder::new()
            .name("armband-session".to_string())
            .spawn(move || session.run());

        match handle {
            Ok(handle) => {
                self.worker = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(CollectorError::Spawn(e))
            }
        }
    }

    /// Block until the armband pairs, or fail after `timeout`.
    pub fn wait_for_armband(&self, timeout: Duration) -> Result<(), RecorderError> {
        match self.ready.recv_timeout(timeout) {
            Ok(()) => Ok(()),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Err(RecorderError::AcquisitionFailure { waited: timeout })
            }
        }
    }

    /// Stop the session thread and wait for it to exit.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }

    /// Get the receiver for session events.
    pub fn receiver(&self) -> &Receiver<SessionEvent> {
        &self.receiver
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&self) -> Option<SessionEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for SimulatedArmband {
    fn drop(&mut self) {
        self.stop();
    }
}

/// State owned by the session thread.
struct Session {
    config: CollectorConfig,
    events: Sender<SessionEvent>,
    ready: Sender<()>,
    running: Arc<AtomicBool>,
}

impl Session {
    fn run(self) {
        if !self.sleep_while_running(self.config.connect_delay) {
            return;
        }
        let _ = self.ready.try_send(());

        let seed = self.config.seed.unwrap_or_else(|| {
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default()
        });
        let mut generator =
            SignalGenerator::new(seed, self.config.amplitude, self.config.sample_rate_hz);
        let interval = Duration::from_secs_f64(1.0 / f64::from(self.config.sample_rate_hz));
        let mut device_clock = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or_default();

        while self.running.load(Ordering::SeqCst) {
            info!("Armband connected");
            if !self.emit(SessionEvent::Connected) {
                return;
            }

            let epoch_start = Instant::now();
            let mut next_due = epoch_start;
            loop {
                if !self.running.load(Ordering::SeqCst) {
                    let _ = self.events.try_send(SessionEvent::Disconnected);
                    return;
                }
                if let Some(every) = self.config.dropout_every {
                    if epoch_start.elapsed() >= every {
                        break;
                    }
                }

                let sample = EmgSample::new(device_clock, generator.next_channels());
                if !self.emit(SessionEvent::Sample(sample)) {
                    debug!("Event queue closed or stopped, ending session");
                    return;
                }
                device_clock += interval.as_micros() as u64;

                next_due += interval;
                let now = Instant::now();
                if next_due > now {
                    thread::sleep(next_due - now);
                }
            }

            info!("Armband session dropped");
            if !self.emit(SessionEvent::Disconnected) {
                return;
            }
            if !self.sleep_while_running(RECONNECT_GAP) {
                return;
            }
        }
    }

    /// Queue an event, giving up if the session is stopped while the queue is full.
    fn emit(&self, mut event: SessionEvent) -> bool {
        loop {
            match self.events.send_timeout(event, Duration::from_millis(50)) {
                Ok(()) => return true,
                Err(SendTimeoutError::Timeout(pending)) => {
                    if !self.running.load(Ordering::SeqCst) {
                        return false;
                    }
                    event = pending;
                }
                Err(SendTimeoutError::Disconnected(_)) => return false,
            }
        }
    }

    /// Sleep in short steps, returning false if stopped meanwhile.
    fn sleep_while_running(&self, total: Duration) -> bool {
        let step = Duration::from_millis(10);
        let deadline = Instant::now() + total;
        loop {
            if !self.running.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep(step.min(deadline - now));
        }
    }
}

/// Synthetic EMG: noise under a slow contraction envelope, phase-shifted per pod.
struct SignalGenerator {
    rng: StdRng,
    amplitude: f64,
    sample_rate: f64,
    tick: u64,
}

/// Contraction cycles per second.
const ACTIVATION_HZ: f64 = 0.5;

/// Resting noise floor as a fraction of the amplitude.
const NOISE_FLOOR: f64 = 0.08;

impl SignalGenerator {
    fn new(seed: u64, amplitude: i8, sample_rate_hz: u32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            amplitude: f64::from(amplitude.unsigned_abs()),
            sample_rate: f64::from(sample_rate_hz),
            tick: 0,
        }
    }

    fn next_channels(&mut self) -> Channels {
        let t = self.tick as f64 / self.sample_rate;
        self.tick += 1;

        let mut channels = [0i8; CHANNEL_COUNT];
        for (pod, value) in channels.iter_mut().enumerate() {
            let phase = pod as f64 * std::f64::consts::PI / CHANNEL_COUNT as f64;
            let envelope = (2.0 * std::f64::consts::PI * ACTIVATION_HZ * t + phase)
                .sin()
                .max(0.0);
            let spread = self.amplitude * (NOISE_FLOOR + (1.0 - NOISE_FLOOR) * envelope);
            let raw = self.rng.gen_range(-1.0f64..=1.0) * spread;
            *value = raw.round().clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8;
        }
        channels
    }
}
