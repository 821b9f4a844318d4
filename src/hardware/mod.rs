//! Hardware collaborators
//!
//! Narrow interfaces to the lighting, speaker and microphone devices. The
//! controller only talks to these traits; the binary wires in the simulated
//! implementations from [`sim`].

pub mod sim;

pub use sim::{SimulatedLights, SimulatedMicrophone, SimulatedSpeaker};

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::HardwareError;
use crate::observability::metrics;

/// One analysed audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerMeasurement {
    /// When the frame was captured.
    pub timestamp: DateTime<Utc>,
    /// RMS amplitude in `0.0..=1.0`.
    pub amplitude: f64,
    /// Peak absolute sample value.
    pub peak: f64,
    /// Dominant frequency in Hz.
    pub dominant_frequency: f64,
    /// Whether the frame satisfies the trigger rule.
    pub triggered: bool,
}

/// Frequency band and loudness that count as a trigger.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerThresholds {
    /// Lower band edge in Hz.
    pub frequency_min: f64,
    /// Upper band edge in Hz.
    pub frequency_max: f64,
    /// Minimum RMS amplitude.
    pub amplitude: f64,
}

impl Default for TriggerThresholds {
    fn default() -> Self {
        Self {
            frequency_min: 800.0,
            frequency_max: 1200.0,
            amplitude: 0.3,
        }
    }
}

impl TriggerThresholds {
    /// Applies the trigger rule to one frame.
    #[must_use]
    pub fn matches(&self, dominant_frequency: f64, amplitude: f64) -> bool {
        (self.frequency_min..=self.frequency_max).contains(&dominant_frequency)
            && amplitude >= self.amplitude
    }
}

/// Non-blocking hand-off from the audio context into the controller.
///
/// Backed by a bounded channel. [`TriggerSink::offer`] never waits: when the
/// queue is full the frame is dropped and counted.
#[derive(Debug, Clone)]
pub struct TriggerSink {
    tx: mpsc::Sender<TriggerMeasurement>,
}

impl TriggerSink {
    /// Creates a sink and the receiver the controller drains.
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<TriggerMeasurement>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Offers one frame. Returns `false` if it was dropped.
    pub fn offer(&self, measurement: TriggerMeasurement) -> bool {
        match self.tx.try_send(measurement) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                metrics::record_audio_frame_dropped();
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Returns `true` once the receiving side is gone.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Addressable lighting.
#[async_trait]
pub trait LightDriver: Send + Sync {
    /// Discovers and powers on the lights.
    async fn initialize(&self) -> Result<(), HardwareError>;

    /// Calm ambient pattern at `brightness` (`0.0..=1.0`).
    async fn ambient(&self, brightness: f64) -> Result<(), HardwareError>;

    /// Flicker effect; higher `intensity` flickers harder.
    async fn glitch(&self, intensity: f64) -> Result<(), HardwareError>;

    /// Bright white flash.
    async fn flash(&self, brightness: f64) -> Result<(), HardwareError>;

    /// Powers the lights off.
    async fn shutdown(&self) -> Result<(), HardwareError>;

    /// Device status map, relayed verbatim to clients.
    async fn status(&self) -> Value;
}

/// Audio output.
#[async_trait]
pub trait SpeakerDriver: Send + Sync {
    /// Opens the audio output.
    async fn initialize(&self) -> Result<(), HardwareError>;

    /// Starts the looping ambient track at `volume`.
    async fn play_ambient(&self, volume: f64) -> Result<(), HardwareError>;

    /// Applies distortion; `0.0` clears it.
    async fn apply_distortion(&self, intensity: f64) -> Result<(), HardwareError>;

    /// Plays the scare sound at `volume`.
    async fn play_scare(&self, volume: f64) -> Result<(), HardwareError>;

    /// Sets the master volume (clamped to `0.0..=1.0`).
    async fn set_volume(&self, volume: f64) -> Result<(), HardwareError>;

    /// Stops playback and releases the output.
    async fn shutdown(&self) -> Result<(), HardwareError>;

    /// Device status map, relayed verbatim to clients.
    async fn status(&self) -> Value;
}

/// Audio input with trigger detection.
///
/// Frames are produced on a driver-owned thread and pushed through the
/// [`TriggerSink`]; implementations must never block that thread on the
/// controller.
pub trait Microphone: Send + Sync {
    /// Opens the input device.
    ///
    /// # Errors
    ///
    /// Returns [`HardwareError::Unavailable`] if no input device is found.
    fn initialize(&self) -> Result<(), HardwareError>;

    /// Starts producing frames into `sink`. Restarts if already listening.
    ///
    /// # Errors
    ///
    /// Returns a [`HardwareError`] if the input stream cannot be opened.
    fn start_listening(&self, sink: TriggerSink) -> Result<(), HardwareError>;

    /// Stops producing frames. No-op when not listening.
    fn stop_listening(&self);

    /// Replaces the trigger rule for subsequent frames.
    fn set_thresholds(&self, thresholds: TriggerThresholds);

    /// Device status map, relayed verbatim to clients.
    fn status(&self) -> Value;
}

/// The three collaborators the controller drives.
#[derive(Clone)]
pub struct Devices {
    /// Audio input.
    pub microphone: Arc<dyn Microphone>,
    /// Lighting.
    pub lights: Arc<dyn LightDriver>,
    /// Audio output.
    pub speaker: Arc<dyn SpeakerDriver>,
}

impl std::fmt::Debug for Devices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Devices").finish_non_exhaustive()
    }
}

impl Devices {
    /// Simulated devices configured from settings.
    #[must_use]
    pub fn simulated(settings: &crate::config::Settings) -> Self {
        let frame_period = settings.audio.frame_period();
        Self {
            microphone: Arc::new(SimulatedMicrophone::new(
                settings.hardware.microphone_device.clone(),
                settings.audio.sample_rate,
                frame_period,
                settings.audio.thresholds(),
            )),
            lights: Arc::new(SimulatedLights::new(settings.hardware.lifx_devices.clone())),
            speaker: Arc::new(SimulatedSpeaker::new(
                settings.hardware.speaker_address.clone(),
            )),
        }
    }
}

/// Upper bound for a single effect call made from the controller loop.
pub const EFFECT_TIMEOUT: Duration = Duration::from_millis(500);
