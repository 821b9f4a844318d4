//! Configuration schema
//!
//! Strongly-typed settings deserialized from YAML. Every field has a
//! default, so an empty or missing file yields a working installation.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::hardware::TriggerThresholds;
use crate::sequence::{Mode, SequenceTiming};

/// Default configuration file name.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Startup intensity profile.
    pub mode: Mode,
    /// Audio capture and trigger detection.
    pub audio: AudioSettings,
    /// Sequence timing, in seconds.
    pub timing: TimingSettings,
    /// Device selection.
    pub hardware: HardwareSettings,
    /// Per-mode intensity multipliers.
    pub intensity: IntensitySettings,
    /// HTTP server.
    pub server: ServerSettings,
    /// Live telemetry and event log sizing.
    pub telemetry: TelemetrySettings,
}

/// Audio capture and trigger detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Lower edge of the trigger band in Hz.
    pub trigger_frequency_min: f64,
    /// Upper edge of the trigger band in Hz.
    pub trigger_frequency_max: f64,
    /// Minimum RMS amplitude for a trigger.
    pub trigger_amplitude_threshold: f64,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
    /// Samples per analysed frame.
    pub chunk_size: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            trigger_frequency_min: 800.0,
            trigger_frequency_max: 1200.0,
            trigger_amplitude_threshold: 0.3,
            sample_rate: 44_100,
            chunk_size: 1024,
        }
    }
}

impl AudioSettings {
    /// The trigger rule these settings describe.
    #[must_use]
    pub const fn thresholds(&self) -> TriggerThresholds {
        TriggerThresholds {
            frequency_min: self.trigger_frequency_min,
            frequency_max: self.trigger_frequency_max,
            amplitude: self.trigger_amplitude_threshold,
        }
    }

    /// Wall-clock length of one frame (`chunk_size / sample_rate`).
    #[must_use]
    pub fn frame_period(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::from_millis(23);
        }
        Duration::from_secs_f64(f64::from(self.chunk_size) / f64::from(self.sample_rate))
    }
}

/// Sequence timing in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSettings {
    /// Countdown phase length.
    pub countdown_duration: f64,
    /// Active phase length.
    pub active_duration: f64,
    /// Resetting phase length.
    pub reset_duration: f64,
    /// Delay from entering the active phase to the scare sound.
    pub scream_delay: f64,
}

impl Default for TimingSettings {
    fn default() -> Self {
        Self {
            countdown_duration: 3.0,
            active_duration: 2.0,
            reset_duration: 5.0,
            scream_delay: 2.0,
        }
    }
}

impl TimingSettings {
    /// Durations handed to the sequence machine.
    #[must_use]
    pub fn sequence_timing(&self) -> SequenceTiming {
        SequenceTiming {
            countdown: seconds(self.countdown_duration),
            active: seconds(self.active_duration),
            reset: seconds(self.reset_duration),
        }
    }

    /// Scream delay as a duration.
    #[must_use]
    pub fn scream_delay(&self) -> Duration {
        seconds(self.scream_delay)
    }

    /// Reset ramp length as a duration.
    #[must_use]
    pub fn reset(&self) -> Duration {
        seconds(self.reset_duration)
    }
}

/// Converts seconds to a duration; negative or non-finite values become zero.
#[must_use]
pub fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Device selection.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareSettings {
    /// Input device name substring; `None` picks the default input.
    pub microphone_device: Option<String>,
    /// Bluetooth address of the speaker.
    pub speaker_address: Option<String>,
    /// Light bar labels.
    pub lifx_devices: Vec<String>,
}

/// Multipliers for one mode.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensityLevel {
    /// Light brightness multiplier.
    pub brightness: f64,
    /// Speaker volume multiplier.
    pub volume: f64,
}

impl Default for IntensityLevel {
    fn default() -> Self {
        Self {
            brightness: 1.0,
            volume: 1.0,
        }
    }
}

/// Per-mode intensity multipliers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntensitySettings {
    /// Child mode.
    pub child: IntensityLevel,
    /// Adult mode.
    pub adult: IntensityLevel,
}

impl Default for IntensitySettings {
    fn default() -> Self {
        Self {
            child: IntensityLevel {
                brightness: 0.6,
                volume: 0.5,
            },
            adult: IntensityLevel::default(),
        }
    }
}

impl IntensitySettings {
    /// Multipliers for `mode`.
    #[must_use]
    pub const fn for_mode(&self, mode: Mode) -> IntensityLevel {
        match mode {
            Mode::Child => self.child,
            Mode::Adult => self.adult,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind.
    pub host: String,
    /// Port to bind.
    pub port: u16,
    /// Allowed CORS origins; `"*"` allows any.
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
            ],
        }
    }
}

impl ServerSettings {
    /// `host:port` string suitable for binding.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Live telemetry settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Seconds between `light_status` pushes.
    pub light_status_interval: f64,
    /// Events kept in the ring buffer.
    pub event_log_capacity: usize,
    /// Messages buffered per live subscriber before it is dropped.
    pub subscriber_queue: usize,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            light_status_interval: 0.5,
            event_log_capacity: crate::observability::event_log::DEFAULT_CAPACITY,
            subscriber_queue: 256,
        }
    }
}

impl TelemetrySettings {
    /// Light status poll interval; never shorter than 10 ms.
    #[must_use]
    pub fn light_status_period(&self) -> Duration {
        seconds(self.light_status_interval).max(Duration::from_millis(10))
    }
}

/// The externally visible configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuntimeConfig {
    /// Current mode.
    pub mode: Mode,
    /// Trigger detection.
    pub audio: RuntimeAudio,
    /// Sequence timing.
    pub timing: TimingSettings,
}

/// Audio part of [`RuntimeConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RuntimeAudio {
    /// Lower edge of the trigger band in Hz.
    pub trigger_frequency_min: f64,
    /// Upper edge of the trigger band in Hz.
    pub trigger_frequency_max: f64,
    /// Minimum RMS amplitude for a trigger.
    pub trigger_amplitude_threshold: f64,
    /// Capture sample rate in Hz.
    pub sample_rate: u32,
}

impl From<&Settings> for RuntimeConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            mode: settings.mode,
            audio: RuntimeAudio {
                trigger_frequency_min: settings.audio.trigger_frequency_min,
                trigger_frequency_max: settings.audio.trigger_frequency_max,
                trigger_amplitude_threshold: settings.audio.trigger_amplitude_threshold,
                sample_rate: settings.audio.sample_rate,
            },
            timing: settings.timing,
        }
    }
}
