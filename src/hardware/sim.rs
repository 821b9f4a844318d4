//! Simulated devices.
//!
//! Stand-ins for the LIFX light bars, the Bluetooth speaker and the USB
//! microphone. They keep enough state to answer status queries and let the
//! whole installation run on a machine with no hardware attached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use super::{LightDriver, Microphone, SpeakerDriver, TriggerMeasurement, TriggerSink, TriggerThresholds};
use crate::error::HardwareError;

/// Halloween palette cycled by the ambient pattern: orange, purple, green.
const AMBIENT_HUES: [u16; 3] = [30, 270, 120];

/// Background hum reported when no tone is injected.
const BACKGROUND_HZ: f64 = 120.0;
const BACKGROUND_RMS: f64 = 0.02;

fn unit(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value.clamp(0.0, 1.0) }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

// ============================================================================
// Lights
// ============================================================================

#[derive(Debug)]
struct LightState {
    initialized: bool,
    power: bool,
    brightness: f64,
    hue: u16,
    saturation: f64,
    effect: &'static str,
    step: u64,
}

/// Simulated LIFX light bars.
#[derive(Debug)]
pub struct SimulatedLights {
    names: Vec<String>,
    state: Mutex<LightState>,
}

impl SimulatedLights {
    /// Creates one simulated bar per name; an empty list yields a single bar.
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let names = if names.is_empty() {
            vec!["Simulated Light Bar".to_string()]
        } else {
            names
        };
        Self {
            names,
            state: Mutex::new(LightState {
                initialized: false,
                power: false,
                brightness: 0.0,
                hue: 0,
                saturation: 0.0,
                effect: "off",
                step: 0,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut LightState) -> R) -> R {
        let mut state = self.state.lock().expect("light state lock poisoned");
        f(&mut state)
    }

    /// Name of the effect currently shown.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn effect(&self) -> &'static str {
        self.with_state(|s| s.effect)
    }
}

#[async_trait]
impl LightDriver for SimulatedLights {
    async fn initialize(&self) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.initialized = true;
            s.power = true;
        });
        tracing::info!(devices = self.names.len(), "simulated lights ready");
        Ok(())
    }

    async fn ambient(&self, brightness: f64) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.step += 1;
            s.power = true;
            s.brightness = unit(brightness) * 0.5;
            s.hue = AMBIENT_HUES[usize::try_from(s.step % 3).unwrap_or(0)];
            s.saturation = 1.0;
            s.effect = "ambient";
        });
        Ok(())
    }

    async fn glitch(&self, intensity: f64) -> Result<(), HardwareError> {
        let intensity = unit(intensity);
        self.with_state(|s| {
            s.step += 1;
            s.power = true;
            let flicker = if s.step % 2 == 0 { 0.0 } else { intensity * 0.5 };
            s.brightness = 0.5 * (1.0 - intensity * 0.5) + flicker;
            s.hue = u16::try_from((s.step * 137) % 360).unwrap_or(0);
            s.saturation = 0.8 + 0.2 * intensity;
            s.effect = "glitch";
        });
        Ok(())
    }

    async fn flash(&self, brightness: f64) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.power = true;
            s.brightness = unit(brightness);
            s.hue = 0;
            s.saturation = 0.0;
            s.effect = "flash";
        });
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.power = false;
            s.effect = "off";
        });
        Ok(())
    }

    async fn status(&self) -> Value {
        self.with_state(|s| {
            if !s.initialized {
                return json!({ "connected": false, "devices": [] });
            }
            let devices: Vec<Value> = self
                .names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    json!({
                        "id": format!("sim-{i}"),
                        "name": name,
                        "power": s.power,
                        "brightness": round3(s.brightness),
                        "color": { "hue": s.hue, "saturation": round3(s.saturation) },
                    })
                })
                .collect();
            json!({
                "connected": true,
                "device_count": self.names.len(),
                "effect": s.effect,
                "devices": devices,
            })
        })
    }
}

// ============================================================================
// Speaker
// ============================================================================

#[derive(Debug)]
struct SpeakerState {
    connected: bool,
    playing: bool,
    volume: f64,
    playback_volume: f64,
    distortion: f64,
    scares: u64,
}

/// Simulated Bluetooth speaker.
#[derive(Debug)]
pub struct SimulatedSpeaker {
    address: Option<String>,
    state: Mutex<SpeakerState>,
}

impl SimulatedSpeaker {
    /// Silence between stopping the ambient track and the scare sound.
    pub const SCARE_LEAD_IN: Duration = Duration::from_millis(300);

    /// Creates a disconnected speaker.
    #[must_use]
    pub const fn new(address: Option<String>) -> Self {
        Self {
            address,
            state: Mutex::new(SpeakerState {
                connected: false,
                playing: false,
                volume: 0.5,
                playback_volume: 0.0,
                distortion: 0.0,
                scares: 0,
            }),
        }
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SpeakerState) -> R) -> R {
        let mut state = self.state.lock().expect("speaker state lock poisoned");
        f(&mut state)
    }

    /// Number of scare sounds played so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn scares_played(&self) -> u64 {
        self.with_state(|s| s.scares)
    }
}

#[async_trait]
impl SpeakerDriver for SimulatedSpeaker {
    async fn initialize(&self) -> Result<(), HardwareError> {
        self.with_state(|s| s.connected = true);
        tracing::info!(address = ?self.address, "simulated speaker ready");
        Ok(())
    }

    async fn play_ambient(&self, volume: f64) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.playing = true;
            s.playback_volume = s.volume * unit(volume);
        });
        Ok(())
    }

    async fn apply_distortion(&self, intensity: f64) -> Result<(), HardwareError> {
        let intensity = unit(intensity);
        self.with_state(|s| {
            s.distortion = intensity;
            s.playback_volume = s.volume * (1.0 - intensity * 0.5);
        });
        Ok(())
    }

    async fn play_scare(&self, volume: f64) -> Result<(), HardwareError> {
        self.with_state(|s| s.playing = false);
        tokio::time::sleep(Self::SCARE_LEAD_IN).await;
        self.with_state(|s| {
            s.scares += 1;
            s.playback_volume = unit(volume);
        });
        tracing::info!(volume = unit(volume), "BOO! HAPPY HALLOWEEN!");
        Ok(())
    }

    async fn set_volume(&self, volume: f64) -> Result<(), HardwareError> {
        self.with_state(|s| s.volume = unit(volume));
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), HardwareError> {
        self.with_state(|s| {
            s.playing = false;
            s.distortion = 0.0;
        });
        Ok(())
    }

    async fn status(&self) -> Value {
        self.with_state(|s| {
            json!({
                "connected": s.connected,
                "playing": s.playing,
                "volume": round3(s.volume),
                "distortion": round3(s.distortion),
                "scares_played": s.scares,
            })
        })
    }
}

// ============================================================================
// Microphone
// ============================================================================

struct Worker {
    stop: Arc<AtomicBool>,
    _handle: thread::JoinHandle<()>,
}

/// Simulated USB microphone.
///
/// Produces one frame per `frame_period` on a dedicated OS thread. Frames
/// carry a low background hum unless a tone was injected with
/// [`SimulatedMicrophone::inject_tone`].
pub struct SimulatedMicrophone {
    device: Option<String>,
    sample_rate: u32,
    frame_period: Duration,
    thresholds: Arc<Mutex<TriggerThresholds>>,
    pending_tone: Arc<Mutex<Option<(f64, f64)>>>,
    initialized: AtomicBool,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for SimulatedMicrophone {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulatedMicrophone")
            .field("device", &self.device)
            .field("sample_rate", &self.sample_rate)
            .field("frame_period", &self.frame_period)
            .finish_non_exhaustive()
    }
}

impl SimulatedMicrophone {
    /// Creates an idle microphone.
    #[must_use]
    pub fn new(
        device: Option<String>,
        sample_rate: u32,
        frame_period: Duration,
        thresholds: TriggerThresholds,
    ) -> Self {
        Self {
            device,
            sample_rate,
            frame_period: frame_period.max(Duration::from_millis(1)),
            thresholds: Arc::new(Mutex::new(thresholds)),
            pending_tone: Arc::new(Mutex::new(None)),
            initialized: AtomicBool::new(false),
            worker: Mutex::new(None),
        }
    }

    /// Makes the next frame carry a tone at `frequency` Hz with RMS `amplitude`.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn inject_tone(&self, frequency: f64, amplitude: f64) {
        *self.pending_tone.lock().expect("tone lock poisoned") = Some((frequency, amplitude));
    }

    /// Returns whether a worker thread is producing frames.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.worker.lock().expect("worker lock poisoned").is_some()
    }

    /// Current trigger rule.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn thresholds(&self) -> TriggerThresholds {
        *self.thresholds.lock().expect("threshold lock poisoned")
    }
}

impl Microphone for SimulatedMicrophone {
    fn initialize(&self) -> Result<(), HardwareError> {
        self.initialized.store(true, Ordering::SeqCst);
        tracing::info!(device = self.device.as_deref().unwrap_or("default"), "simulated microphone ready");
        Ok(())
    }

    fn start_listening(&self, sink: TriggerSink) -> Result<(), HardwareError> {
        self.stop_listening();

        let stop = Arc::new(AtomicBool::new(false));
        let period = self.frame_period;
        let thresholds = Arc::clone(&self.thresholds);
        let pending = Arc::clone(&self.pending_tone);
        let flag = Arc::clone(&stop);

        let handle = thread::Builder::new()
            .name("scarebox-audio".to_string())
            .spawn(move || {
                while !flag.load(Ordering::Relaxed) {
                    thread::sleep(period);
                    let (frequency, amplitude) = pending
                        .lock()
                        .expect("tone lock poisoned")
                        .take()
                        .unwrap_or((BACKGROUND_HZ, BACKGROUND_RMS));
                    let triggered = thresholds
                        .lock()
                        .expect("threshold lock poisoned")
                        .matches(frequency, amplitude);
                    sink.offer(TriggerMeasurement {
                        timestamp: Utc::now(),
                        amplitude,
                        peak: (amplitude * std::f64::consts::SQRT_2).min(1.0),
                        dominant_frequency: frequency,
                        triggered,
                    });
                    if sink.is_closed() {
                        break;
                    }
                }
            })
            .map_err(|e| HardwareError::CommandFailed {
                device: "microphone",
                command: "start_listening",
                reason: e.to_string(),
            })?;

        *self.worker.lock().expect("worker lock poisoned") = Some(Worker {
            stop,
            _handle: handle,
        });
        Ok(())
    }

    fn stop_listening(&self) {
        if let Some(worker) = self.worker.lock().expect("worker lock poisoned").take() {
            // The thread notices within one frame period.
            worker.stop.store(true, Ordering::Relaxed);
        }
    }

    fn set_thresholds(&self, thresholds: TriggerThresholds) {
        *self.thresholds.lock().expect("threshold lock poisoned") = thresholds;
    }

    fn status(&self) -> Value {
        json!({
            "connected": self.initialized.load(Ordering::SeqCst),
            "listening": self.is_listening(),
            "device": self.device.as_deref().unwrap_or("default"),
            "sample_rate": self.sample_rate,
        })
    }
}

impl Drop for SimulatedMicrophone {
    fn drop(&mut self) {
        self.stop_listening();
    }
}
