//! Shared integration-test harness: recording and failing fake drivers plus a
//! controller wired to them with fast timing.

#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use scarebox::config::{MemoryStore, Settings};
use scarebox::controller::{Controller, ControllerOptions};
use scarebox::error::HardwareError;
use scarebox::hardware::{
    Devices, LightDriver, Microphone, SpeakerDriver, TriggerMeasurement, TriggerSink,
    TriggerThresholds,
};
use scarebox::hub::ChannelSubscriber;
use scarebox::observer::FnObserver;
use scarebox::sequence::{PhaseTransition, SequenceMachine};

/// Upper bound for any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(5);

// ============================================================================
// Fake drivers
// ============================================================================

/// Shared call journal.
#[derive(Debug, Default)]
pub struct Journal {
    calls: Mutex<Vec<String>>,
}

impl Journal {
    pub fn push(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }
}

/// Lights that record every call and can be told to fail or to glitch slowly.
#[derive(Debug, Default)]
pub struct RecordingLights {
    pub journal: Journal,
    pub fail: AtomicBool,
    pub glitch_delay_ms: AtomicU64,
}

impl RecordingLights {
    fn call(&self, name: &'static str, arg: Option<f64>) -> Result<(), HardwareError> {
        match arg {
            Some(v) => self.journal.push(format!("{name}({v:.2})")),
            None => self.journal.push(name),
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HardwareError::CommandFailed {
                device: "lights",
                command: name,
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl LightDriver for RecordingLights {
    async fn initialize(&self) -> Result<(), HardwareError> {
        self.call("initialize", None)
    }
    async fn ambient(&self, brightness: f64) -> Result<(), HardwareError> {
        self.call("ambient", Some(brightness))
    }
    async fn glitch(&self, intensity: f64) -> Result<(), HardwareError> {
        let result = self.call("glitch", Some(intensity));
        let delay = self.glitch_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        result
    }
    async fn flash(&self, brightness: f64) -> Result<(), HardwareError> {
        self.call("flash", Some(brightness))
    }
    async fn shutdown(&self) -> Result<(), HardwareError> {
        self.call("shutdown", None)
    }
    async fn status(&self) -> Value {
        json!({ "connected": true, "device_count": 1 })
    }
}

/// Speaker that records every call and can be told to fail.
#[derive(Debug, Default)]
pub struct RecordingSpeaker {
    pub journal: Journal,
    pub fail: AtomicBool,
}

impl RecordingSpeaker {
    fn call(&self, name: &'static str, arg: Option<f64>) -> Result<(), HardwareError> {
        match arg {
            Some(v) => self.journal.push(format!("{name}({v:.2})")),
            None => self.journal.push(name),
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(HardwareError::CommandFailed {
                device: "speaker",
                command: name,
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SpeakerDriver for RecordingSpeaker {
    async fn initialize(&self) -> Result<(), HardwareError> {
        self.call("initialize", None)
    }
    async fn play_ambient(&self, volume: f64) -> Result<(), HardwareError> {
        self.call("play_ambient", Some(volume))
    }
    async fn apply_distortion(&self, intensity: f64) -> Result<(), HardwareError> {
        self.call("apply_distortion", Some(intensity))
    }
    async fn play_scare(&self, volume: f64) -> Result<(), HardwareError> {
        self.call("play_scare", Some(volume))
    }
    async fn set_volume(&self, volume: f64) -> Result<(), HardwareError> {
        self.call("set_volume", Some(volume))
    }
    async fn shutdown(&self) -> Result<(), HardwareError> {
        self.call("shutdown", None)
    }
    async fn status(&self) -> Value {
        json!({ "connected": true })
    }
}

/// Microphone driven by the test through [`FakeMicrophone::emit`].
#[derive(Debug, Default)]
pub struct FakeMicrophone {
    sink: Mutex<Option<TriggerSink>>,
    thresholds: Mutex<Option<TriggerThresholds>>,
    pub fail_init: AtomicBool,
}

impl FakeMicrophone {
    /// Pushes one frame as the audio thread would. Returns `false` when not
    /// listening or the queue is full.
    pub fn emit(&self, triggered: bool) -> bool {
        let sink = self.sink.lock().unwrap().clone();
        sink.is_some_and(|s| s.offer(measurement(triggered)))
    }

    pub fn is_listening(&self) -> bool {
        self.sink.lock().unwrap().is_some()
    }

    pub fn thresholds(&self) -> Option<TriggerThresholds> {
        *self.thresholds.lock().unwrap()
    }
}

impl Microphone for FakeMicrophone {
    fn initialize(&self) -> Result<(), HardwareError> {
        if self.fail_init.load(Ordering::SeqCst) {
            return Err(HardwareError::Unavailable {
                device: "microphone",
                reason: "no input device".to_string(),
            });
        }
        Ok(())
    }

    fn start_listening(&self, sink: TriggerSink) -> Result<(), HardwareError> {
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop_listening(&self) {
        self.sink.lock().unwrap().take();
    }

    fn set_thresholds(&self, thresholds: TriggerThresholds) {
        *self.thresholds.lock().unwrap() = Some(thresholds);
    }

    fn status(&self) -> Value {
        json!({ "listening": self.is_listening() })
    }
}

/// A frame in the trigger band when `triggered`, background noise otherwise.
pub fn measurement(triggered: bool) -> TriggerMeasurement {
    TriggerMeasurement {
        timestamp: chrono::Utc::now(),
        amplitude: if triggered { 0.6 } else { 0.02 },
        peak: if triggered { 0.8 } else { 0.05 },
        dominant_frequency: if triggered { 1000.0 } else { 120.0 },
        triggered,
    }
}

// ============================================================================
// Harness
// ============================================================================

/// Settings with sub-second phases so whole runs fit in a test.
pub fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.timing.countdown_duration = 0.1;
    settings.timing.active_duration = 0.05;
    settings.timing.reset_duration = 0.05;
    settings.timing.scream_delay = 0.0;
    settings.telemetry.light_status_interval = 0.05;
    settings
}

/// A controller wired to recording fakes.
pub struct Harness {
    pub controller: Controller,
    pub lights: Arc<RecordingLights>,
    pub speaker: Arc<RecordingSpeaker>,
    pub microphone: Arc<FakeMicrophone>,
    pub store: Arc<MemoryStore>,
}

impl Harness {
    pub fn new(settings: Settings) -> Self {
        let lights = Arc::new(RecordingLights::default());
        let speaker = Arc::new(RecordingSpeaker::default());
        let microphone = Arc::new(FakeMicrophone::default());
        let store = Arc::new(MemoryStore::new(settings.clone()));
        let devices = Devices {
            microphone: microphone.clone(),
            lights: lights.clone(),
            speaker: speaker.clone(),
        };
        let controller = Controller::spawn(ControllerOptions::new(
            settings,
            devices,
            store.clone(),
        ));
        Self {
            controller,
            lights,
            speaker,
            microphone,
            store,
        }
    }

    pub fn fast() -> Self {
        Self::new(fast_settings())
    }

    /// Subscribes a channel to the hub and returns its receiver.
    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<Bytes> {
        let (subscriber, rx) = ChannelSubscriber::new(capacity);
        self.controller
            .connect(Arc::new(subscriber))
            .expect("greeting delivered");
        rx
    }

    /// Waits until the machine has returned to idle with nothing in flight.
    pub async fn wait_idle(&self) {
        let machine = Arc::clone(self.controller.machine());
        wait_until(move || machine.can_trigger()).await;
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Records every transition a machine emits.
pub fn record_transitions(machine: &SequenceMachine) -> Arc<Mutex<Vec<PhaseTransition>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    machine.on_transition(Arc::new(FnObserver::new(move |t: &PhaseTransition| {
        sink.lock().unwrap().push(t.clone());
        Ok(())
    })));
    seen
}

/// Polls `condition` every 5 ms until it holds; panics after [`WAIT`].
pub async fn wait_until(condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within {WAIT:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Awaits `future`, panicking after [`WAIT`].
pub async fn within<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out")
}

/// Drains every message currently queued for a subscriber.
pub fn drain(rx: &mut mpsc::Receiver<Bytes>) -> Vec<Value> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(serde_json::from_slice(&payload).unwrap());
    }
    out
}

/// Message types in order.
pub fn kinds(messages: &[Value]) -> Vec<String> {
    messages
        .iter()
        .map(|m| m["type"].as_str().unwrap_or_default().to_string())
        .collect()
}
