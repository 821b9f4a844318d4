//! Orchestrator
//!
//! Wires trigger sources into the sequence machine and dispatches hardware
//! effects per phase. A single actor task owns the live [`Settings`] and is
//! the only writer of configuration, mode and the running flag; callers talk
//! to it through [`Controller`], which enqueues commands and awaits replies.
//!
//! Audio frames arrive through a bounded [`TriggerSink`] so the audio thread
//! never waits on the controller.

mod effects;
mod telemetry;

pub use telemetry::AMBIENT_INTERVAL;

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::{Map, Value, json};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{
    ConfigField, ConfigPatch, ConfigStore, IntensityLevel, PatchEntry, RejectedField,
    RuntimeConfig, Settings, UnknownField,
};
use crate::error::{ControllerError, HardwareError, SequenceError};
use crate::hardware::{Devices, TriggerMeasurement, TriggerSink};
use crate::hub::{
    BroadcastHub, Connected, HubMessage, Notification, NotificationLevel, Subscriber,
    SubscriberId,
};
use crate::observability::event_log::{Event, EventCategory, EventLevel, EventLog};
use crate::observability::metrics;
use crate::observer::{FnObserver, ObserverError};
use crate::sequence::{Mode, Phase, PhaseTransition, SequenceMachine, TriggerOutcome};

use effects::{Effects, countdown_progress};

/// Audio frames buffered between the audio thread and the controller.
pub const AUDIO_QUEUE: usize = 64;

/// Minimum spacing of "trigger ignored" events while a run is in progress.
const DROPPED_TRIGGER_LOG_INTERVAL: Duration = Duration::from_secs(1);

/// Everything the controller needs, passed in explicitly.
pub struct ControllerOptions {
    /// Initial settings.
    pub settings: Settings,
    /// Hardware collaborators.
    pub devices: Devices,
    /// Where settings are persisted.
    pub store: Arc<dyn ConfigStore>,
    /// Process-wide event log.
    pub events: Arc<EventLog>,
    /// Process-wide broadcast hub.
    pub hub: Arc<BroadcastHub>,
}

impl ControllerOptions {
    /// Builds options with a fresh event log (sized from `settings`) and hub.
    #[must_use]
    pub fn new(settings: Settings, devices: Devices, store: Arc<dyn ConfigStore>) -> Self {
        let events = Arc::new(EventLog::new(settings.telemetry.event_log_capacity));
        Self {
            settings,
            devices,
            store,
            events,
            hub: Arc::new(BroadcastHub::new()),
        }
    }
}

/// Point-in-time view of the installation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Current mode.
    pub mode: Mode,
    /// Whether the installation is started.
    pub running: bool,
    /// Seconds left in the countdown, rounded to 2 decimals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<f64>,
}

/// Outcome of a configuration update.
#[derive(Debug, Clone, Default)]
pub struct ConfigUpdate {
    /// Fields that were applied.
    pub applied: Vec<PatchEntry>,
    /// Known fields whose values were refused.
    pub rejected: Vec<RejectedField>,
    /// Fields that were ignored.
    pub unknown: Vec<UnknownField>,
    /// Whether the new settings reached the store.
    pub persisted: bool,
}

/// Where a trigger request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerSource {
    /// The microphone's trigger rule matched.
    Audio,
    /// An API call.
    Manual,
}

impl TriggerSource {
    /// Label used in events and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Manual => "manual",
        }
    }
}

/// Which device status to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Audio input.
    Microphone,
    /// Lighting.
    Lights,
    /// Audio output.
    Speaker,
}

enum Command {
    Start(oneshot::Sender<bool>),
    Stop(oneshot::Sender<bool>),
    Trigger(oneshot::Sender<Result<TriggerOutcome, SequenceError>>),
    UpdateConfig(Map<String, Value>, oneshot::Sender<ConfigUpdate>),
    SetMode(Mode, oneshot::Sender<()>),
    Transition(PhaseTransition),
    Shutdown(oneshot::Sender<()>),
}

/// Handle to the orchestrator task.
pub struct Controller {
    commands: mpsc::UnboundedSender<Command>,
    machine: Arc<SequenceMachine>,
    settings: watch::Receiver<Settings>,
    running: Arc<AtomicBool>,
    devices: Devices,
    events: Arc<EventLog>,
    hub: Arc<BroadcastHub>,
    sink: TriggerSink,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("machine", &self.machine)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Controller {
    /// Spawns the orchestrator task and returns its handle.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use]
    pub fn spawn(options: ControllerOptions) -> Self {
        let ControllerOptions {
            settings,
            devices,
            store,
            events,
            hub,
        } = options;

        let machine = Arc::new(SequenceMachine::new(
            settings.timing.sequence_timing(),
            Arc::clone(&events),
        ));
        machine.set_mode(settings.mode);

        let running = Arc::new(AtomicBool::new(false));
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (sink, audio_rx) = TriggerSink::channel(AUDIO_QUEUE);
        let (settings_tx, settings_rx) = watch::channel(settings.clone());

        // Transitions are broadcast at emission time so the order seen by
        // subscribers is the order the machine produced them. The actor only
        // dispatches effects; the effects themselves run on session tasks.
        let weak = commands.downgrade();
        let transition_hub = Arc::clone(&hub);
        let transition_events = Arc::clone(&events);
        let transition_running = Arc::clone(&running);
        machine.on_transition(Arc::new(FnObserver::new(move |t: &PhaseTransition| {
            if transition_running.load(Ordering::SeqCst) {
                transition_hub.broadcast(&HubMessage::StateChange(t.into()));
            }
            if !t.is_tick() {
                transition_events.log(
                    EventLevel::Info,
                    EventCategory::State,
                    format!("State changed: {} -> {}", t.from, t.to),
                    json!({ "from": t.from.as_str(), "to": t.to.as_str() }),
                );
            }
            weak.upgrade()
                .ok_or_else(|| ObserverError::new("controller is shut down"))?
                .send(Command::Transition(t.clone()))
                .map_err(|_| ObserverError::new("controller is shut down"))
        })));

        let event_hub = Arc::clone(&hub);
        let event_running = Arc::clone(&running);
        events.subscribe(Arc::new(FnObserver::new(move |e: &Event| {
            if event_running.load(Ordering::SeqCst) {
                event_hub.broadcast(&HubMessage::Event(e.clone()));
            }
            Ok(())
        })));

        let actor = Actor {
            effects: Effects::new(devices.clone(), Arc::clone(&events), Arc::clone(&hub)),
            settings,
            settings_tx,
            machine: Arc::clone(&machine),
            devices: devices.clone(),
            store,
            events: Arc::clone(&events),
            hub: Arc::clone(&hub),
            running: Arc::clone(&running),
            session: CancellationToken::new(),
            session_tasks: Vec::new(),
            countdown: None,
            last_dropped_log: None,
            sink: sink.clone(),
        };
        let task = tokio::spawn(actor.run(command_rx, audio_rx));

        Self {
            commands,
            machine,
            settings: settings_rx,
            running,
            devices,
            events,
            hub,
            sink,
            task: Mutex::new(Some(task)),
        }
    }

    async fn request<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> Result<R, ControllerError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(make(tx))
            .map_err(|_| ControllerError::Closed)?;
        rx.await.map_err(|_| ControllerError::Closed)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Initializes microphone, lights and speaker, in that order.
    ///
    /// # Errors
    ///
    /// Returns the first device failure; startup should abort.
    pub async fn initialize(&self) -> Result<(), ControllerError> {
        self.events.info(EventCategory::System, "Initializing Scare Box...");
        match self.initialize_devices().await {
            Ok(()) => {
                self.events.info(EventCategory::System, "Initialization complete");
                Ok(())
            }
            Err(e) => {
                self.events.log(
                    EventLevel::Error,
                    EventCategory::System,
                    format!("Initialization failed: {e}"),
                    json!({ "device": e.device() }),
                );
                Err(e.into())
            }
        }
    }

    async fn initialize_devices(&self) -> Result<(), HardwareError> {
        self.devices.microphone.initialize()?;
        self.events.info(EventCategory::Hardware, "Microphone initialized");
        self.devices.lights.initialize().await?;
        self.events.info(EventCategory::Hardware, "Lights initialized");
        self.devices.speaker.initialize().await?;
        self.events.info(EventCategory::Hardware, "Speaker initialized");
        Ok(())
    }

    /// Starts streaming, ambient effects and audio listening.
    ///
    /// Returns `false` if already running.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller task has exited.
    pub async fn start(&self) -> Result<bool, ControllerError> {
        self.request(Command::Start).await
    }

    /// Cancels any run, stops streaming and releases the effect drivers.
    ///
    /// Returns `false` if already stopped.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller task has exited.
    pub async fn stop(&self) -> Result<bool, ControllerError> {
        self.request(Command::Stop).await
    }

    /// Stops and terminates the controller task.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the task had already exited.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn shutdown(&self) -> Result<(), ControllerError> {
        let result = self.request(Command::Shutdown).await;
        let task = self.task.lock().expect("controller task lock poisoned").take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "controller task ended abnormally");
            }
        }
        result
    }

    // ========================================================================
    // Requests
    // ========================================================================

    /// Requests a run. Rejected (not an error) while a run is in progress.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller task has exited.
    pub async fn manual_trigger(&self) -> Result<TriggerOutcome, ControllerError> {
        Ok(self.request(Command::Trigger).await??)
    }

    /// Applies a merge-patch to the runtime configuration and persists it.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller task has exited.
    pub async fn update_config(
        &self,
        patch: Map<String, Value>,
    ) -> Result<ConfigUpdate, ControllerError> {
        self.request(|reply| Command::UpdateConfig(patch, reply)).await
    }

    /// Switches mode and re-applies intensity immediately.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Closed`] if the controller task has exited.
    pub async fn set_mode(&self, mode: Mode) -> Result<(), ControllerError> {
        self.request(|reply| Command::SetMode(mode, reply)).await
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// The externally visible configuration.
    #[must_use]
    pub fn config(&self) -> RuntimeConfig {
        RuntimeConfig::from(&*self.settings.borrow())
    }

    /// Full current settings.
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.settings.borrow().clone()
    }

    /// Current phase, mode and running flag.
    #[must_use]
    pub fn state(&self) -> StateSnapshot {
        StateSnapshot {
            phase: self.machine.phase(),
            mode: self.machine.mode(),
            running: self.is_running(),
            countdown_remaining: self
                .machine
                .countdown_remaining()
                .map(|d| (d.as_secs_f64() * 100.0).round() / 100.0),
        }
    }

    /// Whether the installation is started.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.machine.phase()
    }

    /// Current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.machine.mode()
    }

    /// Whether a trigger would be accepted right now.
    #[must_use]
    pub fn can_trigger(&self) -> bool {
        self.machine.can_trigger()
    }

    /// The sequence machine.
    #[must_use]
    pub const fn machine(&self) -> &Arc<SequenceMachine> {
        &self.machine
    }

    /// The event log.
    #[must_use]
    pub const fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    /// The broadcast hub.
    #[must_use]
    pub const fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// A sink for the audio collaborator.
    #[must_use]
    pub fn trigger_sink(&self) -> TriggerSink {
        self.sink.clone()
    }

    /// Status map for one device.
    pub async fn device_status(&self, kind: DeviceKind) -> Value {
        match kind {
            DeviceKind::Microphone => self.devices.microphone.status(),
            DeviceKind::Lights => self.devices.lights.status().await,
            DeviceKind::Speaker => self.devices.speaker.status().await,
        }
    }

    /// Status maps for all devices.
    pub async fn devices_status(&self) -> Value {
        let (lights, speaker) =
            tokio::join!(self.devices.lights.status(), self.devices.speaker.status());
        json!({
            "microphone": self.devices.microphone.status(),
            "lights": lights,
            "speaker": speaker,
        })
    }

    // ========================================================================
    // Live subscribers
    // ========================================================================

    /// The greeting a new subscriber receives.
    #[must_use]
    pub fn connected_message(&self) -> HubMessage {
        HubMessage::Connected(Connected {
            message: "Connected to Scare Box".to_string(),
            state: self.machine.phase(),
            mode: self.machine.mode(),
        })
    }

    /// Greets `subscriber` and then subscribes it to live updates.
    ///
    /// Returns `None` if the greeting could not be delivered.
    pub fn connect(&self, subscriber: Arc<dyn Subscriber>) -> Option<SubscriberId> {
        self.hub.subscribe_with(subscriber, &self.connected_message())
    }

    /// Removes a live subscriber.
    pub fn disconnect(&self, id: SubscriberId) {
        self.hub.unsubscribe(id);
    }
}

// ============================================================================
// Actor
// ============================================================================

/// Latest countdown progress, drained by one effect task per countdown.
struct CountdownFeed {
    progress: watch::Sender<f64>,
    cancel: CancellationToken,
}

struct Actor {
    settings: Settings,
    settings_tx: watch::Sender<Settings>,
    machine: Arc<SequenceMachine>,
    devices: Devices,
    effects: Effects,
    store: Arc<dyn ConfigStore>,
    events: Arc<EventLog>,
    hub: Arc<BroadcastHub>,
    running: Arc<AtomicBool>,
    session: CancellationToken,
    /// Effect and telemetry tasks of the current session.
    session_tasks: Vec<JoinHandle<()>>,
    countdown: Option<CountdownFeed>,
    last_dropped_log: Option<Instant>,
    sink: TriggerSink,
}

impl Actor {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut audio: mpsc::Receiver<TriggerMeasurement>,
    ) {
        loop {
            tokio::select! {
                biased;
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    if self.handle(command).await.is_break() {
                        break;
                    }
                }
                Some(frame) = audio.recv() => self.on_measurement(&frame),
            }
        }
        self.session.cancel();
        self.machine.shutdown();
        tracing::debug!("controller task exited");
    }

    async fn handle(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Start(reply) => {
                let changed = self.start().await;
                let _ = reply.send(changed);
            }
            Command::Stop(reply) => {
                let changed = self.stop().await;
                let _ = reply.send(changed);
            }
            Command::Trigger(reply) => {
                let _ = reply.send(self.request_trigger(TriggerSource::Manual));
            }
            Command::UpdateConfig(patch, reply) => {
                let update = self.update_config(&patch).await;
                let _ = reply.send(update);
            }
            Command::SetMode(mode, reply) => {
                self.apply_mode(mode).await;
                self.publish();
                self.persist().await;
                let _ = reply.send(());
            }
            Command::Transition(transition) => self.on_phase_transition(&transition),
            Command::Shutdown(reply) => {
                self.stop().await;
                let _ = reply.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn level(&self) -> IntensityLevel {
        self.settings.intensity.for_mode(self.machine.mode())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn notify(&self, level: NotificationLevel, title: &str, message: impl Into<String>) {
        self.hub
            .broadcast(&HubMessage::Notification(Notification::new(level, title, message)));
    }

    fn publish(&self) {
        self.settings_tx.send_replace(self.settings.clone());
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.session_tasks.retain(|t| !t.is_finished());
        self.session_tasks.push(task);
    }

    /// Waits for every session task to wind down after the session token
    /// was cancelled.
    async fn join_session_tasks(&mut self) {
        for task in std::mem::take(&mut self.session_tasks) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "session task ended abnormally");
            }
        }
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    async fn start(&mut self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mode = self.machine.mode();
        self.events.info(
            EventCategory::System,
            format!("Starting Scare Box in {} mode", mode.as_str().to_uppercase()),
        );

        self.session = CancellationToken::new();
        self.effects.ambient(self.level()).await;

        if let Err(e) = self.devices.microphone.start_listening(self.sink.clone()) {
            self.effects.report("start_listening", &e);
        }

        let ambient = telemetry::spawn_ambient_loop(
            self.effects.clone(),
            Arc::clone(&self.machine),
            self.settings_tx.subscribe(),
            self.session.child_token(),
        );
        self.track(ambient);
        let light_status = telemetry::spawn_light_status_stream(
            Arc::clone(&self.devices.lights),
            Arc::clone(&self.hub),
            self.settings.telemetry.light_status_period(),
            self.session.child_token(),
        );
        self.track(light_status);

        self.events.info(EventCategory::System, "Scare Box started");
        self.notify(
            NotificationLevel::Success,
            "System started",
            format!("Scare Box is running in {mode} mode"),
        );
        true
    }

    async fn stop(&mut self) -> bool {
        if !self.is_running() {
            return false;
        }
        self.events.info(EventCategory::System, "Stopping Scare Box...");

        // Still streaming, so the forced transition to idle reaches subscribers.
        self.machine.stop().await;
        self.running.store(false, Ordering::SeqCst);

        // Effects in progress stop advancing; none reach a driver after this.
        self.session.cancel();
        self.countdown = None;
        self.join_session_tasks().await;

        self.devices.microphone.stop_listening();
        self.effects.release().await;

        self.events.info(EventCategory::System, "Scare Box stopped");
        self.notify(NotificationLevel::Info, "System stopped", "Scare Box is idle");
        true
    }

    // ------------------------------------------------------------------------
    // Triggers
    // ------------------------------------------------------------------------

    fn on_measurement(&mut self, frame: &TriggerMeasurement) {
        if self.is_running() {
            self.hub.broadcast(&HubMessage::AudioLevel(frame.into()));
        }
        if frame.triggered {
            self.on_trigger_condition();
        }
    }

    /// A trigger tone while a run is in progress is dropped. It is recorded
    /// as a Debug event at most once per [`DROPPED_TRIGGER_LOG_INTERVAL`],
    /// since the tone usually spans many frames.
    fn on_trigger_condition(&mut self) {
        if !self.machine.can_trigger() {
            let phase = self.machine.phase();
            metrics::record_trigger(TriggerSource::Audio.as_str(), "dropped");
            tracing::debug!(%phase, "audio trigger dropped, sequence busy");

            let now = Instant::now();
            if self
                .last_dropped_log
                .is_none_or(|at| now.duration_since(at) >= DROPPED_TRIGGER_LOG_INTERVAL)
            {
                self.last_dropped_log = Some(now);
                self.events.log(
                    EventLevel::Debug,
                    EventCategory::Trigger,
                    "Audio trigger ignored, sequence busy",
                    json!({ "type": TriggerSource::Audio.as_str(), "phase": phase.as_str() }),
                );
            }
            return;
        }
        if let Err(e) = self.request_trigger(TriggerSource::Audio) {
            self.events.log(
                EventLevel::Error,
                EventCategory::Trigger,
                format!("Audio trigger failed: {e}"),
                Value::Null,
            );
        }
    }

    fn request_trigger(&self, source: TriggerSource) -> Result<TriggerOutcome, SequenceError> {
        if !self.machine.can_trigger() {
            metrics::record_trigger(source.as_str(), "rejected");
            tracing::debug!(source = source.as_str(), "trigger rejected, sequence busy");
            return Ok(TriggerOutcome::Rejected);
        }

        let message = match source {
            TriggerSource::Audio => "Audio trigger detected",
            TriggerSource::Manual => "Scare sequence triggered",
        };
        self.events.log(
            EventLevel::Info,
            EventCategory::Trigger,
            message,
            json!({ "type": source.as_str() }),
        );

        let outcome = self.machine.trigger()?;
        metrics::record_trigger(
            source.as_str(),
            if outcome.is_started() { "started" } else { "rejected" },
        );
        if outcome.is_started() && source == TriggerSource::Manual {
            self.notify(
                NotificationLevel::Info,
                "Scare triggered",
                "Manual scare sequence started",
            );
        }
        Ok(outcome)
    }

    // ------------------------------------------------------------------------
    // Phase effects
    // ------------------------------------------------------------------------

    fn on_phase_transition(&mut self, transition: &PhaseTransition) {
        if transition.to != Phase::Countdown {
            if let Some(feed) = self.countdown.take() {
                feed.cancel.cancel();
            }
        }
        // Drivers are released while stopped.
        if !self.is_running() {
            return;
        }

        let level = self.level();
        match transition.to {
            Phase::Countdown => {
                if let Some(remaining) = transition.countdown_remaining {
                    let progress =
                        countdown_progress(remaining, self.settings.timing.countdown_duration);
                    self.feed_countdown(progress);
                }
            }
            Phase::Active => {
                let scare = self.effects.spawn_scare(
                    self.session.child_token(),
                    level,
                    self.settings.timing.scream_delay(),
                );
                self.track(scare);
            }
            Phase::Resetting => {
                let reset = self.effects.spawn_reset(
                    self.session.child_token(),
                    self.settings.timing.reset(),
                    level,
                );
                self.track(reset);
            }
            Phase::Idle => {}
        }
    }

    fn feed_countdown(&mut self, progress: f64) {
        if let Some(feed) = &self.countdown {
            if feed.progress.send(progress).is_ok() {
                return;
            }
        }
        let (progress_tx, progress_rx) = watch::channel(progress);
        let cancel = self.session.child_token();
        let task = self.effects.spawn_countdown(cancel.clone(), progress_rx);
        self.track(task);
        self.countdown = Some(CountdownFeed {
            progress: progress_tx,
            cancel,
        });
    }

    // ------------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------------

    async fn update_config(&mut self, raw: &Map<String, Value>) -> ConfigUpdate {
        let mut patch = ConfigPatch::parse(raw);

        for unknown in &patch.unknown {
            tracing::debug!(
                field = %unknown.name,
                suggestion = unknown.suggestion.unwrap_or("-"),
                "ignoring unknown config field"
            );
        }

        let mut next = self.settings.clone();
        let applied = patch.apply(&mut next);

        for rejected in &patch.rejected {
            self.events.log(
                EventLevel::Warning,
                EventCategory::Config,
                format!("Config value rejected: {}", rejected.field),
                json!({
                    "field": rejected.field.as_str(),
                    "value": rejected.value,
                    "reason": rejected.reason,
                }),
            );
        }

        let mut update = ConfigUpdate {
            applied: applied.clone(),
            rejected: patch.rejected,
            unknown: patch.unknown,
            persisted: false,
        };
        if applied.is_empty() {
            return update;
        }

        let new_mode = next.mode;
        // Mode is applied through apply_mode below so intensity follows.
        next.mode = self.settings.mode;
        self.settings = next;

        let mut thresholds_changed = false;
        let mut timing_changed = false;
        for entry in &applied {
            if entry.field.is_phase_timing() {
                timing_changed = true;
            } else if entry.field.is_trigger() {
                thresholds_changed = true;
            }
            if entry.field != ConfigField::Mode {
                self.events.log(
                    EventLevel::Info,
                    EventCategory::Config,
                    format!("Config updated: {} = {}", entry.field, entry.value),
                    json!({ "field": entry.field.as_str(), "value": Value::from(entry.value) }),
                );
            }
            metrics::record_config_update(entry.field.as_str());
        }

        if timing_changed {
            let timing = self.settings.timing.sequence_timing();
            self.machine.update_timing(
                Some(timing.countdown),
                Some(timing.active),
                Some(timing.reset),
            );
        }
        if thresholds_changed {
            self.devices
                .microphone
                .set_thresholds(self.settings.audio.thresholds());
        }
        if new_mode != self.settings.mode {
            self.apply_mode(new_mode).await;
        }

        self.publish();
        update.persisted = self.persist().await;
        update
    }

    async fn apply_mode(&mut self, mode: Mode) {
        self.machine.set_mode(mode);
        self.settings.mode = mode;
        self.events.info(
            EventCategory::Config,
            format!("Mode changed to {}", mode.as_str().to_uppercase()),
        );

        if self.is_running() {
            let level = self.level();
            self.effects.set_volume(level.volume).await;
            if self.machine.phase() == Phase::Idle {
                self.effects.ambient(level).await;
            }
        }
    }

    async fn persist(&self) -> bool {
        let store = Arc::clone(&self.store);
        let location = store.location();
        let settings = self.settings.clone();

        let error = match tokio::task::spawn_blocking(move || store.save(&settings)).await {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(e) => e.to_string(),
        };
        self.events.log(
            EventLevel::Error,
            EventCategory::Config,
            "Failed to persist configuration",
            json!({ "location": location, "error": error }),
        );
        false
    }
}
