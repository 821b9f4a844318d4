//! The timed scare sequence.
//!
//! A run walks `Idle → Countdown (20 ticks) → Active → Resetting → Idle` on
//! a spawned Tokio task. At most one run exists at a time; the in-flight
//! flag in [`SequenceState`] is claimed with a compare-and-exchange so
//! racing triggers cannot both start. Cancellation always ends with a
//! transition into [`Phase::Idle`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::SequenceError;
use crate::observability::event_log::{EventCategory, EventLevel, EventLog};
use crate::observability::metrics;
use crate::observer::{Observer, ObserverSet};

use super::state::{Mode, Phase, PhaseTransition, SequenceState};

/// Number of countdown ticks per run.
pub const TICKS: u32 = 20;

/// Phase durations used by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceTiming {
    /// Length of the countdown phase.
    pub countdown: Duration,
    /// How long the active phase is held.
    pub active: Duration,
    /// How long the resetting phase is held.
    pub reset: Duration,
}

impl Default for SequenceTiming {
    fn default() -> Self {
        Self {
            countdown: Duration::from_secs(3),
            active: Duration::from_secs(2),
            reset: Duration::from_secs(5),
        }
    }
}

/// Result of a trigger request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new run was started.
    Started,
    /// A run is already in progress; nothing happened.
    Rejected,
}

impl TriggerOutcome {
    /// Returns `true` for [`TriggerOutcome::Started`].
    #[must_use]
    pub const fn is_started(self) -> bool {
        matches!(self, Self::Started)
    }
}

struct RunHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct Shared {
    state: SequenceState,
    timing: Mutex<SequenceTiming>,
    observers: ObserverSet<PhaseTransition>,
    events: Arc<EventLog>,
    shutdown: CancellationToken,
}

impl Shared {
    fn transition_to(&self, to: Phase) {
        let from = self.state.swap_phase(to);
        self.emit(&PhaseTransition::change(from, to));
    }

    fn tick(&self, remaining: Duration) {
        self.state.set_countdown_remaining(remaining);
        self.emit(&PhaseTransition::tick(remaining));
    }

    fn emit(&self, transition: &PhaseTransition) {
        if transition.is_tick() {
            tracing::trace!(remaining = ?transition.countdown_remaining, "countdown tick");
        } else {
            tracing::debug!(from = %transition.from, to = %transition.to, "phase transition");
            metrics::record_phase_transition(transition.to);
        }

        for failure in self.observers.notify_all(transition) {
            self.events.log(
                EventLevel::Error,
                EventCategory::System,
                "Transition observer failed",
                json!({
                    "observer": failure.index,
                    "error": failure.message,
                    "to": transition.to.as_str(),
                }),
            );
        }
    }
}

/// Owner of the scare sequence and its timing.
pub struct SequenceMachine {
    shared: Arc<Shared>,
    run: Mutex<Option<RunHandle>>,
}

impl std::fmt::Debug for SequenceMachine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceMachine")
            .field("state", &self.shared.state)
            .field("observers", &self.shared.observers.len())
            .finish_non_exhaustive()
    }
}

impl SequenceMachine {
    /// Creates an idle machine reporting observer failures to `events`.
    #[must_use]
    pub fn new(timing: SequenceTiming, events: Arc<EventLog>) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: SequenceState::new(),
                timing: Mutex::new(timing),
                observers: ObserverSet::default(),
                events,
                shutdown: CancellationToken::new(),
            }),
            run: Mutex::new(None),
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.shared.state.phase()
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.shared.state.mode()
    }

    /// Sets the mode. Takes effect for every later read.
    pub fn set_mode(&self, mode: Mode) {
        self.shared.state.set_mode(mode);
    }

    /// Returns the latest countdown tick while counting down.
    #[must_use]
    pub fn countdown_remaining(&self) -> Option<Duration> {
        self.shared.state.countdown_remaining()
    }

    /// Returns `true` iff the machine is idle and no run is in flight.
    #[must_use]
    pub fn can_trigger(&self) -> bool {
        self.shared.state.phase() == Phase::Idle && !self.shared.state.is_in_flight()
    }

    /// Returns the timing the next run will use.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn timing(&self) -> SequenceTiming {
        *self.shared.timing.lock().expect("timing lock poisoned")
    }

    /// Replaces the provided durations for subsequent runs.
    ///
    /// A run already in progress keeps the timing it started with.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn update_timing(
        &self,
        countdown: Option<Duration>,
        active: Option<Duration>,
        reset: Option<Duration>,
    ) {
        let mut timing = self.shared.timing.lock().expect("timing lock poisoned");
        if let Some(d) = countdown {
            timing.countdown = d;
        }
        if let Some(d) = active {
            timing.active = d;
        }
        if let Some(d) = reset {
            timing.reset = d;
        }
    }

    /// Registers an observer for every transition, ticks included.
    pub fn on_transition(&self, observer: Arc<dyn Observer<PhaseTransition>>) {
        self.shared.observers.register(observer);
    }

    /// Starts a run if the machine can trigger.
    ///
    /// The `Idle → Countdown` transition is emitted before this returns; the
    /// rest of the run continues on a spawned task. Observers of that first
    /// transition must not call back into [`SequenceMachine::stop`] on the
    /// same thread.
    ///
    /// # Errors
    ///
    /// Returns [`SequenceError::NoRuntime`] when called outside a Tokio
    /// runtime. A busy machine is not an error: it yields
    /// [`TriggerOutcome::Rejected`].
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn trigger(&self) -> Result<TriggerOutcome, SequenceError> {
        // Held until the handle is stored so a concurrent `stop` always sees
        // the run it has to cancel.
        let mut run = self.run.lock().expect("run lock poisoned");
        if self.shared.state.phase() != Phase::Idle || !self.shared.state.try_claim() {
            return Ok(TriggerOutcome::Rejected);
        }

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            self.shared.state.release();
            return Err(SequenceError::NoRuntime);
        };

        let timing = self.timing();
        let cancel = self.shared.shutdown.child_token();

        self.shared.state.set_countdown_remaining(timing.countdown);
        self.shared.transition_to(Phase::Countdown);

        let shared = Arc::clone(&self.shared);
        let token = cancel.clone();
        let task = handle.spawn(async move {
            if !run_phases(&shared, timing, &token).await && shared.state.phase() != Phase::Idle {
                shared.transition_to(Phase::Idle);
            }
            shared.state.release();
        });

        *run = Some(RunHandle { cancel, task });
        Ok(TriggerOutcome::Started)
    }

    /// Cancels any in-flight run and waits until the machine is idle.
    ///
    /// Emits one forced transition into [`Phase::Idle`] when a run was
    /// interrupted; emits nothing otherwise.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn stop(&self) {
        let Some(run) = self.run.lock().expect("run lock poisoned").take() else {
            return;
        };
        run.cancel.cancel();

        if let Err(e) = run.task.await {
            let error = SequenceError::RunFailed(e.to_string());
            if self.shared.state.phase() != Phase::Idle {
                self.shared.transition_to(Phase::Idle);
            }
            self.shared.state.release();
            self.shared.events.log(
                EventLevel::Error,
                EventCategory::State,
                "Sequence run ended abnormally",
                json!({ "error": error.to_string() }),
            );
        }
    }

    /// Cancels every run started by this machine without waiting.
    pub fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

/// Drives one run. Returns `false` if cancelled before completing.
async fn run_phases(shared: &Shared, timing: SequenceTiming, cancel: &CancellationToken) -> bool {
    let step = timing.countdown / TICKS;
    for tick in 1..=TICKS {
        if !hold(step, cancel).await {
            return false;
        }
        let remaining = if tick == TICKS {
            Duration::ZERO
        } else {
            timing.countdown.saturating_sub(step * tick)
        };
        shared.tick(remaining);
    }

    shared.transition_to(Phase::Active);
    if !hold(timing.active, cancel).await {
        return false;
    }

    shared.transition_to(Phase::Resetting);
    if !hold(timing.reset, cancel).await {
        return false;
    }

    shared.transition_to(Phase::Idle);
    true
}

async fn hold(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
