//! Sequence state representation.
//!
//! Lock-free atomic state for the current phase, the operating mode, the
//! in-flight run flag and the latest countdown tick. Readers never block.

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Step of the four-part scare sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Resting state; the only state from which a run may start.
    Idle,
    /// Building tension; ticks carry the remaining time.
    Countdown,
    /// The scare itself.
    Active,
    /// Ramping back to ambient.
    Resetting,
}

impl Phase {
    /// Wire name of the phase.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Countdown => "countdown",
            Self::Active => "active",
            Self::Resetting => "resetting",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Countdown => 1,
            Self::Active => 2,
            Self::Resetting => 3,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Countdown,
            2 => Self::Active,
            3 => Self::Resetting,
            _ => Self::Idle,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intensity profile selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Gentler lighting and volume.
    #[default]
    Child,
    /// Full intensity.
    Adult,
}

impl Mode {
    /// Wire name of the mode.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Child => "child",
            Self::Adult => "adult",
        }
    }

    const fn to_u8(self) -> u8 {
        match self {
            Self::Child => 0,
            Self::Adult => 1,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Adult,
            _ => Self::Child,
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "child" => Ok(Self::Child),
            "adult" => Ok(Self::Adult),
            other => Err(format!("unknown mode '{other}' (expected child or adult)")),
        }
    }
}

/// Record of one phase transition or countdown tick.
///
/// Ticks are transitions with `from == to == Countdown` and a populated
/// `countdown_remaining`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseTransition {
    /// When the transition was emitted.
    pub timestamp: DateTime<Utc>,
    /// Phase before the transition.
    pub from: Phase,
    /// Phase after the transition.
    pub to: Phase,
    /// Remaining countdown time (ticks only).
    pub countdown_remaining: Option<Duration>,
}

impl PhaseTransition {
    /// Creates a phase change stamped with the current time.
    #[must_use]
    pub fn change(from: Phase, to: Phase) -> Self {
        Self {
            timestamp: Utc::now(),
            from,
            to,
            countdown_remaining: None,
        }
    }

    /// Creates a countdown tick stamped with the current time.
    #[must_use]
    pub fn tick(remaining: Duration) -> Self {
        Self {
            timestamp: Utc::now(),
            from: Phase::Countdown,
            to: Phase::Countdown,
            countdown_remaining: Some(remaining),
        }
    }

    /// Returns `true` for same-phase countdown ticks.
    #[must_use]
    pub fn is_tick(&self) -> bool {
        self.from == self.to && self.countdown_remaining.is_some()
    }
}

/// Sentinel for "no countdown in progress".
const NO_COUNTDOWN: u64 = u64::MAX;

/// Lock-free sequence state shared between the machine and its readers.
pub struct SequenceState {
    phase: AtomicU8,
    mode: AtomicU8,
    in_flight: AtomicBool,
    countdown_remaining_us: AtomicU64,
}

impl Default for SequenceState {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceState {
    /// Creates a state resting in [`Phase::Idle`] and [`Mode::Child`].
    #[must_use]
    pub const fn new() -> Self {
        Self {
            phase: AtomicU8::new(0),
            mode: AtomicU8::new(0),
            in_flight: AtomicBool::new(false),
            countdown_remaining_us: AtomicU64::new(NO_COUNTDOWN),
        }
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Stores a new phase and returns the previous one.
    pub fn swap_phase(&self, phase: Phase) -> Phase {
        if phase != Phase::Countdown {
            self.countdown_remaining_us
                .store(NO_COUNTDOWN, Ordering::SeqCst);
        }
        Phase::from_u8(self.phase.swap(phase.to_u8(), Ordering::SeqCst))
    }

    /// Returns the current mode.
    #[must_use]
    pub fn mode(&self) -> Mode {
        Mode::from_u8(self.mode.load(Ordering::SeqCst))
    }

    /// Stores a new mode.
    pub fn set_mode(&self, mode: Mode) {
        self.mode.store(mode.to_u8(), Ordering::SeqCst);
    }

    /// Returns whether a run currently owns the sequence.
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Claims the sequence for a new run.
    ///
    /// Compare-and-exchange guarantees that exactly one caller wins when
    /// several triggers race.
    pub fn try_claim(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the sequence after a run has returned to idle.
    pub fn release(&self) {
        self.in_flight.store(false, Ordering::SeqCst);
    }

    /// Records the latest countdown tick.
    pub fn set_countdown_remaining(&self, remaining: Duration) {
        let micros = u64::try_from(remaining.as_micros()).unwrap_or(NO_COUNTDOWN - 1);
        self.countdown_remaining_us.store(micros, Ordering::SeqCst);
    }

    /// Returns the latest countdown tick, if a countdown is in progress.
    #[must_use]
    pub fn countdown_remaining(&self) -> Option<Duration> {
        match self.countdown_remaining_us.load(Ordering::SeqCst) {
            NO_COUNTDOWN => None,
            micros => Some(Duration::from_micros(micros)),
        }
    }
}

impl std::fmt::Debug for SequenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceState")
            .field("phase", &self.phase())
            .field("mode", &self.mode())
            .field("in_flight", &self.is_in_flight())
            .finish_non_exhaustive()
    }
}
