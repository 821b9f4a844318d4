//! Sequence module
//!
//! The four-phase scare sequence: atomic state plus the timed machine that
//! drives it.

pub mod machine;
pub mod state;

pub use machine::{SequenceMachine, SequenceTiming, TICKS, TriggerOutcome};
pub use state::{Mode, Phase, PhaseTransition, SequenceState};
