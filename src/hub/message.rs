//! Typed messages pushed to live observers.
//!
//! Every message serializes as `{"type": ..., "data": ...}`.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::hardware::TriggerMeasurement;
use crate::observability::event_log::{Event, unix_seconds};
use crate::sequence::{Mode, Phase, PhaseTransition};

/// A message for every live subscriber.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum HubMessage {
    /// Greeting sent once to a new subscriber.
    Connected(Connected),
    /// One analysed audio frame.
    AudioLevel(AudioLevel),
    /// Collaborator-supplied light status map.
    LightStatus(serde_json::Value),
    /// A phase transition or countdown tick.
    StateChange(StateChange),
    /// An event log append.
    Event(Event),
    /// A user-facing notification.
    Notification(Notification),
}

impl HubMessage {
    /// Wire name of the message kind.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::AudioLevel(_) => "audio_level",
            Self::LightStatus(_) => "light_status",
            Self::StateChange(_) => "state_change",
            Self::Event(_) => "event",
            Self::Notification(_) => "notification",
        }
    }
}

/// Payload of [`HubMessage::Connected`].
#[derive(Debug, Clone, Serialize)]
pub struct Connected {
    /// Greeting text.
    pub message: String,
    /// Current phase.
    pub state: Phase,
    /// Current mode.
    pub mode: Mode,
}

/// Payload of [`HubMessage::AudioLevel`].
#[derive(Debug, Clone, Serialize)]
pub struct AudioLevel {
    /// Frame timestamp.
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
    /// RMS amplitude, rounded to 3 decimals.
    pub rms: f64,
    /// Peak amplitude, rounded to 3 decimals.
    pub peak: f64,
    /// Dominant frequency in Hz, rounded to 2 decimals.
    pub frequency_peak: f64,
}

impl From<&TriggerMeasurement> for AudioLevel {
    fn from(m: &TriggerMeasurement) -> Self {
        Self {
            timestamp: m.timestamp,
            rms: round_to(m.amplitude, 3),
            peak: round_to(m.peak, 3),
            frequency_peak: round_to(m.dominant_frequency, 2),
        }
    }
}

/// Payload of [`HubMessage::StateChange`].
#[derive(Debug, Clone, Serialize)]
pub struct StateChange {
    /// Transition timestamp.
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Phase before.
    pub from: Phase,
    /// Phase after.
    pub to: Phase,
    /// Remaining countdown in seconds, rounded to 2 decimals (ticks only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub countdown_remaining: Option<f64>,
}

impl From<&PhaseTransition> for StateChange {
    fn from(t: &PhaseTransition) -> Self {
        Self {
            timestamp: t.timestamp,
            from: t.from,
            to: t.to,
            countdown_remaining: t.countdown_remaining.map(|d| round_to(d.as_secs_f64(), 2)),
        }
    }
}

/// Notification severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    /// Informational.
    Info,
    /// Something completed.
    Success,
    /// Needs attention.
    Warning,
    /// Something failed.
    Error,
}

/// Payload of [`HubMessage::Notification`].
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    /// When the notification was raised.
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: NotificationLevel,
    /// Short title.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Notification {
    /// Creates a notification stamped with the current time.
    #[must_use]
    pub fn new(level: NotificationLevel, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            title: title.into(),
            message: message.into(),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
