//! Bounded operational event log.
//!
//! An insertion-ordered ring buffer of [`Event`]s. Appends are serialized
//! through one short critical section; observers are notified after the
//! lock is released so a slow observer never stalls an unrelated logger.
//! Every event is mirrored to `tracing` at the matching level.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::observer::{Observer, ObserverSet};

use super::metrics;

/// Default ring buffer capacity.
pub const DEFAULT_CAPACITY: usize = 1000;

/// Event severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Diagnostic detail (e.g. dropped trigger signals).
    Debug,
    /// Normal operation.
    Info,
    /// Unexpected but harmless.
    Warning,
    /// A collaborator or observer failed.
    Error,
}

impl EventLevel {
    /// Wire name of the level.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

impl std::str::FromStr for EventLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "info" => Ok(Self::Info),
            "warning" | "warn" => Ok(Self::Warning),
            "error" => Ok(Self::Error),
            other => Err(format!("unknown event level '{other}'")),
        }
    }
}

/// Subsystem an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    /// Lifecycle of the installation itself.
    System,
    /// Trigger detection and acceptance.
    Trigger,
    /// Sequence phase changes.
    State,
    /// Lights, speaker and microphone.
    Hardware,
    /// Runtime configuration changes.
    Config,
}

impl EventCategory {
    /// Wire name of the category.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::Trigger => "trigger",
            Self::State => "state",
            Self::Hardware => "hardware",
            Self::Config => "config",
        }
    }
}

impl std::str::FromStr for EventCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "system" => Ok(Self::System),
            "trigger" => Ok(Self::Trigger),
            "state" => Ok(Self::State),
            "hardware" => Ok(Self::Hardware),
            "config" => Ok(Self::Config),
            other => Err(format!("unknown event category '{other}'")),
        }
    }
}

impl std::fmt::Display for EventCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable operational event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    /// When the event was logged (serialized as fractional Unix seconds).
    #[serde(serialize_with = "unix_seconds")]
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: EventLevel,
    /// Subsystem.
    pub category: EventCategory,
    /// Human-readable message.
    pub message: String,
    /// Structured context.
    pub details: Map<String, Value>,
}

/// Serializes a timestamp as fractional seconds since the Unix epoch.
///
/// # Errors
///
/// Propagates serializer errors.
#[allow(clippy::cast_precision_loss)]
pub fn unix_seconds<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(ts.timestamp_micros() as f64 / 1_000_000.0)
}

/// Filters for [`EventLog::query`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventQuery {
    /// Keep only the most recent `limit` matching events.
    pub limit: Option<usize>,
    /// Keep only events of this level.
    pub level: Option<EventLevel>,
    /// Keep only events of this category.
    pub category: Option<EventCategory>,
}

/// Counts over the current buffer contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    /// Number of events currently buffered.
    pub total_events: usize,
    /// Buffered events per level.
    pub by_level: BTreeMap<EventLevel, usize>,
    /// Buffered events per category.
    pub by_category: BTreeMap<EventCategory, usize>,
}

/// Bounded, append-only event log with synchronous fan-out.
pub struct EventLog {
    events: Mutex<VecDeque<Event>>,
    capacity: usize,
    observers: ObserverSet<Event>,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog")
            .field("len", &self.len())
            .field("capacity", &self.capacity)
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl EventLog {
    /// Creates a log holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            observers: ObserverSet::default(),
        }
    }

    /// Registers an observer invoked for every appended event.
    pub fn subscribe(&self, observer: Arc<dyn Observer<Event>>) {
        self.observers.register(observer);
    }

    /// Appends an event, evicting the oldest when full, then notifies observers.
    ///
    /// `details` may be any JSON value; objects are stored as-is, `null` as an
    /// empty map and anything else under a `"value"` key.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn log(
        &self,
        level: EventLevel,
        category: EventCategory,
        message: impl Into<String>,
        details: Value,
    ) -> Event {
        let details = match details {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        let event = Event {
            timestamp: Utc::now(),
            level,
            category,
            message: message.into(),
            details,
        };

        {
            let mut events = self.events.lock().expect("event log lock poisoned");
            if events.len() == self.capacity {
                events.pop_front();
            }
            events.push_back(event.clone());
        }

        mirror_to_tracing(&event);
        metrics::record_event(level, category);

        for failure in self.observers.notify_all(&event) {
            // Reporting through the log itself could recurse.
            tracing::warn!(observer = failure.index, error = %failure.message, "event observer failed");
        }

        event
    }

    /// Logs a debug event without details.
    pub fn debug(&self, category: EventCategory, message: impl Into<String>) -> Event {
        self.log(EventLevel::Debug, category, message, Value::Null)
    }

    /// Logs an info event without details.
    pub fn info(&self, category: EventCategory, message: impl Into<String>) -> Event {
        self.log(EventLevel::Info, category, message, Value::Null)
    }

    /// Logs a warning event without details.
    pub fn warning(&self, category: EventCategory, message: impl Into<String>) -> Event {
        self.log(EventLevel::Warning, category, message, Value::Null)
    }

    /// Logs an error event without details.
    pub fn error(&self, category: EventCategory, message: impl Into<String>) -> Event {
        self.log(EventLevel::Error, category, message, Value::Null)
    }

    /// Returns matching events in insertion order.
    ///
    /// Filters apply before the limit; the limit keeps the most recent
    /// matches.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn query(&self, query: &EventQuery) -> Vec<Event> {
        let matching: Vec<Event> = {
            let events = self.events.lock().expect("event log lock poisoned");
            events
                .iter()
                .filter(|e| query.level.is_none_or(|l| e.level == l))
                .filter(|e| query.category.is_none_or(|c| e.category == c))
                .cloned()
                .collect()
        };

        match query.limit {
            Some(limit) if limit < matching.len() => matching[matching.len() - limit..].to_vec(),
            _ => matching,
        }
    }

    /// Returns counts computed over the current buffer contents.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn stats(&self) -> EventStats {
        let events = self.events.lock().expect("event log lock poisoned");
        let mut stats = EventStats {
            total_events: events.len(),
            ..EventStats::default()
        };
        for event in events.iter() {
            *stats.by_level.entry(event.level).or_default() += 1;
            *stats.by_category.entry(event.category).or_default() += 1;
        }
        stats
    }

    /// Number of buffered events.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().expect("event log lock poisoned").len()
    }

    /// Returns `true` if nothing has been logged (or everything was cleared).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of buffered events.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops all buffered events.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn clear(&self) {
        self.events.lock().expect("event log lock poisoned").clear();
    }
}

fn mirror_to_tracing(event: &Event) {
    let category = event.category.as_str();
    let message = event.message.as_str();
    match event.level {
        EventLevel::Debug => tracing::debug!(category, "{message}"),
        EventLevel::Info => tracing::info!(category, "{message}"),
        EventLevel::Warning => tracing::warn!(category, "{message}"),
        EventLevel::Error => tracing::error!(category, "{message}"),
    }
}
