//! Forgiving merge-patch for runtime configuration.
//!
//! Only the fields a client sends are touched. Unknown fields are ignored
//! (with a suggestion when one is close), `null` means "leave unchanged",
//! and a bad value skips that field while the rest still apply.

use serde_json::{Map, Value};

use crate::config::schema::Settings;
use crate::sequence::Mode;

/// A field that may be changed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfigField {
    /// `mode`
    Mode,
    /// `trigger_frequency_min`
    TriggerFrequencyMin,
    /// `trigger_frequency_max`
    TriggerFrequencyMax,
    /// `trigger_amplitude_threshold`
    TriggerAmplitudeThreshold,
    /// `countdown_duration`
    CountdownDuration,
    /// `active_duration`
    ActiveDuration,
    /// `reset_duration`
    ResetDuration,
    /// `scream_delay`
    ScreamDelay,
}

impl ConfigField {
    /// Every patchable field.
    pub const ALL: [Self; 8] = [
        Self::Mode,
        Self::TriggerFrequencyMin,
        Self::TriggerFrequencyMax,
        Self::TriggerAmplitudeThreshold,
        Self::CountdownDuration,
        Self::ActiveDuration,
        Self::ResetDuration,
        Self::ScreamDelay,
    ];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mode => "mode",
            Self::TriggerFrequencyMin => "trigger_frequency_min",
            Self::TriggerFrequencyMax => "trigger_frequency_max",
            Self::TriggerAmplitudeThreshold => "trigger_amplitude_threshold",
            Self::CountdownDuration => "countdown_duration",
            Self::ActiveDuration => "active_duration",
            Self::ResetDuration => "reset_duration",
            Self::ScreamDelay => "scream_delay",
        }
    }

    /// Looks a field up by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.as_str() == name)
    }

    /// Closest known field name, if within edit distance 3.
    #[must_use]
    pub fn suggest(name: &str) -> Option<&'static str> {
        Self::ALL
            .iter()
            .map(|f| (f.as_str(), strsim::damerau_levenshtein(name, f.as_str())))
            .filter(|(_, dist)| *dist <= 3)
            .min_by_key(|(_, dist)| *dist)
            .map(|(name, _)| name)
    }

    /// Whether the field governs trigger detection.
    #[must_use]
    pub const fn is_trigger(self) -> bool {
        matches!(
            self,
            Self::TriggerFrequencyMin | Self::TriggerFrequencyMax | Self::TriggerAmplitudeThreshold
        )
    }

    /// Whether the field is a sequence phase duration.
    #[must_use]
    pub const fn is_phase_timing(self) -> bool {
        matches!(
            self,
            Self::CountdownDuration | Self::ActiveDuration | Self::ResetDuration
        )
    }
}

impl std::fmt::Display for ConfigField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, range-checked value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PatchValue {
    /// New mode.
    Mode(Mode),
    /// New number (Hz, ratio or seconds depending on the field).
    Number(f64),
}

impl std::fmt::Display for PatchValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mode(mode) => write!(f, "{mode}"),
            Self::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<PatchValue> for Value {
    fn from(value: PatchValue) -> Self {
        match value {
            PatchValue::Mode(mode) => Self::from(mode.as_str()),
            PatchValue::Number(n) => Self::from(n),
        }
    }
}

/// One accepted change.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PatchEntry {
    /// Target field.
    pub field: ConfigField,
    /// New value.
    pub value: PatchValue,
}

/// A known field whose value was refused.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedField {
    /// Target field.
    pub field: ConfigField,
    /// The value as sent.
    pub value: Value,
    /// Why it was refused.
    pub reason: String,
}

/// A field name nobody recognises.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    /// Name as sent.
    pub name: String,
    /// Closest known field, if any.
    pub suggestion: Option<&'static str>,
}

/// Parsed merge-patch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigPatch {
    /// Changes that passed parsing and range checks.
    pub entries: Vec<PatchEntry>,
    /// Known fields with unusable values.
    pub rejected: Vec<RejectedField>,
    /// Unrecognised fields.
    pub unknown: Vec<UnknownField>,
}

impl ConfigPatch {
    /// Parses a JSON object into a patch.
    ///
    /// Range checks that involve other fields (the trigger band) run in
    /// [`ConfigPatch::apply`].
    #[must_use]
    pub fn parse(map: &Map<String, Value>) -> Self {
        let mut patch = Self::default();
        for (name, raw) in map {
            let Some(field) = ConfigField::from_name(name) else {
                patch.unknown.push(UnknownField {
                    name: name.clone(),
                    suggestion: ConfigField::suggest(name),
                });
                continue;
            };
            if raw.is_null() {
                continue;
            }
            match parse_value(field, raw) {
                Ok(value) => patch.entries.push(PatchEntry { field, value }),
                Err(reason) => patch.rejected.push(RejectedField {
                    field,
                    value: raw.clone(),
                    reason,
                }),
            }
        }
        patch
    }

    /// Returns `true` if nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Writes accepted entries into `settings` and returns them.
    ///
    /// Band edges are checked against each other using the patched values;
    /// if the resulting band would be inverted both edges are moved to
    /// `rejected` and `settings` keeps its current band.
    pub fn apply(&mut self, settings: &mut Settings) -> Vec<PatchEntry> {
        let number = |field| {
            self.entries.iter().find_map(|e| match (e.field == field, e.value) {
                (true, PatchValue::Number(n)) => Some(n),
                _ => None,
            })
        };
        let min = number(ConfigField::TriggerFrequencyMin)
            .unwrap_or(settings.audio.trigger_frequency_min);
        let max = number(ConfigField::TriggerFrequencyMax)
            .unwrap_or(settings.audio.trigger_frequency_max);

        if min > max {
            let reason = format!("trigger band would be inverted ({min} > {max})");
            let (band, keep): (Vec<PatchEntry>, Vec<PatchEntry>) =
                std::mem::take(&mut self.entries).into_iter().partition(|e| {
                    matches!(
                        e.field,
                        ConfigField::TriggerFrequencyMin | ConfigField::TriggerFrequencyMax
                    )
                });
            for entry in band {
                if let PatchValue::Number(n) = entry.value {
                    self.rejected.push(RejectedField {
                        field: entry.field,
                        value: Value::from(n),
                        reason: reason.clone(),
                    });
                }
            }
            self.entries = keep;
        }

        for entry in &self.entries {
            write_entry(settings, *entry);
        }
        self.entries.clone()
    }
}

fn write_entry(settings: &mut Settings, entry: PatchEntry) {
    match (entry.field, entry.value) {
        (ConfigField::Mode, PatchValue::Mode(mode)) => settings.mode = mode,
        (ConfigField::TriggerFrequencyMin, PatchValue::Number(n)) => {
            settings.audio.trigger_frequency_min = n;
        }
        (ConfigField::TriggerFrequencyMax, PatchValue::Number(n)) => {
            settings.audio.trigger_frequency_max = n;
        }
        (ConfigField::TriggerAmplitudeThreshold, PatchValue::Number(n)) => {
            settings.audio.trigger_amplitude_threshold = n;
        }
        (ConfigField::CountdownDuration, PatchValue::Number(n)) => {
            settings.timing.countdown_duration = n;
        }
        (ConfigField::ActiveDuration, PatchValue::Number(n)) => {
            settings.timing.active_duration = n;
        }
        (ConfigField::ResetDuration, PatchValue::Number(n)) => {
            settings.timing.reset_duration = n;
        }
        (ConfigField::ScreamDelay, PatchValue::Number(n)) => settings.timing.scream_delay = n,
        // parse_value never pairs a field with the other value kind
        _ => {}
    }
}

fn parse_value(field: ConfigField, raw: &Value) -> Result<PatchValue, String> {
    if field == ConfigField::Mode {
        return raw
            .as_str()
            .ok_or_else(|| "expected a string".to_string())?
            .parse::<Mode>()
            .map(PatchValue::Mode);
    }

    let n = raw
        .as_f64()
        .filter(|n| n.is_finite())
        .ok_or_else(|| "expected a number".to_string())?;

    let ok = match field {
        ConfigField::TriggerFrequencyMin | ConfigField::TriggerFrequencyMax => n > 0.0,
        ConfigField::TriggerAmplitudeThreshold => (0.0..=1.0).contains(&n),
        ConfigField::ScreamDelay => n >= 0.0,
        _ => n > 0.0,
    };
    if !ok {
        let expected = match field {
            ConfigField::TriggerAmplitudeThreshold => "a value within 0.0..=1.0",
            ConfigField::ScreamDelay => "a non-negative number of seconds",
            ConfigField::TriggerFrequencyMin | ConfigField::TriggerFrequencyMax => {
                "a positive frequency in Hz"
            }
            _ => "a positive number of seconds",
        };
        return Err(format!("expected {expected}, got {n}"));
    }
    Ok(PatchValue::Number(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test input must be an object"),
        }
    }

    #[test]
    fn single_field_changes_only_that_field() {
        let mut settings = Settings::default();
        let before = settings.clone();
        let mut patch = ConfigPatch::parse(&object(json!({ "trigger_amplitude_threshold": 0.5 })));
        let applied = patch.apply(&mut settings);

        assert_eq!(applied.len(), 1);
        assert!((settings.audio.trigger_amplitude_threshold - 0.5).abs() < f64::EPSILON);
        settings.audio.trigger_amplitude_threshold = before.audio.trigger_amplitude_threshold;
        assert_eq!(settings, before);
    }

    #[test]
    fn unknown_fields_are_ignored_with_suggestion() {
        let patch = ConfigPatch::parse(&object(json!({ "scream_dealy": 1.0, "colour": "red" })));
        assert!(patch.is_empty());
        assert_eq!(patch.unknown.len(), 2);
        let typo = patch.unknown.iter().find(|u| u.name == "scream_dealy").unwrap();
        assert_eq!(typo.suggestion, Some("scream_delay"));
        let far = patch.unknown.iter().find(|u| u.name == "colour").unwrap();
        assert_eq!(far.suggestion, None);
    }

    #[test]
    fn bad_values_are_rejected_and_others_apply() {
        let mut settings = Settings::default();
        let mut patch = ConfigPatch::parse(&object(json!({
            "countdown_duration": -2,
            "active_duration": "long",
            "reset_duration": 1.5,
            "mode": "adult",
        })));
        assert_eq!(patch.rejected.len(), 2);

        let applied = patch.apply(&mut settings);
        assert_eq!(applied.len(), 2);
        assert_eq!(settings.mode, Mode::Adult);
        assert!((settings.timing.reset_duration - 1.5).abs() < f64::EPSILON);
        assert!((settings.timing.countdown_duration - 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn null_means_unchanged() {
        let patch = ConfigPatch::parse(&object(json!({ "scream_delay": null })));
        assert!(patch.is_empty());
        assert!(patch.rejected.is_empty());
        assert!(patch.unknown.is_empty());
    }

    #[test]
    fn band_is_checked_against_patched_values() {
        let mut settings = Settings::default();
        let mut patch = ConfigPatch::parse(&object(json!({
            "trigger_frequency_min": 100.0,
            "trigger_frequency_max": 300.0,
        })));
        patch.apply(&mut settings);
        assert!((settings.audio.trigger_frequency_min - 100.0).abs() < f64::EPSILON);
        assert!((settings.audio.trigger_frequency_max - 300.0).abs() < f64::EPSILON);
    }

    #[test]
    fn inverted_band_is_refused() {
        let mut settings = Settings::default();
        let mut patch = ConfigPatch::parse(&object(json!({
            "trigger_frequency_min": 2000.0,
            "scream_delay": 0.5,
        })));
        let applied = patch.apply(&mut settings);
        assert_eq!(applied.len(), 1);
        assert_eq!(applied[0].field, ConfigField::ScreamDelay);
        assert_eq!(patch.rejected.len(), 1);
        assert!((settings.audio.trigger_frequency_min - 800.0).abs() < f64::EPSILON);
    }

    #[test]
    fn mode_is_case_insensitive() {
        let patch = ConfigPatch::parse(&object(json!({ "mode": "ADULT" })));
        assert_eq!(patch.entries[0].value, PatchValue::Mode(Mode::Adult));
        let bad = ConfigPatch::parse(&object(json!({ "mode": "toddler" })));
        assert_eq!(bad.rejected.len(), 1);
    }
}
