//! Configuration validation
//!
//! Semantic checks on a deserialized [`Settings`]. All issues are collected
//! rather than stopping at the first one.

use crate::config::schema::{IntensityLevel, Settings};
use crate::error::ValidationIssue;

// ============================================================================
// Public API
// ============================================================================

/// Result of configuration validation.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// Validation errors (prevent startup).
    pub errors: Vec<ValidationIssue>,

    /// Validation warnings (informational).
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Returns `true` if there are any errors.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// Returns `true` if validation passed (no errors).
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// All issues, errors first.
    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }
}

impl Settings {
    /// Validates these settings.
    #[must_use]
    pub fn validate(&self) -> ValidationResult {
        Validator::default().validate(self)
    }
}

/// Settings validator.
#[derive(Debug, Default)]
pub struct Validator {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Validator {
    /// Validates `settings` and returns every issue found.
    pub fn validate(&mut self, settings: &Settings) -> ValidationResult {
        self.errors.clear();
        self.warnings.clear();

        self.validate_audio(settings);
        self.validate_timing(settings);
        self.validate_intensity(settings);
        self.validate_server(settings);
        self.validate_telemetry(settings);

        ValidationResult {
            errors: std::mem::take(&mut self.errors),
            warnings: std::mem::take(&mut self.warnings),
        }
    }

    // ========================================================================
    // Sections
    // ========================================================================

    fn validate_audio(&mut self, settings: &Settings) {
        let audio = &settings.audio;

        if !is_positive(audio.trigger_frequency_min) {
            self.add_error("audio.trigger_frequency_min", "must be a positive number of Hz");
        }
        if !is_positive(audio.trigger_frequency_max) {
            self.add_error("audio.trigger_frequency_max", "must be a positive number of Hz");
        }
        if audio.trigger_frequency_min > audio.trigger_frequency_max {
            self.add_error(
                "audio.trigger_frequency_min",
                "must not exceed audio.trigger_frequency_max",
            );
        }
        if !is_unit(audio.trigger_amplitude_threshold) {
            self.add_error("audio.trigger_amplitude_threshold", "must be within 0.0..=1.0");
        }
        if audio.sample_rate == 0 {
            self.add_error("audio.sample_rate", "must be greater than zero");
        } else if audio.trigger_frequency_max > f64::from(audio.sample_rate) / 2.0 {
            self.add_warning(
                "audio.trigger_frequency_max",
                "is above the Nyquist frequency and can never be detected",
            );
        }
        if audio.chunk_size == 0 {
            self.add_error("audio.chunk_size", "must be greater than zero");
        }
    }

    fn validate_timing(&mut self, settings: &Settings) {
        let timing = &settings.timing;

        for (path, value) in [
            ("timing.countdown_duration", timing.countdown_duration),
            ("timing.active_duration", timing.active_duration),
            ("timing.reset_duration", timing.reset_duration),
        ] {
            if !is_positive(value) {
                self.add_error(path, "must be a positive number of seconds");
            }
        }

        if !timing.scream_delay.is_finite() || timing.scream_delay < 0.0 {
            self.add_error("timing.scream_delay", "must not be negative");
        } else if timing.scream_delay > timing.active_duration {
            self.add_warning(
                "timing.scream_delay",
                "is longer than the active phase; the scare plays during reset",
            );
        }
    }

    fn validate_intensity(&mut self, settings: &Settings) {
        self.validate_level("intensity.child", settings.intensity.child);
        self.validate_level("intensity.adult", settings.intensity.adult);
    }

    fn validate_level(&mut self, prefix: &str, level: IntensityLevel) {
        if !is_unit(level.brightness) {
            self.add_error(&format!("{prefix}.brightness"), "must be within 0.0..=1.0");
        }
        if !is_unit(level.volume) {
            self.add_error(&format!("{prefix}.volume"), "must be within 0.0..=1.0");
        }
    }

    fn validate_server(&mut self, settings: &Settings) {
        if settings.server.host.trim().is_empty() {
            self.add_error("server.host", "must not be empty");
        }
        if settings.server.port == 0 {
            self.add_warning("server.port", "port 0 binds a random port");
        }
        if settings.server.cors_origins.is_empty() {
            self.add_warning(
                "server.cors_origins",
                "no origins allowed; browser dashboards will be blocked",
            );
        }
    }

    fn validate_telemetry(&mut self, settings: &Settings) {
        let telemetry = &settings.telemetry;
        if !is_positive(telemetry.light_status_interval) {
            self.add_error(
                "telemetry.light_status_interval",
                "must be a positive number of seconds",
            );
        }
        if telemetry.event_log_capacity == 0 {
            self.add_error("telemetry.event_log_capacity", "must be greater than zero");
        }
        if telemetry.subscriber_queue == 0 {
            self.add_error("telemetry.subscriber_queue", "must be greater than zero");
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Adds an error to the collection.
    fn add_error(&mut self, path: &str, message: &str) {
        self.errors.push(ValidationIssue::error(path, message));
    }

    /// Adds a warning to the collection.
    fn add_warning(&mut self, path: &str, message: &str) {
        self.warnings.push(ValidationIssue::warning(path, message));
    }
}

fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

fn is_unit(value: f64) -> bool {
    (0.0..=1.0).contains(&value)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Severity;

    #[test]
    fn defaults_are_valid() {
        let result = Settings::default().validate();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn inverted_band_is_an_error() {
        let mut settings = Settings::default();
        settings.audio.trigger_frequency_min = 1500.0;
        let result = settings.validate();
        assert!(result.has_errors());
        assert_eq!(result.errors[0].path, "audio.trigger_frequency_min");
    }

    #[test]
    fn collects_all_errors() {
        let mut settings = Settings::default();
        settings.timing.countdown_duration = 0.0;
        settings.timing.reset_duration = -1.0;
        settings.intensity.adult.volume = 1.5;
        settings.telemetry.event_log_capacity = 0;
        let result = settings.validate();
        assert_eq!(result.errors.len(), 4);
    }

    #[test]
    fn long_scream_delay_is_a_warning() {
        let mut settings = Settings::default();
        settings.timing.scream_delay = 10.0;
        let result = settings.validate();
        assert!(result.is_valid());
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].severity, Severity::Warning);
    }

    #[test]
    fn issues_lists_errors_before_warnings() {
        let mut settings = Settings::default();
        settings.server.port = 0;
        settings.audio.chunk_size = 0;
        let result = settings.validate();
        let issues: Vec<_> = result.issues().collect();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].severity, Severity::Error);
        assert_eq!(issues[1].severity, Severity::Warning);
    }
}
