//! Metrics collection for `ScareBox`.
//!
//! Prometheus-compatible metrics through the `metrics` facade. Recording is
//! a no-op until [`init_metrics`] installs a recorder, so library code and
//! tests can call the helpers unconditionally.

use std::sync::atomic::{AtomicBool, Ordering};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::ScareBoxError;
use crate::observability::event_log::{EventCategory, EventLevel};
use crate::sequence::Phase;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

const ALL_PHASES: [Phase; 4] = [Phase::Idle, Phase::Countdown, Phase::Active, Phase::Resetting];

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint.
///
/// # Errors
///
/// Returns `ScareBoxError::Io` if the recorder or HTTP listener cannot be
/// installed (e.g. port already in use).
pub fn init_metrics(port: Option<u16>) -> Result<(), ScareBoxError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| ScareBoxError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "scarebox_triggers_total",
        "Trigger requests by source and outcome"
    );
    describe_counter!(
        "scarebox_phase_transitions_total",
        "Phase transitions by destination phase"
    );
    describe_gauge!(
        "scarebox_current_phase",
        "Currently active phase (1 = active)"
    );
    describe_counter!("scarebox_events_total", "Event log appends");
    describe_gauge!("scarebox_hub_subscribers", "Live broadcast subscribers");
    describe_counter!(
        "scarebox_hub_dropped_total",
        "Subscribers removed after a failed delivery"
    );
    describe_counter!(
        "scarebox_effect_errors_total",
        "Hardware effect dispatch failures by device"
    );
    describe_counter!(
        "scarebox_audio_frames_dropped_total",
        "Audio frames dropped because the hand-off queue was full"
    );
    describe_counter!(
        "scarebox_config_updates_total",
        "Runtime configuration fields applied"
    );
}

/// Records a trigger request (`source` = audio/manual, `outcome` = started/rejected/dropped).
pub fn record_trigger(source: &'static str, outcome: &'static str) {
    counter!("scarebox_triggers_total", "source" => source, "outcome" => outcome).increment(1);
}

/// Records a true phase change and updates the current-phase gauge.
pub fn record_phase_transition(to: Phase) {
    counter!("scarebox_phase_transitions_total", "to" => to.as_str()).increment(1);
    for phase in ALL_PHASES {
        let value = if phase == to { 1.0 } else { 0.0 };
        gauge!("scarebox_current_phase", "phase" => phase.as_str()).set(value);
    }
}

/// Records an event log append.
pub fn record_event(level: EventLevel, category: EventCategory) {
    counter!(
        "scarebox_events_total",
        "level" => level.as_str(),
        "category" => category.as_str()
    )
    .increment(1);
}

/// Sets the live subscriber gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_hub_subscribers(count: usize) {
    gauge!("scarebox_hub_subscribers").set(count as f64);
}

/// Records subscribers dropped after failed deliveries.
pub fn record_hub_dropped(count: usize) {
    counter!("scarebox_hub_dropped_total").increment(count as u64);
}

/// Records a failed effect dispatch.
pub fn record_effect_error(device: &'static str) {
    counter!("scarebox_effect_errors_total", "device" => device).increment(1);
}

/// Records an audio frame dropped at the hand-off queue.
pub fn record_audio_frame_dropped() {
    counter!("scarebox_audio_frames_dropped_total").increment(1);
}

/// Records one applied configuration field.
pub fn record_config_update(field: &'static str) {
    counter!("scarebox_config_updates_total", "field" => field).increment(1);
}
