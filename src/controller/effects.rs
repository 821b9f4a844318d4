//! Hardware effect dispatch.
//!
//! Every device call goes through [`Effects`], which turns failures into a
//! Hardware-category error event, a metric and a notification. Failures
//! never propagate to the sequence.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::IntensityLevel;
use crate::error::HardwareError;
use crate::hardware::{Devices, EFFECT_TIMEOUT};
use crate::hub::{BroadcastHub, HubMessage, Notification, NotificationLevel};
use crate::observability::event_log::{EventCategory, EventLevel, EventLog};
use crate::observability::metrics;

/// Reset ramp resolution.
const RESET_STEPS_PER_SECOND: u128 = 10;

#[derive(Clone)]
pub(crate) struct Effects {
    devices: Devices,
    events: Arc<EventLog>,
    hub: Arc<BroadcastHub>,
}

impl Effects {
    pub(crate) const fn new(devices: Devices, events: Arc<EventLog>, hub: Arc<BroadcastHub>) -> Self {
        Self { devices, events, hub }
    }

    /// Logs, counts and announces a failed effect.
    pub(crate) fn report(&self, effect: &'static str, error: &HardwareError) {
        metrics::record_effect_error(error.device());
        self.events.log(
            EventLevel::Error,
            EventCategory::Hardware,
            format!("{effect} failed: {error}"),
            json!({
                "device": error.device(),
                "effect": effect,
                "error": error.to_string(),
            }),
        );
        self.hub.broadcast(&HubMessage::Notification(Notification::new(
            NotificationLevel::Error,
            "Hardware fault",
            error.to_string(),
        )));
    }

    async fn run(
        &self,
        effect: &'static str,
        call: impl Future<Output = Result<(), HardwareError>>,
    ) {
        if let Err(e) = call.await {
            self.report(effect, &e);
        }
    }

    /// Like [`Effects::run`] but gives up after [`EFFECT_TIMEOUT`].
    async fn run_bounded(
        &self,
        device: &'static str,
        effect: &'static str,
        call: impl Future<Output = Result<(), HardwareError>>,
    ) {
        match tokio::time::timeout(EFFECT_TIMEOUT, call).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.report(effect, &e),
            Err(_) => self.report(
                effect,
                &HardwareError::Timeout {
                    device,
                    command: effect,
                },
            ),
        }
    }

    /// Countdown glitch and distortion at `progress` (`0.0..=1.0`).
    pub(crate) async fn countdown(&self, progress: f64) {
        tokio::join!(
            self.run_bounded("lights", "glitch", self.devices.lights.glitch(progress)),
            self.run_bounded(
                "speaker",
                "apply_distortion",
                self.devices.speaker.apply_distortion(progress)
            ),
        );
    }

    /// Ambient lighting and music.
    pub(crate) async fn ambient(&self, level: IntensityLevel) {
        tokio::join!(
            self.run_bounded("lights", "ambient", self.devices.lights.ambient(level.brightness)),
            self.run_bounded(
                "speaker",
                "play_ambient",
                self.devices.speaker.play_ambient(level.volume)
            ),
        );
    }

    /// Ambient lighting only.
    pub(crate) async fn ambient_lights(&self, brightness: f64) {
        self.run_bounded("lights", "ambient", self.devices.lights.ambient(brightness))
            .await;
    }

    /// Speaker master volume.
    pub(crate) async fn set_volume(&self, volume: f64) {
        self.run_bounded("speaker", "set_volume", self.devices.speaker.set_volume(volume))
            .await;
    }

    /// Powers the lights off and stops playback.
    pub(crate) async fn release(&self) {
        tokio::join!(
            self.run_bounded("lights", "shutdown", self.devices.lights.shutdown()),
            self.run_bounded("speaker", "shutdown", self.devices.speaker.shutdown()),
        );
    }

    /// Runs countdown effects for the latest progress published on
    /// `progress`. Values that arrive while an effect is in flight replace
    /// each other, so a slow driver skips ticks instead of queueing them.
    ///
    /// Ends when cancelled or when the sender is dropped.
    pub(crate) fn spawn_countdown(
        &self,
        cancel: CancellationToken,
        mut progress: watch::Receiver<f64>,
    ) -> JoinHandle<()> {
        let effects = self.clone();
        tokio::spawn(async move {
            loop {
                let value = *progress.borrow_and_update();
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = effects.countdown(value) => {}
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = progress.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }
        })
    }

    /// Plays the scare after `delay`, then flashes. Abandoned on cancel.
    pub(crate) fn spawn_scare(
        &self,
        cancel: CancellationToken,
        level: IntensityLevel,
        delay: Duration,
    ) -> JoinHandle<()> {
        let effects = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => return,
                () = tokio::time::sleep(delay) => {}
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                () = effects.run("play_scare", effects.devices.speaker.play_scare(level.volume)) => {}
            }
            tokio::select! {
                () = cancel.cancelled() => {}
                () = effects.run_bounded("lights", "flash", effects.devices.lights.flash(level.brightness)) => {}
            }
        })
    }

    /// Ramps glitch and distortion from full down to zero over `duration`,
    /// then restores ambient. Stops advancing on cancel.
    pub(crate) fn spawn_reset(
        &self,
        cancel: CancellationToken,
        duration: Duration,
        level: IntensityLevel,
    ) -> JoinHandle<()> {
        let effects = self.clone();
        tokio::spawn(async move {
            let steps = u32::try_from((duration.as_millis() * RESET_STEPS_PER_SECOND / 1000).max(1))
                .unwrap_or(u32::MAX);
            let step_delay = duration / steps;

            for i in 0..steps {
                let intensity = 1.0 - f64::from(i) / f64::from(steps);
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = effects.ramp_step(intensity) => {}
                }
                tokio::select! {
                    () = cancel.cancelled() => return,
                    () = tokio::time::sleep(step_delay) => {}
                }
            }

            tokio::select! {
                () = cancel.cancelled() => {}
                () = async {
                    effects
                        .run_bounded("speaker", "apply_distortion", effects.devices.speaker.apply_distortion(0.0))
                        .await;
                    effects.ambient(level).await;
                } => {}
            }
        })
    }

    async fn ramp_step(&self, intensity: f64) {
        tokio::join!(
            self.run_bounded("lights", "glitch", self.devices.lights.glitch(intensity)),
            self.run_bounded(
                "speaker",
                "apply_distortion",
                self.devices.speaker.apply_distortion(intensity)
            ),
        );
    }
}

/// Countdown progress from the remaining time: `0.0` at the start, `1.0` at zero.
pub(crate) fn countdown_progress(remaining: Duration, countdown_secs: f64) -> f64 {
    if !(countdown_secs.is_finite() && countdown_secs > 0.0) {
        return 1.0;
    }
    (1.0 - remaining.as_secs_f64() / countdown_secs).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_runs_from_zero_to_one() {
        assert!((countdown_progress(Duration::from_secs(3), 3.0)).abs() < f64::EPSILON);
        assert!((countdown_progress(Duration::from_millis(1500), 3.0) - 0.5).abs() < 1e-9);
        assert!((countdown_progress(Duration::ZERO, 3.0) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn progress_handles_degenerate_countdown() {
        assert!((countdown_progress(Duration::from_secs(1), 0.0) - 1.0).abs() < f64::EPSILON);
        assert!((countdown_progress(Duration::from_secs(5), 3.0)).abs() < f64::EPSILON);
    }
}
