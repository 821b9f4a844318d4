//! Periodic background loops that live for one running session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::effects::Effects;
use crate::config::Settings;
use crate::hardware::LightDriver;
use crate::hub::{BroadcastHub, HubMessage};
use crate::sequence::{Phase, SequenceMachine};

/// How often the ambient pattern is refreshed while idle.
pub const AMBIENT_INTERVAL: Duration = Duration::from_secs(3);

/// Refreshes ambient lighting every [`AMBIENT_INTERVAL`] while the machine is idle.
pub(crate) fn spawn_ambient_loop(
    effects: Effects,
    machine: Arc<SequenceMachine>,
    settings: watch::Receiver<Settings>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval_at(Instant::now() + AMBIENT_INTERVAL, AMBIENT_INTERVAL);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if machine.phase() != Phase::Idle {
                        continue;
                    }
                    let brightness = settings.borrow().intensity.for_mode(machine.mode()).brightness;
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = effects.ambient_lights(brightness) => {}
                    }
                }
            }
        }
    })
}

/// Pushes the light status map to every subscriber once per `period`.
pub(crate) fn spawn_light_status_stream(
    lights: Arc<dyn LightDriver>,
    hub: Arc<BroadcastHub>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let status = tokio::select! {
                        () = cancel.cancelled() => break,
                        status = lights.status() => status,
                    };
                    hub.broadcast(&HubMessage::LightStatus(status));
                }
            }
        }
        tracing::debug!("light status stream stopped");
    })
}
