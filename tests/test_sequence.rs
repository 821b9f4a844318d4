//! Sequence machine behaviour end to end: full runs, rejection while busy,
//! cancellation at arbitrary points and countdown progression.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio_test::assert_ok;

use scarebox::observability::{EventCategory, EventLog, EventQuery};
use scarebox::sequence::{Phase, PhaseTransition, SequenceMachine, SequenceTiming, TICKS, TriggerOutcome};

use common::{record_transitions, wait_until, within};

fn scenario_timing() -> SequenceTiming {
    SequenceTiming {
        countdown: Duration::from_millis(100),
        active: Duration::from_millis(50),
        reset: Duration::from_millis(50),
    }
}

fn machine() -> (SequenceMachine, Arc<EventLog>) {
    let events = Arc::new(EventLog::new(100));
    (SequenceMachine::new(scenario_timing(), Arc::clone(&events)), events)
}

fn changes(seen: &[PhaseTransition]) -> Vec<(Phase, Phase)> {
    seen.iter()
        .filter(|t| !t.is_tick())
        .map(|t| (t.from, t.to))
        .collect()
}

#[tokio::test]
async fn full_run_emits_every_transition_in_order() {
    let (machine, _) = machine();
    let seen = record_transitions(&machine);

    let outcome = assert_ok!(machine.trigger());
    assert_eq!(outcome, TriggerOutcome::Started);

    tokio::time::sleep(Duration::from_millis(250)).await;
    wait_until(|| machine.can_trigger()).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen.len(), 4 + TICKS as usize);

    assert_eq!((seen[0].from, seen[0].to), (Phase::Idle, Phase::Countdown));
    for tick in &seen[1..=TICKS as usize] {
        assert!(tick.is_tick());
        assert_eq!((tick.from, tick.to), (Phase::Countdown, Phase::Countdown));
    }
    assert_eq!(
        changes(&seen),
        vec![
            (Phase::Idle, Phase::Countdown),
            (Phase::Countdown, Phase::Active),
            (Phase::Active, Phase::Resetting),
            (Phase::Resetting, Phase::Idle),
        ]
    );
    assert_eq!(machine.phase(), Phase::Idle);
}

#[tokio::test]
async fn trigger_during_run_is_rejected_without_side_effects() {
    let (machine, _) = machine();
    let seen = record_transitions(&machine);

    assert_eq!(assert_ok!(machine.trigger()), TriggerOutcome::Started);
    tokio::time::sleep(Duration::from_millis(50)).await;

    for _ in 0..5 {
        assert_eq!(assert_ok!(machine.trigger()), TriggerOutcome::Rejected);
    }
    assert!(!machine.can_trigger());

    within(async {
        while !machine.can_trigger() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;

    let seen = seen.lock().unwrap();
    let starts = seen
        .iter()
        .filter(|t| t.from == Phase::Idle && t.to == Phase::Countdown)
        .count();
    assert_eq!(starts, 1);
    assert_eq!(seen.len(), 4 + TICKS as usize);
}

#[tokio::test]
async fn cancellation_at_any_point_returns_to_idle() {
    for delay_ms in [0_u64, 20, 60, 120, 170] {
        let (machine, _) = machine();
        let seen = record_transitions(&machine);

        assert_eq!(assert_ok!(machine.trigger()), TriggerOutcome::Started);
        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        within(machine.stop()).await;

        let seen = seen.lock().unwrap();
        let last = seen.last().expect("at least the start transition");
        assert_eq!(last.to, Phase::Idle, "cancel after {delay_ms} ms");
        assert_eq!(machine.phase(), Phase::Idle);
        assert!(machine.can_trigger(), "re-triggerable after {delay_ms} ms");
        assert_eq!(
            seen.iter().filter(|t| t.to == Phase::Idle).count(),
            1,
            "exactly one return to idle after {delay_ms} ms"
        );
    }
}

#[tokio::test]
async fn machine_can_run_again_after_stop() {
    let (machine, _) = machine();
    let seen = record_transitions(&machine);

    assert_ok!(machine.trigger());
    tokio::time::sleep(Duration::from_millis(30)).await;
    within(machine.stop()).await;

    seen.lock().unwrap().clear();
    assert_eq!(assert_ok!(machine.trigger()), TriggerOutcome::Started);
    wait_until(|| machine.can_trigger()).await;

    assert_eq!(seen.lock().unwrap().len(), 4 + TICKS as usize);
}

#[tokio::test]
async fn countdown_is_monotonic_and_reaches_zero() {
    let (machine, _) = machine();
    let seen = record_transitions(&machine);

    assert_ok!(machine.trigger());
    wait_until(|| machine.can_trigger()).await;

    let remaining: Vec<Duration> = seen
        .lock()
        .unwrap()
        .iter()
        .filter(|t| t.is_tick())
        .filter_map(|t| t.countdown_remaining)
        .collect();

    assert_eq!(remaining.len(), TICKS as usize);
    assert!(remaining[0] <= scenario_timing().countdown);
    assert!(remaining.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(*remaining.last().unwrap(), Duration::ZERO);
}

#[tokio::test]
async fn timing_update_applies_to_next_run_only() {
    let (machine, _) = machine();

    assert_ok!(machine.trigger());
    machine.update_timing(Some(Duration::from_millis(20)), None, None);
    assert_eq!(machine.timing().countdown, Duration::from_millis(20));

    let started = tokio::time::Instant::now();
    wait_until(|| machine.can_trigger()).await;
    // The running pass kept its 100 ms countdown.
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn failing_observer_does_not_stop_the_run() {
    let (machine, events) = machine();
    machine.on_transition(Arc::new(scarebox::observer::FnObserver::new(
        |_: &PhaseTransition| Err(scarebox::observer::ObserverError::new("boom")),
    )));
    let seen = record_transitions(&machine);

    assert_ok!(machine.trigger());
    wait_until(|| machine.can_trigger()).await;

    assert_eq!(seen.lock().unwrap().len(), 4 + TICKS as usize);
    let failures = events.query(&EventQuery {
        category: Some(EventCategory::System),
        ..EventQuery::default()
    });
    assert_eq!(failures.len(), 4 + TICKS as usize);
}
