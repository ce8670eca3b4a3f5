use keel_governor::{
    GovernorEvent, OperationId, OperationRequest, Priority, PressureLevel, RejectReason,
};
use tokio::sync::broadcast::error::TryRecvError;

use super::support::{drain_events, governor_with, governor_with_config, test_config};

#[tokio::test]
async fn rising_pressure_emits_each_transition_exactly_once() {
    // Five ticks climbing from 50% to 97% of the simulated ceiling.
    let governor = governor_with(&[500, 650, 790, 850, 970]);
    let mut events = governor.subscribe();
    for _ in 0..5 {
        governor.poll_sample();
    }

    let transitions: Vec<(PressureLevel, PressureLevel, u64)> = drain_events(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            GovernorEvent::PressureChanged {
                previous,
                level,
                usage_bytes,
            } => Some((previous, level, usage_bytes)),
            _ => None,
        })
        .collect();

    assert_eq!(
        transitions,
        vec![
            (PressureLevel::Normal, PressureLevel::Warning, 650),
            (PressureLevel::Warning, PressureLevel::Critical, 850),
            (PressureLevel::Critical, PressureLevel::Emergency, 970),
        ]
    );
}

#[tokio::test]
async fn every_tick_emits_a_raw_sample_event() {
    let governor = governor_with(&[500, 650]);
    let mut samples = governor.subscribe_samples();

    governor.poll_sample();
    governor.poll_sample();

    let first = samples.try_recv().expect("first tick sample");
    assert_eq!(first.reading.heap_used, 500);
    assert_eq!(first.level, PressureLevel::Normal);
    let second = samples.try_recv().expect("second tick sample");
    assert_eq!(second.reading.heap_used, 650);
    assert_eq!(second.level, PressureLevel::Warning);
    assert!(samples.try_recv().is_err());
}

#[tokio::test]
async fn slow_sample_subscribers_lose_old_ticks_not_transitions() {
    let mut config = test_config();
    config.sample_channel_capacity = 2;
    let governor = governor_with_config(config, &[500, 650, 790, 850]);
    let mut samples = governor.subscribe_samples();
    let mut events = governor.subscribe();

    for _ in 0..4 {
        governor.poll_sample();
    }

    assert!(matches!(samples.try_recv(), Err(TryRecvError::Lagged(_))));
    let mut seen = Vec::new();
    while let Ok(sample) = samples.try_recv() {
        seen.push(sample.reading.heap_used);
    }
    assert_eq!(seen, vec![790, 850], "only the newest ticks survive");

    let transitions = drain_events(&mut events)
        .into_iter()
        .filter(|event| matches!(event, GovernorEvent::PressureChanged { .. }))
        .count();
    assert_eq!(transitions, 2, "transition events are never dropped");
}

#[tokio::test]
async fn rejections_are_published_to_subscribers() {
    let governor = governor_with(&[990]);
    governor.poll_sample();
    let mut events = governor.subscribe();

    governor.admit(OperationRequest::new(3, Priority::Medium, 0));

    assert_eq!(
        drain_events(&mut events),
        vec![GovernorEvent::OperationRejected {
            id: OperationId(3),
            priority: Priority::Medium,
            reason: RejectReason::EmergencyInProgress,
        }]
    );
}
