use std::time::Duration;

use anyhow::Result;
use keel_governor::{
    AdmissionOutcome, Governor, GovernorError, OperationRequest, Priority, PressureLevel,
};
use tokio::runtime::Handle;

use super::support::{governor_with, init_tracing, test_config, RepeatingSource};

#[tokio::test]
async fn initialize_and_shutdown_are_idempotent() {
    init_tracing();
    let governor = Governor::with_memory_source(
        test_config(),
        Box::new(RepeatingSource(500)),
        Handle::current(),
    )
    .unwrap();

    governor.initialize();
    governor.initialize();
    governor.shutdown();
    governor.shutdown();
}

#[tokio::test]
async fn background_loops_tick_until_shutdown() {
    let governor = Governor::with_memory_source(
        test_config(),
        Box::new(RepeatingSource(500)),
        Handle::current(),
    )
    .unwrap();
    governor.initialize();

    let mut waited = Duration::ZERO;
    while governor.status().counters.ticks < 3 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }
    assert!(governor.status().counters.ticks >= 3, "loops never ticked");

    governor.shutdown();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let frozen = governor.status().counters.ticks;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        governor.status().counters.ticks,
        frozen,
        "no ticks may land after shutdown"
    );
}

#[tokio::test]
async fn shutdown_releases_tracked_operations() {
    let governor = governor_with(&[500]);
    governor.poll_sample();
    assert_eq!(
        governor.admit(OperationRequest::new(1, Priority::Medium, 0)),
        AdmissionOutcome::Admitted
    );
    assert_eq!(
        governor.admit(OperationRequest::new(2, Priority::High, 0)),
        AdmissionOutcome::Admitted
    );

    governor.shutdown();

    let status = governor.status();
    assert_eq!(status.active_operation_count, 0);
    assert_eq!(status.counters.force_released, 2);
}

#[tokio::test]
async fn status_serializes_with_camel_case_keys() -> Result<()> {
    let governor = governor_with(&[650]);
    governor.poll_sample();

    let value = serde_json::to_value(governor.status())?;
    assert_eq!(value["state"], "normal");
    assert_eq!(value["pressureLevel"], "warning");
    assert_eq!(value["activeOperationCount"], 0);
    assert!(value["recentAlerts"].is_array());
    assert!(value["counters"]["forceReleased"].is_number());
    Ok(())
}

#[tokio::test]
async fn cache_type_mismatch_is_reported() -> Result<()> {
    let governor = governor_with(&[500]);
    let _strings = governor.cache::<String>("parsed", 10, Duration::from_secs(60))?;

    let numbers = governor.cache::<u64>("parsed", 10, Duration::from_secs(60));
    assert!(matches!(
        numbers,
        Err(GovernorError::MismatchedCacheType { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn invalid_config_is_rejected_at_construction() {
    let mut config = test_config();
    config.max_concurrent_operations = 0;
    let result = Governor::with_memory_source(
        config,
        Box::new(RepeatingSource(0)),
        Handle::current(),
    );
    assert!(matches!(result, Err(GovernorError::Config(_))));
}

#[tokio::test]
async fn an_exhausted_source_is_tolerated() {
    let governor = governor_with(&[500]);
    governor.poll_sample();
    governor.poll_sample();
    governor.poll_sample();

    let status = governor.status();
    assert_eq!(status.counters.ticks, 3);
    assert_eq!(status.pressure_level, PressureLevel::Normal);
}
