use std::time::Duration;

use keel_governor::{
    AdmissionOutcome, GuardianState, OperationId, OperationRequest, Priority, RejectReason,
};

use super::support::governor_with;

fn rejected(reason: RejectReason) -> AdmissionOutcome {
    AdmissionOutcome::Rejected { reason }
}

#[tokio::test]
async fn admission_is_monotonic_in_priority() {
    let governor = governor_with(&[700]);
    governor.poll_sample();

    // 700 + 200 projected reaches the critical threshold (800).
    assert_eq!(
        governor.admit(OperationRequest::new(1, Priority::Low, 200)),
        rejected(RejectReason::WouldExceedCriticalThreshold)
    );
    assert_eq!(
        governor.admit(OperationRequest::new(2, Priority::Medium, 200)),
        rejected(RejectReason::WouldExceedCriticalThreshold)
    );
    assert_eq!(
        governor.admit(OperationRequest::new(3, Priority::High, 200)),
        AdmissionOutcome::Admitted
    );
    assert_eq!(
        governor.admit(OperationRequest::new(4, Priority::Critical, 200)),
        AdmissionOutcome::Admitted
    );
}

#[tokio::test]
async fn low_priority_hits_the_concurrency_ceiling_above_warning() {
    let governor = governor_with(&[700]);
    governor.poll_sample();

    for id in 0..5 {
        assert_eq!(
            governor.admit(OperationRequest::new(id, Priority::Medium, 0)),
            AdmissionOutcome::Admitted
        );
    }
    assert_eq!(
        governor.admit(OperationRequest::new(10, Priority::Low, 0)),
        rejected(RejectReason::TooManyConcurrentOperations)
    );
    assert_eq!(governor.status().active_operation_count, 5);
}

#[tokio::test]
async fn degraded_mode_halves_the_concurrency_ceiling() {
    let governor = governor_with(&[850, 700]);
    governor.poll_sample();
    governor.poll_sample();
    assert_eq!(governor.status().state, GuardianState::Degraded);

    for id in 0..2 {
        assert_eq!(
            governor.admit(OperationRequest::new(id, Priority::Medium, 0)),
            AdmissionOutcome::Admitted
        );
    }
    assert_eq!(
        governor.admit(OperationRequest::new(10, Priority::Low, 0)),
        rejected(RejectReason::TooManyConcurrentOperations)
    );

    // The same load is fine for a governor that never left normal.
    let normal = governor_with(&[700]);
    normal.poll_sample();
    for id in 0..2 {
        assert_eq!(
            normal.admit(OperationRequest::new(id, Priority::Medium, 0)),
            AdmissionOutcome::Admitted
        );
    }
    assert_eq!(
        normal.admit(OperationRequest::new(10, Priority::Low, 0)),
        AdmissionOutcome::Admitted
    );
}

#[tokio::test]
async fn sustained_growth_tightens_admission() {
    // 30% growth per step; the risk score shrinks the ceiling to one slot
    // and widens the projection used against the thresholds.
    let growing = governor_with(&[300, 390, 507]);
    for _ in 0..3 {
        growing.poll_sample();
    }
    assert_eq!(
        growing.admit(OperationRequest::new(1, Priority::Medium, 0)),
        AdmissionOutcome::Admitted
    );
    assert_eq!(
        growing.admit(OperationRequest::new(2, Priority::Low, 0)),
        rejected(RejectReason::TooManyConcurrentOperations)
    );

    // Flat usage at the same level admits both.
    let flat = governor_with(&[507]);
    flat.poll_sample();
    assert_eq!(
        flat.admit(OperationRequest::new(1, Priority::Medium, 0)),
        AdmissionOutcome::Admitted
    );
    assert_eq!(
        flat.admit(OperationRequest::new(2, Priority::Low, 0)),
        AdmissionOutcome::Admitted
    );
}

#[tokio::test]
async fn duplicate_in_flight_ids_are_rejected() {
    let governor = governor_with(&[500]);
    governor.poll_sample();

    let request = OperationRequest::new(1, Priority::Medium, 0);
    assert_eq!(governor.admit(request.clone()), AdmissionOutcome::Admitted);
    assert_eq!(
        governor.admit(request.clone()),
        rejected(RejectReason::DuplicateOperation)
    );
    governor.release(request.id);
    assert_eq!(governor.admit(request), AdmissionOutcome::Admitted);
}

#[tokio::test]
async fn release_is_idempotent_and_tolerates_unknown_ids() {
    let governor = governor_with(&[500]);
    governor.poll_sample();

    let request = OperationRequest::new(1, Priority::Medium, 0);
    assert_eq!(governor.admit(request.clone()), AdmissionOutcome::Admitted);

    governor.release(request.id);
    governor.release(request.id);
    governor.release(OperationId(999));

    let status = governor.status();
    assert_eq!(status.active_operation_count, 0);
    assert_eq!(status.counters.released, 1);
}

#[tokio::test]
async fn deadlined_operations_are_force_released() {
    let governor = governor_with(&[500]);
    governor.poll_sample();

    let request =
        OperationRequest::new(7, Priority::Medium, 0).with_deadline(Duration::from_millis(50));
    assert_eq!(governor.admit(request), AdmissionOutcome::Admitted);
    assert_eq!(governor.status().active_operation_count, 1);

    let mut waited = Duration::ZERO;
    while governor.status().active_operation_count > 0 && waited < Duration::from_secs(2) {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += Duration::from_millis(10);
    }

    let status = governor.status();
    assert_eq!(status.active_operation_count, 0);
    assert_eq!(status.counters.force_released, 1);
    assert_eq!(status.counters.released, 0);
}

#[tokio::test]
async fn emergency_admits_only_critical_priority() {
    let governor = governor_with(&[990]);
    governor.poll_sample();
    assert_eq!(governor.status().state, GuardianState::EmergencyShutdown);

    assert_eq!(
        governor.admit(OperationRequest::new(1, Priority::High, 0)),
        rejected(RejectReason::EmergencyInProgress)
    );
    assert_eq!(
        governor.admit(OperationRequest::new(2, Priority::Critical, 0)),
        AdmissionOutcome::Admitted
    );
}
