use std::sync::{Arc, Mutex};
use std::time::Duration;

use keel_governor::{CleanupError, CleanupStrategy, GuardianState, Priority};

use super::support::governor_with;

struct Recording {
    name: &'static str,
    priority: u32,
    aggressive: bool,
    log: Arc<Mutex<Vec<&'static str>>>,
}

impl CleanupStrategy for Recording {
    fn name(&self) -> &str {
        self.name
    }

    fn priority(&self) -> u32 {
        self.priority
    }

    fn aggressive(&self) -> bool {
        self.aggressive
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        self.log.lock().unwrap().push(self.name);
        Ok(0)
    }
}

struct Failing;

impl CleanupStrategy for Failing {
    fn name(&self) -> &str {
        "flaky"
    }

    fn priority(&self) -> u32 {
        100
    }

    fn aggressive(&self) -> bool {
        false
    }

    fn execute(&self) -> Result<u64, CleanupError> {
        Err(CleanupError::new("backend unavailable"))
    }
}

#[tokio::test]
async fn warning_runs_the_top_two_non_aggressive_strategies() {
    let governor = governor_with(&[650]);
    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, priority, aggressive) in [
        ("high", 100u32, false),
        ("loud", 90, true),
        ("mid", 80, false),
        ("low", 70, false),
    ] {
        governor.register_cleanup_strategy(Arc::new(Recording {
            name,
            priority,
            aggressive,
            log: log.clone(),
        }));
    }

    governor.poll_sample();

    assert_eq!(*log.lock().unwrap(), vec!["high", "mid"]);
}

#[tokio::test]
async fn critical_runs_the_top_three_strategies() {
    let governor = governor_with(&[850]);
    let log = Arc::new(Mutex::new(Vec::new()));
    for (name, priority, aggressive) in
        [("high", 100u32, false), ("loud", 90, true), ("mid", 80, false)]
    {
        governor.register_cleanup_strategy(Arc::new(Recording {
            name,
            priority,
            aggressive,
            log: log.clone(),
        }));
    }

    governor.poll_sample();

    assert_eq!(*log.lock().unwrap(), vec!["high", "loud", "mid"]);
}

#[tokio::test]
async fn emergency_runs_every_strategy_and_clears_caches() {
    let governor = governor_with(&[970]);
    let cache = governor
        .cache::<String>("blobs", 10, Duration::from_secs(60))
        .unwrap();
    for i in 0..5 {
        cache.set(format!("key-{i}"), "value".to_string(), Priority::Critical);
    }
    let log = Arc::new(Mutex::new(Vec::new()));
    governor.register_cleanup_strategy(Arc::new(Recording {
        name: "first",
        priority: 100,
        aggressive: true,
        log: log.clone(),
    }));
    governor.register_cleanup_strategy(Arc::new(Recording {
        name: "second",
        priority: 90,
        aggressive: false,
        log: log.clone(),
    }));

    governor.poll_sample();

    assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    assert!(cache.is_empty(), "the emergency ladder clears every cache");
    assert_eq!(governor.status().state, GuardianState::EmergencyShutdown);
}

#[tokio::test]
async fn strategy_failures_are_isolated_and_alerted() {
    let governor = governor_with(&[650]);
    let log = Arc::new(Mutex::new(Vec::new()));
    governor.register_cleanup_strategy(Arc::new(Failing));
    governor.register_cleanup_strategy(Arc::new(Recording {
        name: "survivor",
        priority: 90,
        aggressive: false,
        log: log.clone(),
    }));

    governor.poll_sample();

    assert_eq!(*log.lock().unwrap(), vec!["survivor"]);
    let alerts = governor.status().recent_alerts;
    assert!(
        alerts
            .iter()
            .any(|alert| alert.message.contains("`flaky` failed")),
        "expected a failure alert, got: {:?}",
        alerts.iter().map(|alert| &alert.message).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn the_builtin_ladder_prunes_expired_entries() {
    let governor = governor_with(&[650]);
    let cache = governor
        .cache::<String>("short-lived", 10, Duration::from_millis(5))
        .unwrap();
    for i in 0..3 {
        cache.set(format!("key-{i}"), "value".to_string(), Priority::Medium);
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    governor.poll_sample();

    assert!(cache.is_empty(), "warning ladder prunes expired entries");
}

#[tokio::test]
async fn transition_alerts_recommend_the_ladder() {
    let governor = governor_with(&[650]);
    governor.poll_sample();

    let alerts = governor.status().recent_alerts;
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].message, "memory pressure rose to warning");
    assert_eq!(
        alerts[0].recommended_actions,
        vec!["prune-expired-entries", "trim-sample-history"]
    );
}
