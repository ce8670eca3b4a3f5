use crate::config::GovernorConfig;
use crate::counters::Counters;
use crate::events::{EventSender, GovernorEvent};
use keel_cache::Priority;
use keel_memory::{adjusted_projection, remediation_allowance, PressureLevel, PressureThresholds};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Capacity fraction caches are shrunk to while degraded.
const DEGRADED_CAPACITY_FACTOR: f64 = 0.5;

/// Operating state of the admission controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardianState {
    Normal,
    /// Caches shrunk and the concurrency ceiling halved.
    Degraded,
    /// Only critical-priority work admitted while remediation runs.
    EmergencyShutdown,
}

impl std::fmt::Display for GuardianState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GuardianState::Normal => "normal",
            GuardianState::Degraded => "degraded",
            GuardianState::EmergencyShutdown => "emergency_shutdown",
        };
        f.write_str(name)
    }
}

/// Caller-assigned identifier for a unit of memory-bearing work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId(pub u64);

impl std::fmt::Display for OperationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// A proposed unit of work submitted to [`crate::Governor::admit`].
#[derive(Debug, Clone, PartialEq)]
pub struct OperationRequest {
    pub id: OperationId,
    pub priority: Priority,
    /// Caller's estimate of the additional memory the operation will hold
    /// while in flight. Best effort; exact accounting is not expected.
    pub estimated_impact_bytes: u64,
    /// When set, the operation is force-released this long after admission
    /// even if the caller never calls `release`.
    pub deadline: Option<Duration>,
}

impl OperationRequest {
    pub fn new(id: u64, priority: Priority, estimated_impact_bytes: u64) -> Self {
        Self {
            id: OperationId(id),
            priority,
            estimated_impact_bytes,
            deadline: None,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Why an operation was turned away. Rejections are expected outcomes, not
/// errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    EmergencyInProgress,
    WouldExceedCriticalThreshold,
    TooManyConcurrentOperations,
    DuplicateOperation,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::EmergencyInProgress => "emergency in progress",
            RejectReason::WouldExceedCriticalThreshold => {
                "projected usage would exceed the critical threshold"
            }
            RejectReason::TooManyConcurrentOperations => "too many concurrent operations",
            RejectReason::DuplicateOperation => "operation id is already in flight",
        };
        f.write_str(reason)
    }
}

/// Result of an admission decision as seen by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionOutcome {
    Admitted,
    Rejected { reason: RejectReason },
}

impl AdmissionOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, AdmissionOutcome::Admitted)
    }
}

/// Internal admission result; carries the cancellation token the governor
/// hangs the deadline timer on.
pub(crate) enum AdmitDecision {
    Admitted { token: CancellationToken },
    Rejected { reason: RejectReason },
}

/// Side effects the governor must perform after a guardian update.
///
/// The guardian mutates only its own state and emits events; everything that
/// touches caches, alerts or cleanup strategies is reported here and executed
/// by the caller once no guardian lock is held.
#[derive(Debug, Default)]
pub(crate) struct GuardianActions {
    /// Run the cleanup ladder for this level.
    pub run_cleanup: Option<PressureLevel>,
    /// Apply this capacity factor to every registered cache.
    pub set_capacity_factor: Option<f64>,
    /// A pressure transition `(previous, current)` occurred this update.
    pub transition: Option<(PressureLevel, PressureLevel)>,
    pub entered_emergency: bool,
    pub recovered: bool,
    pub unrecoverable: bool,
}

struct InFlight {
    priority: Priority,
    token: CancellationToken,
}

struct GuardianInner {
    state: GuardianState,
    pressure: PressureLevel,
    usage_bytes: u64,
    risk: f64,
    in_flight: HashMap<OperationId, InFlight>,
    /// Consecutive sub-warning samples, for recovery gating.
    calm_streak: u32,
    /// When pressure first reached critical without relief since.
    critical_since: Option<Instant>,
    /// When emergency shutdown was entered.
    emergency_since: Option<Instant>,
    unrecoverable_emitted: bool,
}

/// The admission controller and degraded-mode state machine.
///
/// All mutable state lives behind one mutex so a sampling tick and a
/// concurrent `admit` observe a consistent view. Events are buffered while
/// the lock is held and emitted after it drops, in order.
pub(crate) struct Guardian {
    thresholds: PressureThresholds,
    base_concurrency: usize,
    recovery_samples: u32,
    critical_grace: Duration,
    emergency_countdown: Duration,
    events: EventSender,
    counters: Arc<Counters>,
    inner: Mutex<GuardianInner>,
}

impl Guardian {
    pub fn new(config: &GovernorConfig, events: EventSender, counters: Arc<Counters>) -> Self {
        Self {
            thresholds: config.thresholds,
            base_concurrency: config.max_concurrent_operations.max(1),
            recovery_samples: config.recovery_samples.max(1),
            critical_grace: config.critical_grace,
            emergency_countdown: config.emergency_countdown,
            events,
            counters,
            inner: Mutex::new(GuardianInner {
                state: GuardianState::Normal,
                pressure: PressureLevel::Normal,
                usage_bytes: 0,
                risk: 0.0,
                in_flight: HashMap::new(),
                calm_streak: 0,
                critical_since: None,
                emergency_since: None,
                unrecoverable_emitted: false,
            }),
        }
    }

    /// Feed one classified sample into the state machine.
    ///
    /// Returns the side effects the caller must perform. Transition events
    /// are emitted in sample order; `observe` is only ever called from the
    /// serialized sampling path.
    pub fn observe(
        &self,
        level: PressureLevel,
        usage_bytes: u64,
        risk: f64,
    ) -> GuardianActions {
        let mut events = Vec::new();
        let mut actions = GuardianActions::default();
        {
            let mut inner = self.inner.lock();
            let previous = inner.pressure;
            inner.pressure = level;
            inner.usage_bytes = usage_bytes;
            inner.risk = risk;

            if level != previous {
                events.push(GovernorEvent::PressureChanged {
                    previous,
                    level,
                    usage_bytes,
                });
                actions.transition = Some((previous, level));
                if level > previous {
                    actions.run_cleanup = Some(level);
                }
            }

            if level == PressureLevel::Normal {
                inner.calm_streak = inner.calm_streak.saturating_add(1);
            } else {
                inner.calm_streak = 0;
            }
            if level >= PressureLevel::Critical {
                if inner.critical_since.is_none() {
                    inner.critical_since = Some(Instant::now());
                }
            } else {
                inner.critical_since = None;
            }

            match inner.state {
                GuardianState::Normal => {
                    if level >= PressureLevel::Emergency {
                        self.enter_emergency_locked(&mut inner, &mut events, &mut actions);
                    } else if level >= PressureLevel::Critical {
                        self.enter_degraded_locked(&mut inner, &mut events, &mut actions);
                    }
                }
                GuardianState::Degraded => {
                    if level >= PressureLevel::Emergency {
                        self.enter_emergency_locked(&mut inner, &mut events, &mut actions);
                    } else {
                        self.maybe_recover_locked(&mut inner, &mut events, &mut actions);
                    }
                }
                GuardianState::EmergencyShutdown => {
                    self.maybe_recover_locked(&mut inner, &mut events, &mut actions);
                }
            }
        }
        for event in events {
            self.events.emit(event);
        }
        actions
    }

    /// Check the critical grace period and the emergency countdown.
    ///
    /// Driven by the remediation loop; independent of sample arrival so a
    /// stalled sampler cannot mask a stuck emergency.
    pub fn evaluate_timers(&self) -> GuardianActions {
        let mut events = Vec::new();
        let mut actions = GuardianActions::default();
        {
            let mut inner = self.inner.lock();
            match inner.state {
                GuardianState::Normal => {}
                GuardianState::Degraded => {
                    if let Some(since) = inner.critical_since {
                        if since.elapsed() >= self.critical_grace {
                            tracing::warn!(
                                target = "keel.governor",
                                grace_ms = self.critical_grace.as_millis() as u64,
                                "pressure held critical past the grace period"
                            );
                            self.enter_emergency_locked(&mut inner, &mut events, &mut actions);
                        }
                    }
                }
                GuardianState::EmergencyShutdown => {
                    let expired = inner
                        .emergency_since
                        .is_some_and(|since| since.elapsed() >= self.emergency_countdown);
                    if expired
                        && !inner.unrecoverable_emitted
                        && inner.pressure >= PressureLevel::Critical
                    {
                        inner.unrecoverable_emitted = true;
                        events.push(GovernorEvent::EmergencyUnrecoverable {
                            usage_bytes: inner.usage_bytes,
                        });
                        actions.unrecoverable = true;
                        tracing::error!(
                            target = "keel.governor",
                            usage_bytes = inner.usage_bytes,
                            "pressure still critical after emergency remediation; \
                             recommending host restart"
                        );
                    }
                }
            }
        }
        for event in events {
            self.events.emit(event);
        }
        actions
    }

    fn enter_degraded_locked(
        &self,
        inner: &mut GuardianInner,
        events: &mut Vec<GovernorEvent>,
        actions: &mut GuardianActions,
    ) {
        inner.state = GuardianState::Degraded;
        events.push(GovernorEvent::DegradedEntered {
            level: inner.pressure,
        });
        actions.set_capacity_factor = Some(DEGRADED_CAPACITY_FACTOR);
        tracing::warn!(
            target = "keel.governor",
            level = %inner.pressure,
            usage_bytes = inner.usage_bytes,
            "entering degraded mode"
        );
    }

    fn enter_emergency_locked(
        &self,
        inner: &mut GuardianInner,
        events: &mut Vec<GovernorEvent>,
        actions: &mut GuardianActions,
    ) {
        if inner.state == GuardianState::Normal {
            // Emergency implies degraded; observers see both transitions.
            self.enter_degraded_locked(inner, events, actions);
        }
        inner.state = GuardianState::EmergencyShutdown;
        inner.emergency_since = Some(Instant::now());
        inner.unrecoverable_emitted = false;

        let mut cancelled = 0u64;
        inner.in_flight.retain(|_, operation| {
            if operation.priority == Priority::Critical {
                true
            } else {
                operation.token.cancel();
                cancelled += 1;
                false
            }
        });
        if cancelled > 0 {
            self.counters.add_force_released(cancelled);
        }

        actions.run_cleanup = Some(PressureLevel::Emergency);
        actions.entered_emergency = true;
        tracing::error!(
            target = "keel.governor",
            usage_bytes = inner.usage_bytes,
            cancelled_operations = cancelled,
            "entering emergency shutdown"
        );
    }

    fn maybe_recover_locked(
        &self,
        inner: &mut GuardianInner,
        events: &mut Vec<GovernorEvent>,
        actions: &mut GuardianActions,
    ) {
        if inner.calm_streak < self.recovery_samples {
            return;
        }
        inner.state = GuardianState::Normal;
        inner.critical_since = None;
        inner.emergency_since = None;
        inner.unrecoverable_emitted = false;
        events.push(GovernorEvent::DegradedExited);
        actions.set_capacity_factor = Some(1.0);
        actions.recovered = true;
        tracing::info!(
            target = "keel.governor",
            calm_samples = inner.calm_streak,
            "pressure settled; restoring normal operation"
        );
    }

    /// Decide whether `request` may proceed.
    ///
    /// Synchronous and non-blocking. The decision is made against the most
    /// recent sample; a concurrent tick may land a newer one immediately
    /// after, which is acceptable slack for an advisory controller.
    pub fn admit(&self, request: &OperationRequest) -> AdmitDecision {
        let decision = {
            let mut inner = self.inner.lock();
            if inner.in_flight.contains_key(&request.id) {
                AdmitDecision::Rejected {
                    reason: RejectReason::DuplicateOperation,
                }
            } else if inner.state == GuardianState::EmergencyShutdown
                && request.priority != Priority::Critical
            {
                AdmitDecision::Rejected {
                    reason: RejectReason::EmergencyInProgress,
                }
            } else {
                let projected = inner.usage_bytes.saturating_add(request.estimated_impact_bytes);
                let adjusted = adjusted_projection(projected, inner.risk);
                let ceiling = self.concurrency_ceiling(&inner);
                if adjusted >= self.thresholds.critical() && request.priority <= Priority::Medium {
                    AdmitDecision::Rejected {
                        reason: RejectReason::WouldExceedCriticalThreshold,
                    }
                } else if adjusted >= self.thresholds.warning()
                    && inner.in_flight.len() >= ceiling
                    && request.priority == Priority::Low
                {
                    AdmitDecision::Rejected {
                        reason: RejectReason::TooManyConcurrentOperations,
                    }
                } else {
                    let token = CancellationToken::new();
                    inner.in_flight.insert(
                        request.id,
                        InFlight {
                            priority: request.priority,
                            token: token.clone(),
                        },
                    );
                    AdmitDecision::Admitted { token }
                }
            }
        };
        if let AdmitDecision::Rejected { reason } = &decision {
            self.events.emit(GovernorEvent::OperationRejected {
                id: request.id,
                priority: request.priority,
                reason: *reason,
            });
            tracing::debug!(
                target = "keel.governor",
                id = %request.id,
                priority = %request.priority,
                reason = %reason,
                "operation rejected"
            );
        }
        decision
    }

    /// In-flight slots available at the current state and risk.
    ///
    /// Degraded and emergency halve the configured base; sustained growth
    /// shrinks it further, sub-linearly and never to zero.
    fn concurrency_ceiling(&self, inner: &GuardianInner) -> usize {
        let base = match inner.state {
            GuardianState::Normal => self.base_concurrency,
            GuardianState::Degraded | GuardianState::EmergencyShutdown => {
                (self.base_concurrency / 2).max(1)
            }
        };
        remediation_allowance(base, inner.risk)
    }

    /// Stop tracking `id`. Returns false for unknown ids.
    pub fn release(&self, id: OperationId) -> bool {
        let removed = self.inner.lock().in_flight.remove(&id);
        match removed {
            Some(operation) => {
                operation.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every tracked operation; used on shutdown.
    pub fn release_all(&self) -> usize {
        let drained: Vec<InFlight> = {
            let mut inner = self.inner.lock();
            inner.in_flight.drain().map(|(_, op)| op).collect()
        };
        for operation in &drained {
            operation.token.cancel();
        }
        drained.len()
    }

    pub fn state(&self) -> GuardianState {
        self.inner.lock().state
    }

    pub fn pressure(&self) -> PressureLevel {
        self.inner.lock().pressure
    }

    pub fn active_operations(&self) -> usize {
        self.inner.lock().in_flight.len()
    }
}
