//! Dependency health tracking with hysteresis.
//!
//! Every sample (success/failure) for a dependency feeds a small state
//! machine:
//!
//! ```text
//!   Available ──(F consecutive failures)──→ Degraded
//!   Degraded ──(U consecutive failures)──→ Unavailable
//!   any ──(R consecutive successes)──→ Available
//! ```
//!
//! Each transition is emitted exactly once on a broadcast channel, in
//! order, so every subscriber (rooms, metrics) sees the same stream. The
//! thresholds damp flapping: a single failed probe never flips status.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::broadcast;

use tilemud_protocol::{DegradedPayload, DegradedStatus, Dependency};

use crate::clock::now_ms;

/// Hysteresis thresholds, per dependency.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Consecutive failures before available → degraded.
    pub failure_threshold: u32,
    /// Consecutive successes before any → available.
    pub recovery_threshold: u32,
    /// Consecutive failures before → unavailable. Must be ≥
    /// `failure_threshold`.
    pub unavailable_threshold: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 2,
            recovery_threshold: 2,
            unavailable_threshold: 6,
        }
    }
}

/// Health of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DependencyStatus {
    Available,
    Degraded,
    Unavailable,
}

#[derive(Debug, Clone)]
struct DependencyHealth {
    status: DependencyStatus,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_observed_at: u64,
}

impl DependencyHealth {
    fn fresh(now: u64) -> Self {
        Self {
            status: DependencyStatus::Available,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_observed_at: now,
        }
    }
}

/// A single status transition.
#[derive(Debug, Clone)]
pub struct HealthTransition {
    pub dependency: Dependency,
    /// Wire-facing direction: entering degraded/unavailable reports
    /// `degraded`; returning to available reports `recovered`.
    pub status: DegradedStatus,
    pub observed_at: u64,
    pub message: String,
    pub previous: DependencyStatus,
    pub current: DependencyStatus,
}

impl HealthTransition {
    /// Converts the transition into its realtime fanout envelope payload.
    pub fn to_payload(&self) -> DegradedPayload {
        DegradedPayload {
            dependency: self.dependency,
            status: self.status,
            observed_at: self.observed_at,
            message: Some(self.message.clone()),
        }
    }
}

/// Tracks per-dependency health and publishes transitions.
pub struct DegradedSignalService {
    config: HealthConfig,
    inner: Mutex<HashMap<Dependency, DependencyHealth>>,
    events: broadcast::Sender<HealthTransition>,
}

impl DegradedSignalService {
    pub fn new(config: HealthConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            config,
            inner: Mutex::new(HashMap::new()),
            events,
        }
    }

    /// Subscribes to the transition stream. Every transition after this
    /// call is delivered exactly once, in emission order.
    pub fn subscribe(&self) -> broadcast::Receiver<HealthTransition> {
        self.events.subscribe()
    }

    /// Records a failed probe of `dependency`.
    pub fn record_failure(
        &self,
        dependency: Dependency,
        message: impl Into<String>,
    ) {
        let message = message.into();
        let now = now_ms();
        let mut inner = self.inner.lock().expect("health lock");
        let health = inner
            .entry(dependency)
            .or_insert_with(|| DependencyHealth::fresh(now));
        health.consecutive_failures += 1;
        health.consecutive_successes = 0;
        health.last_observed_at = now;

        let next = if health.consecutive_failures
            >= self.config.unavailable_threshold
        {
            DependencyStatus::Unavailable
        } else if health.consecutive_failures >= self.config.failure_threshold
        {
            DependencyStatus::Degraded
        } else {
            health.status
        };

        if next != health.status
            && matches!(
                next,
                DependencyStatus::Degraded | DependencyStatus::Unavailable
            )
        {
            let transition = HealthTransition {
                dependency,
                status: DegradedStatus::Degraded,
                observed_at: now,
                message,
                previous: health.status,
                current: next,
            };
            health.status = next;
            drop(inner);
            self.emit(transition);
        }
    }

    /// Records a successful probe of `dependency`.
    pub fn record_success(&self, dependency: Dependency) {
        let now = now_ms();
        let mut inner = self.inner.lock().expect("health lock");
        let health = inner
            .entry(dependency)
            .or_insert_with(|| DependencyHealth::fresh(now));
        health.consecutive_successes += 1;
        health.consecutive_failures = 0;
        health.last_observed_at = now;

        if health.status != DependencyStatus::Available
            && health.consecutive_successes >= self.config.recovery_threshold
        {
            let transition = HealthTransition {
                dependency,
                status: DegradedStatus::Recovered,
                observed_at: now,
                message: format!("{dependency} recovered"),
                previous: health.status,
                current: DependencyStatus::Available,
            };
            health.status = DependencyStatus::Available;
            drop(inner);
            self.emit(transition);
        }
    }

    /// Forces a dependency back to available, bypassing the recovery
    /// threshold. Used by the outage guard when a previously tripped
    /// circuit observes a success: one confirmed write through a closed
    /// circuit outweighs the probe count.
    pub fn force_recovered(
        &self,
        dependency: Dependency,
        message: impl Into<String>,
    ) {
        let now = now_ms();
        let mut inner = self.inner.lock().expect("health lock");
        let health = inner
            .entry(dependency)
            .or_insert_with(|| DependencyHealth::fresh(now));
        if health.status == DependencyStatus::Available {
            return;
        }
        let transition = HealthTransition {
            dependency,
            status: DegradedStatus::Recovered,
            observed_at: now,
            message: message.into(),
            previous: health.status,
            current: DependencyStatus::Available,
        };
        health.status = DependencyStatus::Available;
        health.consecutive_failures = 0;
        health.consecutive_successes = 0;
        drop(inner);
        self.emit(transition);
    }

    /// Current status of a dependency.
    pub fn status(&self, dependency: Dependency) -> DependencyStatus {
        self.inner
            .lock()
            .expect("health lock")
            .get(&dependency)
            .map(|h| h.status)
            .unwrap_or(DependencyStatus::Available)
    }

    /// Dependencies that are currently not available, as fanout payloads.
    /// Sent to clients on join so late joiners see the live banner state.
    pub fn snapshot(&self) -> Vec<DegradedPayload> {
        let inner = self.inner.lock().expect("health lock");
        inner
            .iter()
            .filter(|(_, h)| h.status != DependencyStatus::Available)
            .map(|(dep, h)| DegradedPayload {
                dependency: *dep,
                status: DegradedStatus::Degraded,
                observed_at: h.last_observed_at,
                message: None,
            })
            .collect()
    }

    /// Clears a dependency back to available without emitting.
    pub fn reset(&self, dependency: Dependency) {
        let mut inner = self.inner.lock().expect("health lock");
        inner.insert(dependency, DependencyHealth::fresh(now_ms()));
    }

    fn emit(&self, transition: HealthTransition) {
        tracing::info!(
            dependency = %transition.dependency,
            previous = ?transition.previous,
            current = ?transition.current,
            "dependency health transition"
        );
        // No subscribers is fine; transitions are advisory.
        let _ = self.events.send(transition);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> DegradedSignalService {
        DegradedSignalService::new(HealthConfig::default())
    }

    #[tokio::test]
    async fn test_single_failure_does_not_transition() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.record_failure(Dependency::Postgres, "boom");
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Available
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_threshold_enters_degraded_once() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.record_failure(Dependency::Postgres, "boom");
        svc.record_failure(Dependency::Postgres, "boom");
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Degraded
        );

        let t = rx.try_recv().unwrap();
        assert_eq!(t.status, DegradedStatus::Degraded);
        assert_eq!(t.previous, DependencyStatus::Available);
        assert_eq!(t.current, DependencyStatus::Degraded);
        // A third failure inside degraded emits nothing new.
        svc.record_failure(Dependency::Postgres, "boom");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unavailable_threshold_emits_second_transition() {
        let svc = service();
        let mut rx = svc.subscribe();
        for _ in 0..6 {
            svc.record_failure(Dependency::Redis, "down");
        }
        assert_eq!(
            svc.status(Dependency::Redis),
            DependencyStatus::Unavailable
        );
        let first = rx.try_recv().unwrap();
        assert_eq!(first.current, DependencyStatus::Degraded);
        let second = rx.try_recv().unwrap();
        assert_eq!(second.previous, DependencyStatus::Degraded);
        assert_eq!(second.current, DependencyStatus::Unavailable);
        assert_eq!(second.status, DegradedStatus::Degraded);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_recovery_needs_consecutive_successes() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.record_failure(Dependency::Postgres, "x");
        svc.record_failure(Dependency::Postgres, "x");
        let _ = rx.try_recv().unwrap();

        svc.record_success(Dependency::Postgres);
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Degraded
        );
        // A failure resets the success streak.
        svc.record_failure(Dependency::Postgres, "x");
        svc.record_success(Dependency::Postgres);
        svc.record_success(Dependency::Postgres);
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Available
        );
        let t = rx.try_recv().unwrap();
        assert_eq!(t.status, DegradedStatus::Recovered);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_force_recovered_bypasses_threshold() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.record_failure(Dependency::Postgres, "x");
        svc.record_failure(Dependency::Postgres, "x");
        let _ = rx.try_recv().unwrap();

        svc.force_recovered(Dependency::Postgres, "write confirmed");
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Available
        );
        let t = rx.try_recv().unwrap();
        assert_eq!(t.status, DegradedStatus::Recovered);
    }

    #[tokio::test]
    async fn test_force_recovered_when_available_is_silent() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.force_recovered(Dependency::Postgres, "noop");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_snapshot_lists_only_unhealthy() {
        let svc = service();
        svc.record_failure(Dependency::Redis, "x");
        svc.record_failure(Dependency::Redis, "x");
        svc.record_success(Dependency::Postgres);
        let snapshot = svc.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].dependency, Dependency::Redis);
    }

    #[tokio::test]
    async fn test_reset_clears_counters_silently() {
        let svc = service();
        let mut rx = svc.subscribe();
        svc.record_failure(Dependency::Redis, "x");
        svc.record_failure(Dependency::Redis, "x");
        let _ = rx.try_recv().unwrap();
        svc.reset(Dependency::Redis);
        assert_eq!(svc.status(Dependency::Redis), DependencyStatus::Available);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dependencies_tracked_independently() {
        let svc = service();
        svc.record_failure(Dependency::Redis, "x");
        svc.record_failure(Dependency::Redis, "x");
        assert_eq!(svc.status(Dependency::Redis), DependencyStatus::Degraded);
        assert_eq!(
            svc.status(Dependency::Postgres),
            DependencyStatus::Available
        );
    }
}
