//! Circuit breaker in front of the durable store.
//!
//! Closed → open on `failure_threshold` consecutive failures; open fails
//! fast until the cooldown deadline passes; the first call after the
//! deadline is the half-open probe: success closes the circuit, failure
//! re-opens it with a fresh cooldown. The deadline is wall-clock; no
//! background task is involved.

use std::sync::{Arc, Mutex};

use tilemud_protocol::{Dependency, catalog::CatalogError};

use crate::clock::now_ms;
use crate::health::DegradedSignalService;

/// Breaker thresholds.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open.
    pub cooldown_ms: u64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown_ms: 15_000,
        }
    }
}

#[derive(Debug, Default)]
struct GuardState {
    consecutive_failures: u32,
    /// Open until this wall-clock deadline (epoch ms).
    cooldown_until: Option<u64>,
    /// The next call is the half-open probe.
    half_open: bool,
    /// The circuit opened at least once since the last confirmed success.
    tripped: bool,
}

/// Gates every durable-store call the core makes.
///
/// Call order per operation: `assert_available()` → the operation →
/// `record_success()` / `record_failure()`.
pub struct DbOutageGuard {
    config: GuardConfig,
    dependency: Dependency,
    health: Arc<DegradedSignalService>,
    state: Mutex<GuardState>,
}

impl DbOutageGuard {
    pub fn new(
        config: GuardConfig,
        dependency: Dependency,
        health: Arc<DegradedSignalService>,
    ) -> Self {
        Self {
            config,
            dependency,
            health,
            state: Mutex::new(GuardState::default()),
        }
    }

    /// Fails fast while the circuit is open. Once the cooldown deadline
    /// has passed, the circuit moves to half-open and the call proceeds.
    pub fn assert_available(&self) -> Result<(), CatalogError> {
        self.assert_available_at(now_ms())
    }

    pub fn assert_available_at(&self, now: u64) -> Result<(), CatalogError> {
        let mut state = self.state.lock().expect("guard lock");
        if let Some(until) = state.cooldown_until {
            if now < until {
                let retry_after = (until - now).div_ceil(1000).max(1);
                return Err(CatalogError::internal(format!(
                    "database_unavailable; retry at {until}"
                ))
                .with_retry_after(retry_after));
            }
            // Cooldown elapsed: half-open probe.
            state.cooldown_until = None;
            state.consecutive_failures = 0;
            state.half_open = true;
        }
        Ok(())
    }

    /// Reports a successful durable operation.
    pub fn record_success(&self) {
        let mut state = self.state.lock().expect("guard lock");
        state.consecutive_failures = 0;
        state.half_open = false;
        let was_tripped = std::mem::take(&mut state.tripped);
        drop(state);
        if was_tripped {
            self.health.force_recovered(
                self.dependency,
                format!("{} write confirmed after outage", self.dependency),
            );
        }
    }

    /// Reports a failed durable operation.
    pub fn record_failure(&self, error: &dyn std::fmt::Display) {
        self.record_failure_at(now_ms(), error);
    }

    pub fn record_failure_at(
        &self,
        now: u64,
        error: &dyn std::fmt::Display,
    ) {
        let mut state = self.state.lock().expect("guard lock");
        state.consecutive_failures += 1;
        let reopen = std::mem::take(&mut state.half_open);
        if reopen || state.consecutive_failures >= self.config.failure_threshold
        {
            // Extend the deadline if already open.
            let until = now + self.config.cooldown_ms;
            state.cooldown_until = Some(until);
            state.tripped = true;
            tracing::warn!(
                dependency = %self.dependency,
                failures = state.consecutive_failures,
                cooldown_ms = self.config.cooldown_ms,
                "outage guard engaged"
            );
        }
        drop(state);
        self.health
            .record_failure(self.dependency, error.to_string());
    }

    /// Whether the circuit is currently open (cooldown in the future).
    pub fn is_open(&self) -> bool {
        let state = self.state.lock().expect("guard lock");
        state.cooldown_until.is_some_and(|until| now_ms() < until)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::HealthConfig;
    use tilemud_protocol::DegradedStatus;

    fn guard_with(cooldown_ms: u64) -> (DbOutageGuard, Arc<DegradedSignalService>) {
        let health =
            Arc::new(DegradedSignalService::new(HealthConfig::default()));
        let guard = DbOutageGuard::new(
            GuardConfig {
                failure_threshold: 3,
                cooldown_ms,
            },
            Dependency::Postgres,
            Arc::clone(&health),
        );
        (guard, health)
    }

    fn fail(guard: &DbOutageGuard, at: u64) {
        guard.record_failure_at(at, &"db down");
    }

    #[tokio::test]
    async fn test_closed_circuit_allows_calls() {
        let (guard, _) = guard_with(15_000);
        assert!(guard.assert_available_at(0).is_ok());
    }

    #[tokio::test]
    async fn test_trips_after_threshold_failures() {
        let (guard, _) = guard_with(15_000);
        fail(&guard, 0);
        fail(&guard, 1);
        assert!(guard.assert_available_at(2).is_ok());
        fail(&guard, 2);

        let err = guard.assert_available_at(3).unwrap_err();
        assert!(err.retryable());
        assert!(err.message().contains("database_unavailable"));
        assert!(err.retry_after_seconds().unwrap() >= 1);
    }

    #[tokio::test]
    async fn test_cooldown_elapsed_allows_half_open_probe() {
        let (guard, _) = guard_with(15_000);
        for t in 0..3 {
            fail(&guard, t);
        }
        assert!(guard.assert_available_at(10_000).is_err());
        assert!(guard.assert_available_at(2 + 15_000).is_ok());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let (guard, _) = guard_with(15_000);
        for t in 0..3 {
            fail(&guard, t);
        }
        let probe_at = 2 + 15_000;
        assert!(guard.assert_available_at(probe_at).is_ok());
        // One failure is enough to re-open in half-open.
        fail(&guard, probe_at);
        assert!(guard.assert_available_at(probe_at + 1).is_err());
        // And it stays open for a full fresh cooldown.
        assert!(guard.assert_available_at(probe_at + 14_999).is_err());
        assert!(guard.assert_available_at(probe_at + 15_000).is_ok());
    }

    #[tokio::test]
    async fn test_success_after_trip_forces_recovery_signal() {
        let (guard, health) = guard_with(15_000);
        let mut rx = health.subscribe();
        for t in 0..3 {
            fail(&guard, t);
        }
        // Two failures already degraded the dependency.
        let degraded = rx.try_recv().unwrap();
        assert_eq!(degraded.status, DegradedStatus::Degraded);

        assert!(guard.assert_available_at(2 + 15_000).is_ok());
        guard.record_success();
        let recovered = rx.try_recv().unwrap();
        assert_eq!(recovered.status, DegradedStatus::Recovered);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_success_without_trip_is_silent() {
        let (guard, health) = guard_with(15_000);
        let mut rx = health.subscribe();
        guard.record_success();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_extends_open_deadline() {
        let (guard, _) = guard_with(15_000);
        for t in 0..3 {
            fail(&guard, t);
        }
        // Open until 2 + 15_000. A further failure at t=10_000 extends it.
        fail(&guard, 10_000);
        assert!(guard.assert_available_at(2 + 15_000).is_err());
        assert!(guard.assert_available_at(10_000 + 15_000).is_ok());
    }
}
