//! Per-endpoint circuit breakers with exponential backoff (§4.3).

use crate::domain::errors::ProviderError;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

const BACKOFF_CAP_MULTIPLIER: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    open_epoch: u32,
    opened_at: Option<Instant>,
    half_open_probe_in_flight: bool,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            open_epoch: 0,
            opened_at: None,
            half_open_probe_in_flight: false,
        }
    }
}

/// A single endpoint's breaker (§4.3 table: CLOSED / OPEN / HALF_OPEN).
pub struct CircuitBreaker {
    endpoint: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(endpoint: impl Into<String>, failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            failure_threshold,
            recovery_timeout,
            state: Mutex::new(BreakerState::new()),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.state.lock().await.state
    }

    fn backoff_for(&self, open_epoch: u32) -> Duration {
        let multiplier = 1u32.checked_shl(open_epoch).unwrap_or(u32::MAX).min(BACKOFF_CAP_MULTIPLIER);
        self.recovery_timeout * multiplier
    }

    /// Runs `f` under breaker protection. Fails fast with `CircuitOpen` without
    /// invoking `f` when the circuit is open and the recovery timeout has not yet
    /// elapsed.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, ProviderError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        {
            let mut guard = self.state.lock().await;
            match guard.state {
                CircuitState::Open => {
                    let opened_at = guard.opened_at.unwrap_or_else(Instant::now);
                    let backoff = self.backoff_for(guard.open_epoch);
                    if opened_at.elapsed() >= backoff {
                        info!(endpoint = %self.endpoint, "circuit OPEN -> HALF_OPEN (recovery timeout elapsed)");
                        guard.state = CircuitState::HalfOpen;
                        guard.half_open_probe_in_flight = true;
                    } else {
                        return Err(ProviderError::CircuitOpen {
                            endpoint: self.endpoint.clone(),
                        });
                    }
                }
                CircuitState::HalfOpen => {
                    if guard.half_open_probe_in_flight {
                        return Err(ProviderError::CircuitOpen {
                            endpoint: self.endpoint.clone(),
                        });
                    }
                    guard.half_open_probe_in_flight = true;
                }
                CircuitState::Closed => {}
            }
        }

        let result = f().await;

        let mut guard = self.state.lock().await;
        match &result {
            Ok(_) => self.on_success(&mut guard),
            Err(_) => self.on_failure(&mut guard),
        }
        result
    }

    fn on_success(&self, guard: &mut BreakerState) {
        let before = guard.state;
        guard.consecutive_failures = 0;
        guard.half_open_probe_in_flight = false;
        match guard.state {
            CircuitState::HalfOpen => {
                guard.consecutive_successes += 1;
                guard.state = CircuitState::Closed;
                guard.open_epoch = 0;
                guard.consecutive_successes = 0;
                info!(endpoint = %self.endpoint, ?before, after = ?guard.state, "circuit recovered");
            }
            CircuitState::Closed => {}
            CircuitState::Open => {}
        }
    }

    fn on_failure(&self, guard: &mut BreakerState) {
        let before = guard.state;
        guard.consecutive_successes = 0;
        guard.half_open_probe_in_flight = false;
        match guard.state {
            CircuitState::Closed => {
                guard.consecutive_failures += 1;
                if guard.consecutive_failures >= self.failure_threshold {
                    guard.state = CircuitState::Open;
                    guard.opened_at = Some(Instant::now());
                    warn!(
                        endpoint = %self.endpoint, ?before, after = ?guard.state,
                        failures = guard.consecutive_failures, "circuit tripped"
                    );
                }
            }
            CircuitState::HalfOpen => {
                guard.state = CircuitState::Open;
                guard.open_epoch = guard.open_epoch.saturating_add(1);
                guard.opened_at = Some(Instant::now());
                warn!(endpoint = %self.endpoint, ?before, after = ?guard.state, "probe failed, reopening");
            }
            CircuitState::Open => {
                guard.consecutive_failures += 1;
            }
        }
    }
}

/// Process-wide registry of breakers keyed by endpoint name, guarded by a mutex
/// separate from any individual breaker's internal lock (§4.3 Concurrency).
pub struct CircuitBreakerRegistry {
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
    failure_threshold: u32,
    recovery_timeout: Duration,
}

impl CircuitBreakerRegistry {
    pub fn new(failure_threshold: u32, recovery_timeout: Duration) -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
            failure_threshold,
            recovery_timeout,
        }
    }

    pub async fn breaker(&self, endpoint: &str) -> Arc<CircuitBreaker> {
        let mut breakers = self.breakers.lock().await;
        breakers
            .entry(endpoint.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(
                    endpoint,
                    self.failure_threshold,
                    self.recovery_timeout,
                ))
            })
            .clone()
    }

    /// True if any registered endpoint's breaker is currently open. Used by the
    /// scheduler to decide whether a scan's provider failures warrant a BACKING_OFF
    /// transition.
    pub async fn any_open(&self) -> bool {
        let breakers = self.breakers.lock().await;
        for breaker in breakers.values() {
            if breaker.state().await == CircuitState::Open {
                return true;
            }
        }
        false
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn failing() -> Result<(), ProviderError> {
        Err(ProviderError::Transient {
            operation: "x".into(),
            reason: "boom".into(),
        })
    }

    #[tokio::test]
    async fn opens_after_nth_consecutive_failure_not_before() {
        let cb = CircuitBreaker::new("ep", 3, Duration::from_secs(60));
        for _ in 0..2 {
            let _ = cb.call(failing).await;
        }
        assert_eq!(cb.state().await, CircuitState::Closed);
        let _ = cb.call(failing).await;
        assert_eq!(cb.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn open_circuit_fails_fast_without_invoking_wrapped_fn() {
        let cb = CircuitBreaker::new("ep", 1, Duration::from_secs(60));
        let _ = cb.call(failing).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let result = cb
            .call(|| async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<(), ProviderError>(())
            })
            .await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen { .. })));
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_failure_doubles_backoff_via_epoch() {
        let cb = CircuitBreaker::new("ep", 1, Duration::from_millis(20));
        let _ = cb.call(failing).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Transition to HalfOpen and fail the probe -> reopens with epoch 1 (2x backoff).
        let _ = cb.call(failing).await;
        assert_eq!(cb.state().await, CircuitState::Open);

        // Original (1x) backoff has elapsed but epoch-1 backoff (2x) has not.
        tokio::time::sleep(Duration::from_millis(25)).await;
        let result = cb.call(|| async { Ok::<(), ProviderError>(()) }).await;
        assert!(matches!(result, Err(ProviderError::CircuitOpen { .. })));
    }

    #[tokio::test]
    async fn registry_reuses_breaker_per_endpoint() {
        let registry = CircuitBreakerRegistry::new(5, Duration::from_secs(30));
        let a = registry.breaker("prices").await;
        let b = registry.breaker("prices").await;
        assert!(Arc::ptr_eq(&a, &b));
    }
}
