// Flowforge Runtime - Retry policy execution
//
// Wraps an async thunk in an attempt loop driven by a RetryPolicy. Delay
// sleeps yield to the scheduler and wake early on cancellation. When a
// circuit breaker is configured the breaker is consulted before each
// attempt; an OPEN circuit short-circuits the call with zero attempts.

use crate::breaker::{CircuitBreakerRegistry, CircuitDecision};
use flowforge_core::workflow::{DelayStrategy, RetryPolicy};
use flowforge_core::ForgeResult;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Outcome of running a thunk through the retry policy
#[derive(Debug, Clone)]
pub struct RetryOutcome<T> {
    pub success: bool,
    pub value: Option<T>,
    pub error: Option<String>,
    /// Attempts actually performed; 0 when the circuit rejected the call
    pub attempts: u32,
    pub total_duration_ms: u64,
}

/// Retry policy executor
pub struct RetryExecutor {
    policy: RetryPolicy,
    breakers: Option<Arc<CircuitBreakerRegistry>>,
    resource_id: Option<String>,
    cancel: CancellationToken,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            breakers: None,
            resource_id: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Attach a circuit breaker registry and the resource id to key it by
    pub fn with_breaker(
        mut self,
        breakers: Arc<CircuitBreakerRegistry>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.breakers = Some(breakers);
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Whether a failed attempt should be retried
    ///
    /// `dont_retry_on_errors` takes precedence over `retry_on_errors`; both
    /// match case-insensitive substrings of the error message.
    pub fn should_retry(&self, error: &str, attempt: u32) -> bool {
        if attempt >= self.policy.max_attempts {
            return false;
        }
        let lowered = error.to_lowercase();
        if self
            .policy
            .dont_retry_on_errors
            .iter()
            .any(|p| lowered.contains(&p.to_lowercase()))
        {
            return false;
        }
        if !self.policy.retry_on_errors.is_empty() {
            return self
                .policy
                .retry_on_errors
                .iter()
                .any(|p| lowered.contains(&p.to_lowercase()));
        }
        true
    }

    /// Delay before the retry following `attempt` (1-based)
    pub fn delay_ms(&self, attempt: u32) -> u64 {
        let exponential = || {
            let factor = self.policy.backoff_multiplier.powi(attempt as i32 - 1);
            let raw = (self.policy.initial_delay_ms as f64 * factor).round() as u64;
            raw.min(self.policy.max_delay_ms)
        };

        match self.policy.delay_strategy {
            DelayStrategy::Fixed => self.policy.initial_delay_ms,
            DelayStrategy::Exponential => exponential(),
            DelayStrategy::Jittered => {
                let base = exponential() as f64;
                let factor = rand::thread_rng().gen_range(0.8..=1.2);
                (base * factor).round() as u64
            }
        }
    }

    /// Run the thunk under the policy
    pub async fn execute<T, F, Fut>(&self, mut thunk: F) -> RetryOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = ForgeResult<T>>,
    {
        let started = Instant::now();
        let breaker_config = self.policy.circuit_breaker.clone();
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.policy.max_attempts {
            // Consult the breaker before every attempt
            if let (Some(breakers), Some(resource_id), Some(config)) =
                (&self.breakers, &self.resource_id, &breaker_config)
            {
                if let CircuitDecision::Reject {
                    cooldown_remaining_ms,
                } = breakers.check(resource_id, config)
                {
                    warn!(
                        resource = %resource_id,
                        cooldown_remaining_ms,
                        "circuit breaker rejected call"
                    );
                    return RetryOutcome {
                        success: false,
                        value: None,
                        error: Some(format!(
                            "Circuit breaker is OPEN for resource '{}' ({} ms cooldown remaining)",
                            resource_id, cooldown_remaining_ms
                        )),
                        attempts: 0,
                        total_duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
            }

            match thunk().await {
                Ok(value) => {
                    if let (Some(breakers), Some(resource_id), Some(_)) =
                        (&self.breakers, &self.resource_id, &breaker_config)
                    {
                        breakers.record_success(resource_id);
                    }
                    return RetryOutcome {
                        success: true,
                        value: Some(value),
                        error: None,
                        attempts: attempt,
                        total_duration_ms: started.elapsed().as_millis() as u64,
                    };
                }
                Err(err) => {
                    let message = err.to_string();
                    if let (Some(breakers), Some(resource_id), Some(config)) =
                        (&self.breakers, &self.resource_id, &breaker_config)
                    {
                        breakers.record_failure(resource_id, config);
                    }

                    if self.should_retry(&message, attempt) {
                        let delay = self.delay_ms(attempt);
                        debug!(attempt, delay_ms = delay, error = %message, "retrying after delay");
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_millis(delay)) => {}
                            _ = self.cancel.cancelled() => {
                                return RetryOutcome {
                                    success: false,
                                    value: None,
                                    error: Some("execution cancelled".to_string()),
                                    attempts: attempt,
                                    total_duration_ms: started.elapsed().as_millis() as u64,
                                };
                            }
                        }
                        last_error = Some(message);
                    } else {
                        return RetryOutcome {
                            success: false,
                            value: None,
                            error: Some(message),
                            attempts: attempt,
                            total_duration_ms: started.elapsed().as_millis() as u64,
                        };
                    }
                }
            }
        }

        RetryOutcome {
            success: false,
            value: None,
            error: last_error,
            attempts: self.policy.max_attempts,
            total_duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowforge_core::ForgeError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay_ms: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_success_first_attempt() {
        let executor = RetryExecutor::new(policy(3));
        let outcome = executor.execute(|| async { Ok::<_, ForgeError>(7) }).await;
        assert!(outcome.success);
        assert_eq!(outcome.value, Some(7));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let executor = RetryExecutor::new(policy(3));
        let calls = AtomicU32::new(0);
        let outcome = executor
            .execute(|| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(ForgeError::Script("flaky".to_string()))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let executor = RetryExecutor::new(policy(2));
        let outcome = executor
            .execute(|| async { Err::<(), _>(ForgeError::Script("always".to_string())) })
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.attempts, 2);
        assert!(outcome.error.unwrap().contains("always"));
    }

    #[tokio::test]
    async fn test_dont_retry_takes_precedence() {
        let mut p = policy(5);
        p.retry_on_errors = vec!["fatal".to_string()];
        p.dont_retry_on_errors = vec!["FATAL".to_string()];
        let executor = RetryExecutor::new(p);
        let outcome = executor
            .execute(|| async { Err::<(), _>(ForgeError::Script("fatal disk error".to_string())) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_on_filter() {
        let mut p = policy(3);
        p.retry_on_errors = vec!["timeout".to_string()];
        let executor = RetryExecutor::new(p);
        // Error does not match the filter: no retry
        let outcome = executor
            .execute(|| async { Err::<(), _>(ForgeError::Script("permission denied".to_string())) })
            .await;
        assert_eq!(outcome.attempts, 1);
    }

    #[test]
    fn test_delay_strategies() {
        let mut p = policy(5);
        p.initial_delay_ms = 100;
        p.backoff_multiplier = 2.0;
        p.max_delay_ms = 350;

        p.delay_strategy = DelayStrategy::Fixed;
        let executor = RetryExecutor::new(p.clone());
        assert_eq!(executor.delay_ms(1), 100);
        assert_eq!(executor.delay_ms(4), 100);

        p.delay_strategy = DelayStrategy::Exponential;
        let executor = RetryExecutor::new(p.clone());
        assert_eq!(executor.delay_ms(1), 100);
        assert_eq!(executor.delay_ms(2), 200);
        // Saturates at max_delay_ms
        assert_eq!(executor.delay_ms(3), 350);
        assert_eq!(executor.delay_ms(4), 350);

        p.delay_strategy = DelayStrategy::Jittered;
        let executor = RetryExecutor::new(p);
        for attempt in 1..=4 {
            let jittered = executor.delay_ms(attempt);
            let mut base = RetryExecutor::new(RetryPolicy {
                delay_strategy: DelayStrategy::Exponential,
                initial_delay_ms: 100,
                backoff_multiplier: 2.0,
                max_delay_ms: 350,
                ..Default::default()
            })
            .delay_ms(attempt) as f64;
            base = base.max(1.0);
            assert!(jittered as f64 >= (base * 0.8).floor());
            assert!(jittered as f64 <= (base * 1.2).ceil());
        }
    }

    #[test]
    fn test_exponential_monotonic_until_cap() {
        let mut p = policy(10);
        p.initial_delay_ms = 50;
        p.backoff_multiplier = 2.0;
        p.max_delay_ms = 30_000;
        p.delay_strategy = DelayStrategy::Exponential;
        let executor = RetryExecutor::new(p);
        let mut previous = 0;
        for attempt in 1..=10 {
            let delay = executor.delay_ms(attempt);
            assert!(delay >= previous);
            assert!(delay <= 30_000);
            previous = delay;
        }
    }

    #[tokio::test]
    async fn test_cancellation_aborts_sleep() {
        let mut p = policy(3);
        p.initial_delay_ms = 60_000;
        let cancel = CancellationToken::new();
        let executor = RetryExecutor::new(p).with_cancellation(cancel.clone());

        let handle = tokio::spawn(async move {
            executor
                .execute(|| async { Err::<(), _>(ForgeError::Script("boom".to_string())) })
                .await
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        let outcome = handle.await.unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("cancelled"));
        assert!(outcome.total_duration_ms < 60_000);
    }
}
