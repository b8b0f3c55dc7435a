// Flowforge Runtime - Circuit breaker
//
// Per-resource CLOSED/OPEN/HALF_OPEN state machine. State is keyed by a
// caller-chosen resource id and persists across workflow executions; the
// registry is shared between workflows, so every read/mutate pair happens
// under one mutex hold.

use flowforge_core::workflow::CircuitBreakerConfig;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, info};

/// Circuit states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug)]
struct ResourceState {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
}

impl ResourceState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            last_failure: None,
        }
    }
}

/// Outcome of consulting the breaker before a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitDecision {
    /// Proceed with the call
    Allow,
    /// Circuit is open; do not attempt the call
    Reject { cooldown_remaining_ms: u64 },
}

/// Registry of circuit breaker states, keyed by resource id
pub struct CircuitBreakerRegistry {
    resources: Mutex<HashMap<String, ResourceState>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Process-wide registry shared by all workflows
    pub fn global() -> Arc<CircuitBreakerRegistry> {
        static GLOBAL: OnceLock<Arc<CircuitBreakerRegistry>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CircuitBreakerRegistry::new())))
    }

    /// Consult the breaker before a call. An OPEN circuit past its cooldown
    /// transitions to HALF_OPEN on this query and the call is allowed as a
    /// probe.
    pub fn check(&self, resource_id: &str, config: &CircuitBreakerConfig) -> CircuitDecision {
        if !config.enabled {
            return CircuitDecision::Allow;
        }

        let mut resources = self.resources.lock();
        let entry = resources
            .entry(resource_id.to_string())
            .or_insert_with(ResourceState::new);

        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => CircuitDecision::Allow,
            CircuitState::Open => {
                let elapsed_ms = entry
                    .last_failure
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(u64::MAX);
                if elapsed_ms >= config.cooldown_ms {
                    debug!(resource = resource_id, "circuit half-open probe");
                    entry.state = CircuitState::HalfOpen;
                    CircuitDecision::Allow
                } else {
                    CircuitDecision::Reject {
                        cooldown_remaining_ms: config.cooldown_ms - elapsed_ms,
                    }
                }
            }
        }
    }

    /// Record a successful call
    pub fn record_success(&self, resource_id: &str) {
        let mut resources = self.resources.lock();
        if let Some(entry) = resources.get_mut(resource_id) {
            if entry.state == CircuitState::HalfOpen {
                info!(resource = resource_id, "circuit closed after probe success");
            }
            entry.state = CircuitState::Closed;
            entry.consecutive_failures = 0;
        }
    }

    /// Record a failed call
    pub fn record_failure(&self, resource_id: &str, config: &CircuitBreakerConfig) {
        if !config.enabled {
            return;
        }

        let mut resources = self.resources.lock();
        let entry = resources
            .entry(resource_id.to_string())
            .or_insert_with(ResourceState::new);

        entry.last_failure = Some(Instant::now());
        match entry.state {
            CircuitState::HalfOpen => {
                info!(resource = resource_id, "probe failed, circuit re-opened");
                entry.state = CircuitState::Open;
            }
            CircuitState::Closed => {
                entry.consecutive_failures += 1;
                if entry.consecutive_failures >= config.failure_threshold {
                    info!(
                        resource = resource_id,
                        failures = entry.consecutive_failures,
                        "failure threshold reached, circuit opened"
                    );
                    entry.state = CircuitState::Open;
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Current state; CLOSED for unknown resources and disabled configs
    pub fn state(&self, resource_id: &str, config: &CircuitBreakerConfig) -> CircuitState {
        if !config.enabled {
            return CircuitState::Closed;
        }
        let resources = self.resources.lock();
        resources
            .get(resource_id)
            .map(|r| r.state)
            .unwrap_or(CircuitState::Closed)
    }

    /// Remaining cooldown in ms; 0 unless the circuit is OPEN
    pub fn cooldown_remaining_ms(
        &self,
        resource_id: &str,
        config: &CircuitBreakerConfig,
    ) -> u64 {
        let resources = self.resources.lock();
        match resources.get(resource_id) {
            Some(entry) if entry.state == CircuitState::Open => {
                let elapsed_ms = entry
                    .last_failure
                    .map(|t| t.elapsed().as_millis() as u64)
                    .unwrap_or(u64::MAX);
                config.cooldown_ms.saturating_sub(elapsed_ms)
            }
            _ => 0,
        }
    }

    /// Reset one resource back to CLOSED
    pub fn reset(&self, resource_id: &str) {
        let mut resources = self.resources.lock();
        resources.remove(resource_id);
    }

    /// Drop all tracked state
    pub fn clear(&self) {
        self.resources.lock().clear();
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(threshold: u32, cooldown_ms: u64) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            cooldown_ms,
            resource_id: None,
        }
    }

    #[test]
    fn test_opens_after_threshold() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(3, 60_000);

        for _ in 0..2 {
            registry.record_failure("api", &cfg);
            assert_eq!(registry.state("api", &cfg), CircuitState::Closed);
        }
        registry.record_failure("api", &cfg);
        assert_eq!(registry.state("api", &cfg), CircuitState::Open);
        assert!(matches!(
            registry.check("api", &cfg),
            CircuitDecision::Reject { .. }
        ));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(3, 60_000);

        registry.record_failure("api", &cfg);
        registry.record_failure("api", &cfg);
        registry.record_success("api");
        registry.record_failure("api", &cfg);
        registry.record_failure("api", &cfg);
        assert_eq!(registry.state("api", &cfg), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_after_cooldown() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(1, 0);

        registry.record_failure("api", &cfg);
        assert_eq!(registry.state("api", &cfg), CircuitState::Open);

        // Zero cooldown: the next query transitions to HALF_OPEN
        assert_eq!(registry.check("api", &cfg), CircuitDecision::Allow);
        assert_eq!(registry.state("api", &cfg), CircuitState::HalfOpen);

        registry.record_success("api");
        assert_eq!(registry.state("api", &cfg), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(1, 0);

        registry.record_failure("api", &cfg);
        assert_eq!(registry.check("api", &cfg), CircuitDecision::Allow);
        registry.record_failure("api", &cfg);
        assert_eq!(registry.state("api", &cfg), CircuitState::Open);
    }

    #[test]
    fn test_resource_isolation() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(1, 60_000);

        registry.record_failure("a", &cfg);
        assert_eq!(registry.state("a", &cfg), CircuitState::Open);
        assert_eq!(registry.state("b", &cfg), CircuitState::Closed);
        assert_eq!(registry.check("b", &cfg), CircuitDecision::Allow);
    }

    #[test]
    fn test_disabled_reports_closed() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = CircuitBreakerConfig::default();

        registry.record_failure("api", &cfg);
        assert_eq!(registry.state("api", &cfg), CircuitState::Closed);
        assert_eq!(registry.check("api", &cfg), CircuitDecision::Allow);
    }

    #[test]
    fn test_reset_and_clear() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(1, 60_000);

        registry.record_failure("a", &cfg);
        registry.record_failure("b", &cfg);
        registry.reset("a");
        assert_eq!(registry.state("a", &cfg), CircuitState::Closed);
        assert_eq!(registry.state("b", &cfg), CircuitState::Open);
        registry.clear();
        assert_eq!(registry.state("b", &cfg), CircuitState::Closed);
    }

    #[test]
    fn test_cooldown_remaining() {
        let registry = CircuitBreakerRegistry::new();
        let cfg = config(1, 60_000);

        assert_eq!(registry.cooldown_remaining_ms("api", &cfg), 0);
        registry.record_failure("api", &cfg);
        let remaining = registry.cooldown_remaining_ms("api", &cfg);
        assert!(remaining > 0 && remaining <= 60_000);
    }
}
