//! Saga configuration.

use cashout_runtime::circuit_breaker::CircuitBreakerConfig;
use cashout_runtime::retry::RetryPolicy;
use std::time::Duration;

/// Tunables for the withdrawal saga.
///
/// # Example
///
/// ```
/// use cashout_withdrawal::config::SagaConfig;
/// use std::time::Duration;
///
/// let config = SagaConfig::default()
///     .with_bank_response_timeout(Duration::from_secs(60));
/// ```
#[derive(Debug, Clone)]
pub struct SagaConfig {
    /// How long a withdrawal may sit in `SendingToBank` before the saga
    /// gives up on the bank callback and rolls the debit back
    pub bank_response_timeout: Duration,
    /// Backoff policy for record lookups racing against a just-created
    /// withdrawal
    pub lookup_retry: RetryPolicy,
    /// Circuit breaker protecting bank gateway calls
    pub breaker: CircuitBreakerConfig,
}

impl SagaConfig {
    /// Set the bank response timeout
    #[must_use]
    pub const fn with_bank_response_timeout(mut self, timeout: Duration) -> Self {
        self.bank_response_timeout = timeout;
        self
    }

    /// Set the lookup retry policy
    #[must_use]
    pub fn with_lookup_retry(mut self, policy: RetryPolicy) -> Self {
        self.lookup_retry = policy;
        self
    }

    /// Set the bank gateway circuit breaker configuration
    #[must_use]
    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            bank_response_timeout: Duration::from_secs(30),
            lookup_retry: RetryPolicy::builder()
                .max_retries(3)
                .initial_delay(Duration::from_millis(25))
                .max_delay(Duration::from_millis(500))
                .build(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_timeout() {
        let config =
            SagaConfig::default().with_bank_response_timeout(Duration::from_millis(250));
        assert_eq!(config.bank_response_timeout, Duration::from_millis(250));
    }
}
