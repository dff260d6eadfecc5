//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for all engine components:
//! - Saga step transitions and compensations
//! - Ledger debits and credit-backs
//! - User notification delivery
//! - Circuit breaker state
//! - Store/effect execution
//!
//! # Example
//!
//! ```rust,no_run
//! use cashout_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // Start metrics server on port 9090
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
    /// Failed to bind HTTP server
    #[error("Failed to bind metrics server: {0}")]
    Bind(#[from] std::io::Error),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server.
    ///
    /// # Arguments
    ///
    /// * `addr` - Socket address to bind to (e.g., `0.0.0.0:9090`)
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Initialize metrics and start the HTTP server.
    ///
    /// # Errors
    ///
    /// Returns error if metrics exporter cannot be installed or server cannot bind.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this will
    /// log a warning and continue. In production, ensure this is only called
    /// once.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        // Register all metric descriptions
        register_metrics();

        // Build and install the Prometheus exporter
        let builder = PrometheusBuilder::new()
            // Configure histogram buckets for latency measurements
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        // Try to install the recorder
        // In tests, this may fail if a recorder is already installed
        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!(
                    addr = %self.addr,
                    "Metrics server started - available at http://{}/metrics",
                    self.addr
                );
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!(
                        "Metrics recorder already initialized, skipping re-initialization"
                    );
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
fn register_metrics() {
    // Saga Metrics
    describe_counter!(
        "saga_steps_total",
        "Total number of withdrawal step transitions, labeled by step"
    );
    describe_counter!(
        "saga_compensations_total",
        "Total number of compensating credit-backs executed"
    );
    describe_counter!(
        "saga_timeouts_total",
        "Total number of withdrawals that timed out waiting for the bank"
    );
    describe_counter!(
        "saga_stalled_total",
        "Total number of saga handlers that failed and left the withdrawal stalled"
    );

    // Ledger Metrics
    describe_counter!(
        "ledger_debits_total",
        "Total number of successful check-and-debit operations"
    );
    describe_counter!(
        "ledger_debit_rejections_total",
        "Total number of debits rejected for insufficient funds"
    );
    describe_counter!(
        "ledger_credit_backs_total",
        "Total number of credit-back operations"
    );

    // Notification Metrics
    describe_counter!(
        "notifications_sent_total",
        "Total number of user notifications delivered, labeled by kind"
    );
    describe_counter!(
        "notifications_failed_total",
        "Total number of user notification deliveries that failed"
    );

    // Store Metrics
    describe_counter!("store_actions_total", "Total number of actions processed");
    describe_histogram!(
        "store_reducer_duration_seconds",
        "Time taken to execute the reducer"
    );
    describe_counter!(
        "store_effects_executed_total",
        "Total number of effects executed, labeled by type"
    );

    // DLQ Metrics
    describe_gauge!("dlq_size", "Current dead letter queue size");
    describe_counter!("dlq_pushed_total", "Total entries pushed to the DLQ");
    describe_counter!(
        "dlq_dropped_total",
        "Total entries dropped from a full DLQ"
    );

    // Circuit Breaker Metrics
    describe_counter!(
        "circuit_breaker_calls_total",
        "Total number of calls through circuit breaker"
    );
    describe_counter!(
        "circuit_breaker_failures_total",
        "Total number of failed calls"
    );
    describe_counter!(
        "circuit_breaker_rejections_total",
        "Total number of rejected calls (circuit open)"
    );

    // Retry Metrics
    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of operations that exhausted max retries"
    );
}

/// Saga metrics recorder.
pub struct SagaMetrics;

impl SagaMetrics {
    /// Record a step transition.
    pub fn record_step(step: &'static str) {
        counter!("saga.steps", "step" => step).increment(1);
    }

    /// Record a compensating credit-back.
    pub fn record_compensation() {
        counter!("saga.compensations").increment(1);
    }

    /// Record a bank-response timeout.
    pub fn record_timeout() {
        counter!("saga.timeouts").increment(1);
    }

    /// Record a stalled saga handler.
    pub fn record_stalled(operation: &'static str) {
        counter!("saga.stalled", "operation" => operation).increment(1);
    }
}

/// Ledger metrics recorder.
pub struct LedgerMetrics;

impl LedgerMetrics {
    /// Record a successful debit.
    pub fn record_debit() {
        counter!("ledger.debits").increment(1);
    }

    /// Record a debit rejected for insufficient funds.
    pub fn record_debit_rejection() {
        counter!("ledger.debit_rejections").increment(1);
    }

    /// Record a credit-back.
    pub fn record_credit_back() {
        counter!("ledger.credit_backs").increment(1);
    }
}

/// Notification metrics recorder.
pub struct NotificationMetrics;

impl NotificationMetrics {
    /// Record a delivered notification.
    pub fn record_sent(kind: &'static str) {
        counter!("notifications.sent", "kind" => kind).increment(1);
    }

    /// Record a failed notification delivery.
    pub fn record_failed(kind: &'static str) {
        counter!("notifications.failed", "kind" => kind).increment(1);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_metrics_server_creation() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = MetricsServer::new(addr);
        assert!(server.handle().is_none());
    }

    #[tokio::test]
    async fn test_metrics_server_start() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        let result = server.start();
        assert!(result.is_ok());
        // Note: handle might be None if another test already initialized the
        // recorder. This is OK - the recorder is still installed globally.
    }

    #[tokio::test]
    async fn test_metrics_server_render() {
        let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let mut server = MetricsServer::new(addr);

        if server.start().is_err() {
            return;
        }

        // Record some metrics
        SagaMetrics::record_step("CREATED");
        LedgerMetrics::record_debit();
        NotificationMetrics::record_sent("success");

        // If this test runs after another test initialized the recorder,
        // handle might be None. That's OK - metrics are still being recorded.
        if let Some(rendered) = server.render() {
            assert!(rendered.contains("saga_steps"));
            assert!(rendered.contains("ledger_debits"));
        }
    }
}
