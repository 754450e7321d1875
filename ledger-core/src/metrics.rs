//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Each [`Metrics`] owns its registry so the host process decides where
//! it is exposed.
//!
//! # Metrics
//!
//! - `ledger_payments_created_total` - Payments inserted
//! - `ledger_payment_conflicts_total` - Payment inserts rejected as duplicates
//! - `ledger_numbering_retries_total` - Lost numbering races that were retried
//! - `ledger_payments_confirmed_total` - Confirmations that changed state
//! - `ledger_duplicate_confirmations_total` - Confirmations of already confirmed payments
//! - `ledger_registrations_created_total` - Airdrop registrations inserted
//! - `ledger_registration_conflicts_total` - Registrations rejected as duplicates
//! - `ledger_broadcast_failures_total` - Confirmation events that could not be published

use prometheus::{IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Payments inserted
    pub payments_created: IntCounter,

    /// Payment inserts rejected with a conflict
    pub payment_conflicts: IntCounter,

    /// Numbering races retried
    pub numbering_retries: IntCounter,

    /// Confirmations that flipped the flag
    pub payments_confirmed: IntCounter,

    /// Idempotent repeat confirmations
    pub duplicate_confirmations: IntCounter,

    /// Registrations inserted
    pub registrations_created: IntCounter,

    /// Registrations rejected with a conflict
    pub registration_conflicts: IntCounter,

    /// Confirmation events lost after retries
    pub broadcast_failures: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        Ok(Self {
            payments_created: counter("ledger_payments_created_total", "Payments inserted")?,
            payment_conflicts: counter(
                "ledger_payment_conflicts_total",
                "Payment inserts rejected as duplicates",
            )?,
            numbering_retries: counter(
                "ledger_numbering_retries_total",
                "Lost numbering races that were retried",
            )?,
            payments_confirmed: counter(
                "ledger_payments_confirmed_total",
                "Confirmations that changed state",
            )?,
            duplicate_confirmations: counter(
                "ledger_duplicate_confirmations_total",
                "Confirmations of already confirmed payments",
            )?,
            registrations_created: counter(
                "ledger_registrations_created_total",
                "Airdrop registrations inserted",
            )?,
            registration_conflicts: counter(
                "ledger_registration_conflicts_total",
                "Registrations rejected as duplicates",
            )?,
            broadcast_failures: counter(
                "ledger_broadcast_failures_total",
                "Confirmation events that could not be published",
            )?,
            registry,
        })
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("payments_created", &self.payments_created.get())
            .field("payments_confirmed", &self.payments_confirmed.get())
            .field("broadcast_failures", &self.broadcast_failures.get())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.payments_created.get(), 0);
        assert_eq!(metrics.broadcast_failures.get(), 0);
        assert_eq!(metrics.registry().gather().len(), 8);
    }

    #[test]
    fn test_instances_are_independent() {
        // Separate registries never collide on metric names
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();

        a.payments_confirmed.inc();
        a.payments_confirmed.inc();
        assert_eq!(a.payments_confirmed.get(), 2);
        assert_eq!(b.payments_confirmed.get(), 0);
    }

    #[test]
    fn test_clone_shares_counters() {
        let metrics = Metrics::new().unwrap();
        let clone = metrics.clone();
        clone.registrations_created.inc();
        assert_eq!(metrics.registrations_created.get(), 1);
    }
}
