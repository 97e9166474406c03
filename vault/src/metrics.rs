//! # Prometheus Metrics
//!
//! Operational counters for the vault. The embedding service scrapes them
//! through [`VaultMetrics::encode`] on whatever endpoint it already exposes.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] under
//! the `vault` namespace so they don't collide with the host process's own
//! registry.
//!
//! `compensations_total` is the one to alert on. Every increment is a
//! release that failed after a debit committed.

use prometheus::{Encoder, Gauge, Histogram, HistogramOpts, IntCounter, Registry, TextEncoder};

use crate::config::{Balance, UNITS_PER_COIN};

/// Holds all Prometheus metric handles for a vault.
///
/// Clone-friendly (prometheus handles are `Arc`s internally) so it can be
/// shared between the service and whatever serves `/metrics`.
#[derive(Clone)]
pub struct VaultMetrics {
    /// Registry that owns all metrics below.
    registry: Registry,
    /// Deposits credited.
    pub deposits_total: IntCounter,
    /// Withdrawals released.
    pub withdrawals_total: IntCounter,
    /// Operations rejected before any value moved.
    pub rejected_total: IntCounter,
    /// Debits reversed after a failed release.
    pub compensations_total: IntCounter,
    /// Sum of all ledger balances, in whole coins.
    pub custody_coins: Gauge,
    /// Latency of calls into the value transfer boundary, in seconds.
    pub transfer_latency_seconds: Histogram,
}

impl VaultMetrics {
    /// Creates and registers all metrics.
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("vault".into()), None)?;

        let deposits_total =
            IntCounter::new("deposits_total", "Total number of deposits credited")?;
        registry.register(Box::new(deposits_total.clone()))?;

        let withdrawals_total =
            IntCounter::new("withdrawals_total", "Total number of withdrawals released")?;
        registry.register(Box::new(withdrawals_total.clone()))?;

        let rejected_total = IntCounter::new(
            "rejected_total",
            "Total number of operations rejected without moving value",
        )?;
        registry.register(Box::new(rejected_total.clone()))?;

        let compensations_total = IntCounter::new(
            "compensations_total",
            "Total number of debits restored after a failed release",
        )?;
        registry.register(Box::new(compensations_total.clone()))?;

        let custody_coins = Gauge::new("custody_coins", "Sum of all ledger balances in whole coins")?;
        registry.register(Box::new(custody_coins.clone()))?;

        let transfer_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "transfer_latency_seconds",
                "Latency of value transfer boundary calls in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;
        registry.register(Box::new(transfer_latency_seconds.clone()))?;

        Ok(Self {
            registry,
            deposits_total,
            withdrawals_total,
            rejected_total,
            compensations_total,
            custody_coins,
            transfer_latency_seconds,
        })
    }

    /// Updates the custody gauge. Exact balances live in the ledger; the
    /// gauge is for dashboards and loses precision past 2^53 units.
    pub fn set_custody(&self, total: Balance) {
        self.custody_coins
            .set(total as f64 / UNITS_PER_COIN as f64);
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn encode(&self) -> prometheus::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for VaultMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultMetrics")
            .field("deposits_total", &self.deposits_total.get())
            .field("withdrawals_total", &self.withdrawals_total.get())
            .field("compensations_total", &self.compensations_total.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_start_at_zero() {
        let metrics = VaultMetrics::new().unwrap();
        assert_eq!(metrics.deposits_total.get(), 0);
        assert_eq!(metrics.compensations_total.get(), 0);
        assert_eq!(metrics.custody_coins.get(), 0.0);
    }

    #[test]
    fn encode_uses_vault_namespace() {
        let metrics = VaultMetrics::new().unwrap();
        metrics.deposits_total.inc();
        metrics.set_custody(UNITS_PER_COIN * 3 / 2);

        let text = metrics.encode().unwrap();
        assert!(text.contains("vault_deposits_total 1"));
        assert!(text.contains("vault_custody_coins 1.5"));
        assert!(text.contains("vault_transfer_latency_seconds"));
    }

    #[test]
    fn custody_gauge_tracks_large_totals() {
        let metrics = VaultMetrics::new().unwrap();

        metrics.set_custody(i64::MAX as Balance + 1);
        assert!((metrics.custody_coins.get() - 9.223_372_036_854_775_808).abs() < 1e-9);

        metrics.set_custody(Balance::from(u64::MAX) * 4);
        let coins = metrics.custody_coins.get();
        assert!(coins > 73.0 && coins < 74.0, "got {coins}");

        metrics.set_custody(Balance::MAX);
        assert!(metrics.custody_coins.get() > 3.4e20);
    }

    #[test]
    fn independent_registries() {
        // Two vaults in one process must not fight over metric names.
        let a = VaultMetrics::new().unwrap();
        let b = VaultMetrics::new().unwrap();
        a.withdrawals_total.inc();
        assert_eq!(b.withdrawals_total.get(), 0);
    }
}
