//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `frag_ledger_items_inserted_total` - Mothers created (interactive or imported)
//! - `frag_ledger_splits_total` / `frag_ledger_transfers_total` - Gives by kind
//! - `frag_ledger_deaths_total` - Alive -> dead transitions
//! - `frag_ledger_journals_total` - Journal entries written
//! - `frag_ledger_shares_created_total` / `frag_ledger_shares_deduplicated_total`
//! - `frag_ledger_import_entries_applied_total` / `..._skipped_total`
//! - `frag_ledger_notifications_dropped_total` / `..._failed_total`
//! - `frag_ledger_txn_duration_seconds` - Histogram of mutation latencies

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Mothers created
    pub items_inserted: IntCounter,

    /// Partial splits
    pub splits: IntCounter,

    /// Full transfers
    pub transfers: IntCounter,

    /// Frags that died
    pub deaths: IntCounter,

    /// Journal entries written
    pub journals: IntCounter,

    /// Share snapshots written
    pub shares_created: IntCounter,

    /// Share requests answered from an existing snapshot
    pub shares_deduplicated: IntCounter,

    /// Import entries replayed
    pub import_applied: IntCounter,

    /// Import entries skipped
    pub import_skipped: IntCounter,

    /// Notifications dropped before delivery (mailbox full or closed)
    pub notifications_dropped: IntCounter,

    /// Notifications the sink rejected
    pub notifications_failed: IntCounter,

    /// Mutation transaction duration histogram
    pub txn_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let counter = IntCounter::new(name, help)?;
            registry.register(Box::new(counter.clone()))?;
            Ok(counter)
        };

        let items_inserted = counter("frag_ledger_items_inserted_total", "Mothers created")?;
        let splits = counter("frag_ledger_splits_total", "Partial splits")?;
        let transfers = counter("frag_ledger_transfers_total", "Full transfers")?;
        let deaths = counter("frag_ledger_deaths_total", "Frags marked dead")?;
        let journals = counter("frag_ledger_journals_total", "Journal entries written")?;
        let shares_created = counter("frag_ledger_shares_created_total", "Share snapshots written")?;
        let shares_deduplicated = counter(
            "frag_ledger_shares_deduplicated_total",
            "Share requests answered by an existing snapshot",
        )?;
        let import_applied = counter(
            "frag_ledger_import_entries_applied_total",
            "Import entries replayed",
        )?;
        let import_skipped = counter(
            "frag_ledger_import_entries_skipped_total",
            "Import entries skipped",
        )?;
        let notifications_dropped = counter(
            "frag_ledger_notifications_dropped_total",
            "Notifications dropped before delivery",
        )?;
        let notifications_failed = counter(
            "frag_ledger_notifications_failed_total",
            "Notifications rejected by the sink",
        )?;

        let txn_duration = Histogram::with_opts(
            HistogramOpts::new(
                "frag_ledger_txn_duration_seconds",
                "Histogram of mutation transaction latencies",
            )
            .buckets(vec![0.0005, 0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 1.0]),
        )?;
        registry.register(Box::new(txn_duration.clone()))?;

        Ok(Self {
            items_inserted,
            splits,
            transfers,
            deaths,
            journals,
            shares_created,
            shares_deduplicated,
            import_applied,
            import_skipped,
            notifications_dropped,
            notifications_failed,
            txn_duration,
            registry,
        })
    }

    /// Record a give; `transfer` selects which counter moves
    pub fn record_give(&self, transfer: bool) {
        if transfer {
            self.transfers.inc();
        } else {
            self.splits.inc();
        }
    }

    /// Record journal entries written
    pub fn record_journals(&self, count: u64) {
        self.journals.inc_by(count);
    }

    /// Record mutation duration
    pub fn record_txn_duration(&self, duration_seconds: f64) {
        self.txn_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
