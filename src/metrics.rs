//! 📊 Prometheus metrics for the tracker service
//!
//! Registry and counters live behind a lazy static; the HTTP server
//! exposes them on /metrics via [`encode`].

use log::error;
use once_cell::sync::Lazy;
use prometheus::{Gauge, IntCounter, IntGauge, Opts, Registry};
use std::sync::Arc;

/// Global metrics registry
static METRICS: Lazy<Arc<TrackerMetrics>> = Lazy::new(|| Arc::new(TrackerMetrics::new()));

pub struct TrackerMetrics {
    registry: Registry,

    // Ingestion counters
    pub trades_processed: IntCounter,
    pub trades_injected: IntCounter,
    pub duplicates_dropped: IntCounter,
    pub malformed_dropped: IntCounter,

    // Feed state
    pub feed_reconnects: IntCounter,
    pub feed_connected: IntGauge,

    // Engine counters
    pub sells_triggered: IntCounter,
    pub sells_completed: IntCounter,
    pub sells_failed: IntCounter,
    pub sells_cancelled: IntCounter,
    pub front_run_detections: IntCounter,

    // Persistence
    pub rows_persisted: IntCounter,
    pub db_flush_errors: IntCounter,

    // Live state gauges
    pub external_net_sol: Gauge,
    pub gross_buy_sol: Gauge,
    pub stream_subscribers: IntGauge,
}

impl TrackerMetrics {
    fn new() -> Self {
        let registry = Registry::new();

        fn counter(registry: &Registry, name: &str, help: &str) -> IntCounter {
            let c = IntCounter::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(c.clone())).unwrap();
            c
        }

        fn int_gauge(registry: &Registry, name: &str, help: &str) -> IntGauge {
            let g = IntGauge::with_opts(Opts::new(name, help)).unwrap();
            registry.register(Box::new(g.clone())).unwrap();
            g
        }

        let trades_processed = counter(
            &registry,
            "tracker_trades_processed",
            "Trades accepted into the accounting",
        );
        let trades_injected = counter(
            &registry,
            "tracker_trades_injected",
            "Manually injected trades accepted",
        );
        let duplicates_dropped = counter(
            &registry,
            "tracker_duplicates_dropped",
            "Trades dropped as duplicates",
        );
        let malformed_dropped = counter(
            &registry,
            "tracker_malformed_dropped",
            "Feed events dropped as malformed or non-trade",
        );

        let feed_reconnects = counter(
            &registry,
            "tracker_feed_reconnects",
            "Successful feed connections since start",
        );
        let feed_connected = int_gauge(
            &registry,
            "tracker_feed_connected",
            "1 while the feed websocket is up",
        );

        let sells_triggered = counter(
            &registry,
            "tracker_sells_triggered",
            "Wallets that crossed their sell threshold",
        );
        let sells_completed = counter(
            &registry,
            "tracker_sells_completed",
            "Sell executions that returned success",
        );
        let sells_failed = counter(
            &registry,
            "tracker_sells_failed",
            "Sell executions that returned an error",
        );
        let sells_cancelled = counter(
            &registry,
            "tracker_sells_cancelled",
            "Pending sells cancelled by re-validation",
        );
        let front_run_detections = counter(
            &registry,
            "tracker_front_run_detections",
            "Times the front-run guard latched",
        );

        let rows_persisted = counter(
            &registry,
            "tracker_rows_persisted",
            "Trade rows flushed to SQLite",
        );
        let db_flush_errors = counter(
            &registry,
            "tracker_db_flush_errors",
            "Failed SQLite flush attempts",
        );

        let external_net_sol = Gauge::with_opts(Opts::new(
            "tracker_external_net_sol",
            "Net external SOL volume for the tracked token",
        ))
        .unwrap();
        registry.register(Box::new(external_net_sol.clone())).unwrap();

        let gross_buy_sol = Gauge::with_opts(Opts::new(
            "tracker_gross_buy_sol",
            "External buy volume inside the front-run window",
        ))
        .unwrap();
        registry.register(Box::new(gross_buy_sol.clone())).unwrap();

        let stream_subscribers = int_gauge(
            &registry,
            "tracker_stream_subscribers",
            "Connected live-stream subscribers",
        );

        Self {
            registry,
            trades_processed,
            trades_injected,
            duplicates_dropped,
            malformed_dropped,
            feed_reconnects,
            feed_connected,
            sells_triggered,
            sells_completed,
            sells_failed,
            sells_cancelled,
            front_run_detections,
            rows_persisted,
            db_flush_errors,
            external_net_sol,
            gross_buy_sol,
            stream_subscribers,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Get global metrics instance
pub fn metrics() -> Arc<TrackerMetrics> {
    METRICS.clone()
}

/// Initialize metrics (called at startup)
pub fn init_metrics() {
    let _ = METRICS.clone();
    log::info!("📊 Metrics system initialized");
}

/// Render the registry in Prometheus text format.
pub fn encode() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    encoder.encode_to_string(&METRICS.registry().gather()).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        e
    })
}

// Helper functions for recording metrics

pub fn set_feed_connected(up: bool) {
    metrics().feed_connected.set(if up { 1 } else { 0 });
}

pub fn feed_connected() -> bool {
    metrics().feed_connected.get() == 1
}

pub fn inc_feed_reconnects() {
    metrics().feed_reconnects.inc();
}

pub fn record_trade_processed(injected: bool) {
    let m = metrics();
    m.trades_processed.inc();
    if injected {
        m.trades_injected.inc();
    }
}

pub fn record_duplicate_dropped() {
    metrics().duplicates_dropped.inc();
}

pub fn record_malformed_dropped() {
    metrics().malformed_dropped.inc();
}

pub fn record_sell_triggered() {
    metrics().sells_triggered.inc();
}

pub fn record_sell_result(ok: bool) {
    if ok {
        metrics().sells_completed.inc();
    } else {
        metrics().sells_failed.inc();
    }
}

pub fn record_sell_cancelled() {
    metrics().sells_cancelled.inc();
}

pub fn record_front_run_detection() {
    metrics().front_run_detections.inc();
}

pub fn record_rows_persisted(count: u64) {
    metrics().rows_persisted.inc_by(count);
}

pub fn record_db_flush_error() {
    metrics().db_flush_errors.inc();
}

pub fn set_external_net_sol(value: f64) {
    metrics().external_net_sol.set(value);
}

pub fn set_gross_buy_sol(value: f64) {
    metrics().gross_buy_sol.set(value);
}

pub fn set_stream_subscribers(count: i64) {
    metrics().stream_subscribers.set(count);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        init_metrics();
        let m = metrics();
        m.trades_processed.inc();
        assert!(m.trades_processed.get() > 0);
    }

    #[test]
    fn test_encode_contains_registered_names() {
        init_metrics();
        record_trade_processed(false);
        set_feed_connected(true);

        let body = encode().unwrap();
        assert!(body.contains("tracker_trades_processed"));
        assert!(body.contains("tracker_feed_connected"));
    }
}
