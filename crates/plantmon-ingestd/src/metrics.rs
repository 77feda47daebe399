//! Prometheus metrics collection for ingestd
//!
//! # NIST 800-53 Rev 5 Control Mappings
//! - AU-6: Audit Record Review - Metrics available for analysis
//! - SI-4: System Monitoring - Ingestion and alerting metrics

use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Metrics collector for ingestd
#[derive(Clone)]
pub struct MetricsCollector {
    // Counters
    pub readings_accepted_total: Counter,
    pub readings_rejected_total: Counter,
    pub readings_failed_total: Counter,
    pub alert_transitions_total: CounterVec,
    pub store_errors_total: Counter,
    pub lock_conflicts_total: Counter,

    // Gauges
    pub batch_size: Gauge,

    // Histograms
    pub batch_latency_seconds: Histogram,

    // Registry for export
    pub registry: Arc<Registry>,
}

impl MetricsCollector {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let readings_accepted_total = Counter::with_opts(Opts::new(
            "plantmon_readings_accepted_total",
            "Total number of readings validated and stored",
        ))?;
        registry.register(Box::new(readings_accepted_total.clone()))?;

        let readings_rejected_total = Counter::with_opts(Opts::new(
            "plantmon_readings_rejected_total",
            "Total number of readings rejected by validation",
        ))?;
        registry.register(Box::new(readings_rejected_total.clone()))?;

        let readings_failed_total = Counter::with_opts(Opts::new(
            "plantmon_readings_failed_total",
            "Total number of valid readings that failed to store or evaluate",
        ))?;
        registry.register(Box::new(readings_failed_total.clone()))?;

        let alert_transitions_total = CounterVec::new(
            Opts::new(
                "plantmon_alert_transitions_total",
                "Alert lifecycle transitions by kind",
            ),
            &["transition"],
        )?;
        registry.register(Box::new(alert_transitions_total.clone()))?;

        let store_errors_total = Counter::with_opts(Opts::new(
            "plantmon_store_errors_total",
            "Total number of persistence store failures surfaced to callers",
        ))?;
        registry.register(Box::new(store_errors_total.clone()))?;

        let lock_conflicts_total = Counter::with_opts(Opts::new(
            "plantmon_lock_conflicts_total",
            "Total number of key lock acquisitions that gave up",
        ))?;
        registry.register(Box::new(lock_conflicts_total.clone()))?;

        let batch_size = Gauge::with_opts(Opts::new(
            "plantmon_batch_size",
            "Number of readings in the last ingested batch",
        ))?;
        registry.register(Box::new(batch_size.clone()))?;

        let batch_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "plantmon_batch_latency_seconds",
                "Batch ingestion latency in seconds",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5,
            ]),
        )?;
        registry.register(Box::new(batch_latency_seconds.clone()))?;

        Ok(Self {
            readings_accepted_total,
            readings_rejected_total,
            readings_failed_total,
            alert_transitions_total,
            store_errors_total,
            lock_conflicts_total,
            batch_size,
            batch_latency_seconds,
            registry: Arc::new(registry),
        })
    }

    pub fn record_batch(&self, size: usize, accepted: usize, rejected: usize, failed: usize) {
        self.batch_size.set(size as f64);
        self.record_readings(accepted, rejected, failed);
    }

    /// Per-reading counters, shared by batch and single submissions
    pub fn record_readings(&self, accepted: usize, rejected: usize, failed: usize) {
        self.readings_accepted_total.inc_by(accepted as f64);
        self.readings_rejected_total.inc_by(rejected as f64);
        self.readings_failed_total.inc_by(failed as f64);
    }

    /// Record a committed alert transition
    pub fn record_transition(&self, transition: &str) {
        self.alert_transitions_total
            .with_label_values(&[transition])
            .inc();
    }

    pub fn record_store_error(&self) {
        self.store_errors_total.inc();
    }

    pub fn record_lock_conflict(&self) {
        self.lock_conflicts_total.inc();
    }

    pub fn observe_batch_latency(&self, duration_secs: f64) {
        self.batch_latency_seconds.observe(duration_secs);
    }

    /// Text exposition format of every registered metric.
    pub fn encode_text(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}
