//! # Metrics
//!
//! Prometheus metrics for monitoring the controller.
//!
//! ## Metrics Exposed
//!
//! - `managed_certificate_reconciliations_total` - Total number of sync passes
//! - `managed_certificate_reconciliation_errors_total` - Total number of failed sync passes
//! - `managed_certificate_reconciliation_duration_seconds` - Duration of sync passes
//! - `managed_certificate_drift_remediations_total` - SslCertificates deleted because they drifted from desired intent
//! - `managed_certificate_creation_latency_seconds` - Time from ManagedCertificate creation to the SslCertificate first existing (the provisioning SLO)
//! - `managed_certificate_tracked` - Current number of tracked ManagedCertificates

use std::time::Duration;

use anyhow::Result;
use prometheus::{Histogram, IntCounter, IntGauge, Registry};
use std::sync::LazyLock;

pub(crate) static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static RECONCILIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_certificate_reconciliations_total",
        "Total number of sync passes",
    )
    .expect("Failed to create RECONCILIATIONS_TOTAL metric - this should never happen")
});

static RECONCILIATION_ERRORS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_certificate_reconciliation_errors_total",
        "Total number of failed sync passes",
    )
    .expect("Failed to create RECONCILIATION_ERRORS_TOTAL metric - this should never happen")
});

static RECONCILIATION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_certificate_reconciliation_duration_seconds",
            "Duration of sync passes in seconds",
        )
        .buckets(vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0]),
    )
    .expect("Failed to create RECONCILIATION_DURATION metric - this should never happen")
});

static DRIFT_REMEDIATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "managed_certificate_drift_remediations_total",
        "SslCertificates deleted because they drifted from desired intent",
    )
    .expect("Failed to create DRIFT_REMEDIATIONS_TOTAL metric - this should never happen")
});

static CREATION_LATENCY: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "managed_certificate_creation_latency_seconds",
            "Time from ManagedCertificate creation to its SslCertificate first existing",
        )
        .buckets(vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 1800.0, 3600.0]),
    )
    .expect("Failed to create CREATION_LATENCY metric - this should never happen")
});

static TRACKED_CERTIFICATES: LazyLock<IntGauge> = LazyLock::new(|| {
    IntGauge::new(
        "managed_certificate_tracked",
        "Current number of tracked ManagedCertificates",
    )
    .expect("Failed to create TRACKED_CERTIFICATES metric - this should never happen")
});

pub fn register_metrics() -> Result<()> {
    REGISTRY.register(Box::new(RECONCILIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_ERRORS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(RECONCILIATION_DURATION.clone()))?;
    REGISTRY.register(Box::new(DRIFT_REMEDIATIONS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(CREATION_LATENCY.clone()))?;
    REGISTRY.register(Box::new(TRACKED_CERTIFICATES.clone()))?;

    Ok(())
}

pub fn increment_reconciliations() {
    RECONCILIATIONS_TOTAL.inc();
}

pub fn increment_reconciliation_errors() {
    RECONCILIATION_ERRORS_TOTAL.inc();
}

pub fn observe_reconciliation_duration(seconds: f64) {
    RECONCILIATION_DURATION.observe(seconds);
}

pub fn increment_drift_remediations() {
    DRIFT_REMEDIATIONS_TOTAL.inc();
}

pub fn set_tracked_certificates(count: i64) {
    TRACKED_CERTIFICATES.set(count);
}

/// One-shot latency sink consumed by the sync core.
///
/// The core reports each ManagedCertificate's creation latency at most once;
/// the guard flags live in the state store, the sink only records.
pub trait Metrics: Send + Sync {
    fn observe_ssl_certificate_creation_latency(&self, latency: Duration);
}

/// [`Metrics`] implementation recording into the prometheus registry.
#[derive(Debug, Clone, Default)]
pub struct PrometheusMetrics;

impl Metrics for PrometheusMetrics {
    fn observe_ssl_certificate_creation_latency(&self, latency: Duration) {
        CREATION_LATENCY.observe(latency.as_secs_f64());
    }
}
