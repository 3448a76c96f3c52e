/*!
Observability infrastructure for the cluster backup engine.

This module provides:
- Structured logging setup (JSON or compact text) through `tracing-subscriber`
- Prometheus metrics for backup, restore and cleanup runs (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use std::time::Duration;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{BackupError, Result};

/// Filter directive used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_LOG_DIRECTIVE: &str = "clusterbackup=info";

/// Global metrics instance
#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<BackupMetrics>> = OnceLock::new();

/// Metrics collection for engine runs
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct BackupMetrics {
    pub backups_total: Counter,
    pub backup_failures_total: Counter,
    pub backup_duration_seconds: Histogram,
    pub objects_captured_total: Counter,
    pub objects_applied_total: Counter,
    pub archives_pruned_total: Counter,

    // Prometheus registry for scraping
    registry: Registry,
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| BackupError::Observability(format!("Failed to create {name} metric: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| BackupError::Observability(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
impl BackupMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let backup_duration_seconds = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "clusterbackup_backup_duration_seconds",
                "Duration of successful backup runs in seconds",
            )
            .buckets(vec![1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0]),
        )
        .map_err(|e| {
            BackupError::Observability(format!("Failed to create backup_duration_seconds metric: {e}"))
        })?;
        registry
            .register(Box::new(backup_duration_seconds.clone()))
            .map_err(|e| {
                BackupError::Observability(format!("Failed to register backup_duration_seconds: {e}"))
            })?;

        Ok(Self {
            backups_total: counter(
                &registry,
                "clusterbackup_backups_total",
                "Total successful backup runs",
            )?,
            backup_failures_total: counter(
                &registry,
                "clusterbackup_backup_failures_total",
                "Total failed backup runs",
            )?,
            backup_duration_seconds,
            objects_captured_total: counter(
                &registry,
                "clusterbackup_objects_captured_total",
                "Total objects written into archives",
            )?,
            objects_applied_total: counter(
                &registry,
                "clusterbackup_objects_applied_total",
                "Total objects created or updated by restores",
            )?,
            archives_pruned_total: counter(
                &registry,
                "clusterbackup_archives_pruned_total",
                "Total archives deleted by retention cleanup",
            )?,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the metrics could not be registered; the failure is
    /// logged once.
    pub fn global() -> Option<&'static BackupMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics are disabled");
                    None
                }
            })
            .as_ref()
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| BackupError::Observability(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            BackupError::Observability(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

/// Gather the global metrics in Prometheus text format.
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    match BackupMetrics::global() {
        Some(metrics) => metrics.gather_metrics(),
        None => Err(BackupError::Observability("metrics are not initialized".to_string())),
    }
}

pub(crate) fn record_backup_success(objects: usize, duration: Duration) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = BackupMetrics::global() {
        metrics.backups_total.inc();
        metrics.objects_captured_total.inc_by(objects as f64);
        metrics.backup_duration_seconds.observe(duration.as_secs_f64());
    }
    #[cfg(not(feature = "metrics"))]
    let _ = (objects, duration);
}

pub(crate) fn record_backup_failure() {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = BackupMetrics::global() {
        metrics.backup_failures_total.inc();
    }
}

pub(crate) fn record_objects_applied(count: usize) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = BackupMetrics::global() {
        metrics.objects_applied_total.inc_by(count as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

pub(crate) fn record_archives_pruned(count: usize) {
    #[cfg(feature = "metrics")]
    if let Some(metrics) = BackupMetrics::global() {
        metrics.archives_pruned_total.inc_by(count as f64);
    }
    #[cfg(not(feature = "metrics"))]
    let _ = count;
}

/// Initialize the global tracing subscriber
///
/// Log output goes to stderr, as JSON lines when `json` is set and as
/// compact text otherwise. The filter comes from `RUST_LOG`, defaulting to
/// [`DEFAULT_LOG_DIRECTIVE`].
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    BackupMetrics::global();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));
    let registry = TracingRegistry::default().with(filter);

    let installed = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false)
            .with_writer(std::io::stderr);
        set_global_default(registry.with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr);
        set_global_default(registry.with(fmt_layer))
    };
    installed.map_err(|e| {
        BackupError::Observability(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("Cluster backup observability initialized");
    Ok(())
}
