//! Reconciliation Metrics
//!
//! Prometheus counters and per-class gauges, updated by the manager after
//! every pass and exposed by the API under `/metrics`.

use crate::error::{Error, Result};
use crate::manager::PassReport;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Metrics of the reconciliation loop, in their own registry
#[derive(Clone)]
pub struct ReconcileMetrics {
    registry: Registry,
    passes: IntCounter,
    failed_passes: IntCounter,
    devices_added: IntCounter,
    devices_removed: IntCounter,
    pass_duration: Histogram,
    class_utilization: IntGaugeVec,
    class_total_size: IntGaugeVec,
}

impl ReconcileMetrics {
    /// Create and register all metrics
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let passes = IntCounter::new(
            "autoscaler_reconcile_passes_total",
            "Number of reconciliation passes run",
        )
        .map_err(metrics_error)?;
        let failed_passes = IntCounter::new(
            "autoscaler_reconcile_failures_total",
            "Number of reconciliation passes that returned an error",
        )
        .map_err(metrics_error)?;
        let devices_added = IntCounter::new(
            "autoscaler_devices_added_total",
            "Number of devices added to the storage system",
        )
        .map_err(metrics_error)?;
        let devices_removed = IntCounter::new(
            "autoscaler_devices_removed_total",
            "Number of devices removed from the storage system",
        )
        .map_err(metrics_error)?;
        let pass_duration = Histogram::with_opts(HistogramOpts::new(
            "autoscaler_reconcile_duration_seconds",
            "Duration of reconciliation passes",
        ))
        .map_err(metrics_error)?;
        let class_utilization = IntGaugeVec::new(
            Opts::new(
                "autoscaler_class_utilization_percent",
                "Cluster utilization of a storage class",
            ),
            &["class"],
        )
        .map_err(metrics_error)?;
        let class_total_size = IntGaugeVec::new(
            Opts::new(
                "autoscaler_class_total_size_gb",
                "Total size of a storage class in GiB",
            ),
            &["class"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(passes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(failed_passes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(devices_added.clone())).map_err(metrics_error)?;
        registry.register(Box::new(devices_removed.clone())).map_err(metrics_error)?;
        registry.register(Box::new(pass_duration.clone())).map_err(metrics_error)?;
        registry.register(Box::new(class_utilization.clone())).map_err(metrics_error)?;
        registry.register(Box::new(class_total_size.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            passes,
            failed_passes,
            devices_added,
            devices_removed,
            pass_duration,
            class_utilization,
            class_total_size,
        })
    }

    /// Record the outcome of one pass
    pub fn observe_pass(&self, report: &PassReport) {
        self.passes.inc();
        if report.error.is_some() {
            self.failed_passes.inc();
        }
        self.pass_duration.observe(report.duration_ms as f64 / 1000.0);

        for outcome in &report.classes {
            self.devices_added.inc_by(outcome.devices_added as u64);
            self.devices_removed.inc_by(outcome.devices_removed as u64);
            self.class_utilization
                .with_label_values(&[outcome.class.as_str()])
                .set(outcome.utilization as i64);
            self.class_total_size
                .with_label_values(&[outcome.class.as_str()])
                .set(outcome.total_size_gb as i64);
        }
    }

    /// Number of passes recorded
    pub fn passes(&self) -> u64 {
        self.passes.get()
    }

    /// Number of failed passes recorded
    pub fn failed_passes(&self) -> u64 {
        self.failed_passes.get()
    }

    /// Render all metrics in the Prometheus text format
    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| Error::Internal(format!("metrics encoding: {}", e)))
    }
}

impl std::fmt::Debug for ReconcileMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconcileMetrics")
            .field("passes", &self.passes.get())
            .field("failed_passes", &self.failed_passes.get())
            .finish()
    }
}

fn metrics_error(e: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manager::{ClassOutcome, Decision};

    #[test]
    fn test_observe_and_render() {
        let metrics = ReconcileMetrics::new().unwrap();
        let report = PassReport {
            started_at: chrono::Utc::now(),
            duration_ms: 12,
            classes: vec![ClassOutcome {
                class: "gp2".into(),
                utilization: 80,
                total_size_gb: 32,
                decision: Decision::Add,
                devices_added: 1,
                devices_removed: 0,
                error: None,
            }],
            error: Some("boom".into()),
        };
        metrics.observe_pass(&report);

        assert_eq!(metrics.passes(), 1);
        assert_eq!(metrics.failed_passes(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("autoscaler_devices_added_total 1"));
        assert!(text.contains("autoscaler_class_utilization_percent{class=\"gp2\"} 80"));
        assert!(text.contains("autoscaler_class_total_size_gb{class=\"gp2\"} 32"));
    }
}
