//! Operation metrics: sliding windows with thresholds, exported to Prometheus.

use std::collections::VecDeque;
use std::time::Duration;

use dashmap::DashMap;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::time::Instant;

use bastion_core::{
    config::MetricsConfig,
    traits::MetricsRecorder,
    types::{MetricOutcome, MetricSample, MetricSnapshot, ThresholdBreach},
    Error, Result,
};

/// Initialize Prometheus recorder and return the handle.
pub fn setup_metrics_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| Error::configuration(format!("Failed to install Prometheus recorder: {}", e)))?;

    tracing::info!("Prometheus metrics recorder initialized");
    Ok(handle)
}

/// Forward one sample to the global `metrics` recorder.
pub fn track_operation(sample: &MetricSample) {
    metrics::counter!(
        "bastion_operations_total",
        "operation_type" => sample.operation_type.clone(),
        "outcome" => sample.outcome.as_str()
    )
    .increment(1);

    metrics::histogram!(
        "bastion_operation_duration_ms",
        "operation_type" => sample.operation_type.clone()
    )
    .record(sample.duration_ms as f64);
}

#[derive(Default)]
struct TypeWindow {
    samples: VecDeque<(Instant, u64, MetricOutcome)>,
    breached: bool,
}

impl TypeWindow {
    fn prune(&mut self, window: Duration) {
        while let Some((at, _, _)) = self.samples.front() {
            if at.elapsed() < window {
                break;
            }
            self.samples.pop_front();
        }
    }

    fn snapshot(&self) -> MetricSnapshot {
        let samples = self.samples.len();
        if samples == 0 {
            return MetricSnapshot::default();
        }
        let total: u64 = self.samples.iter().map(|(_, d, _)| *d).sum();
        MetricSnapshot {
            samples,
            failures: self
                .samples
                .iter()
                .filter(|(_, _, o)| *o == MetricOutcome::Failure)
                .count(),
            avg_duration_ms: total as f64 / samples as f64,
            max_duration_ms: self.samples.iter().map(|(_, d, _)| *d).max().unwrap_or(0),
        }
    }
}

/// Sliding-window [`MetricsRecorder`] keyed by operation type.
///
/// Thresholds are evaluated only once a window holds `min_samples`. A breach
/// is reported when a type enters the breached state and not again until it
/// has recovered.
pub struct WindowedMetricsRecorder {
    config: MetricsConfig,
    windows: DashMap<String, TypeWindow>,
}

impl WindowedMetricsRecorder {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.config.window_secs)
    }

    fn exceeded(&self, snapshot: &MetricSnapshot) -> Vec<String> {
        let mut exceeded = Vec::new();
        if snapshot.samples < self.config.min_samples {
            return exceeded;
        }
        if let Some(max) = self.config.max_avg_duration_ms {
            if snapshot.avg_duration_ms > max as f64 {
                exceeded.push("avg_duration_ms".to_string());
            }
        }
        if let Some(max) = self.config.max_failure_rate {
            if snapshot.failure_rate() > max {
                exceeded.push("failure_rate".to_string());
            }
        }
        exceeded
    }
}

impl Default for WindowedMetricsRecorder {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsRecorder for WindowedMetricsRecorder {
    fn record(&self, sample: &MetricSample) -> Option<ThresholdBreach> {
        track_operation(sample);

        let window = self.window();
        let mut entry = self.windows.entry(sample.operation_type.clone()).or_default();
        entry.samples.push_back((Instant::now(), sample.duration_ms, sample.outcome));
        entry.prune(window);

        let snapshot = entry.snapshot();
        let exceeded = self.exceeded(&snapshot);
        let now_breached = !exceeded.is_empty();
        let entered = now_breached && !entry.breached;
        entry.breached = now_breached;

        if !entered {
            return None;
        }
        tracing::warn!(
            operation_type = %sample.operation_type,
            exceeded = ?exceeded,
            avg_duration_ms = snapshot.avg_duration_ms,
            failure_rate = snapshot.failure_rate(),
            "Metrics threshold breached"
        );
        Some(ThresholdBreach {
            operation_type: sample.operation_type.clone(),
            snapshot,
            exceeded,
        })
    }

    fn exceeds_threshold(&self, operation_type: &str) -> bool {
        !self.exceeded(&self.snapshot(operation_type)).is_empty()
    }

    fn snapshot(&self, operation_type: &str) -> MetricSnapshot {
        let window = self.window();
        match self.windows.get_mut(operation_type) {
            Some(mut entry) => {
                entry.prune(window);
                entry.snapshot()
            }
            None => MetricSnapshot::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recorder(min_samples: usize) -> WindowedMetricsRecorder {
        WindowedMetricsRecorder::new(MetricsConfig {
            window_secs: 60,
            min_samples,
            max_avg_duration_ms: Some(100),
            max_failure_rate: Some(0.5),
            prometheus: false,
        })
    }

    fn sample(duration_ms: u64, outcome: MetricOutcome) -> MetricSample {
        MetricSample::new("report.build", duration_ms, outcome)
    }

    #[test]
    fn test_snapshot_aggregates() {
        let r = recorder(1);
        r.record(&sample(10, MetricOutcome::Success));
        r.record(&sample(30, MetricOutcome::Failure));

        let snap = r.snapshot("report.build");
        assert_eq!(snap.samples, 2);
        assert_eq!(snap.failures, 1);
        assert_eq!(snap.avg_duration_ms, 20.0);
        assert_eq!(snap.max_duration_ms, 30);
        assert_eq!(r.snapshot("unknown"), MetricSnapshot::default());
    }

    #[test]
    fn test_breach_is_edge_triggered() {
        let r = recorder(2);
        assert!(r.record(&sample(500, MetricOutcome::Success)).is_none(), "below min_samples");

        let breach = r.record(&sample(500, MetricOutcome::Success)).expect("breach on entering");
        assert_eq!(breach.exceeded, vec!["avg_duration_ms".to_string()]);
        assert!(r.exceeds_threshold("report.build"));

        assert!(r.record(&sample(500, MetricOutcome::Success)).is_none(), "still breached");
    }

    #[test]
    fn test_recovery_rearms_breach() {
        let r = recorder(1);
        assert!(r.record(&sample(10, MetricOutcome::Failure)).is_some());
        // A rate of exactly 0.5 is not above the threshold.
        assert!(r.record(&sample(10, MetricOutcome::Success)).is_none());
        assert!(r.record(&sample(10, MetricOutcome::Success)).is_none());
        assert!(!r.exceeds_threshold("report.build"));

        assert!(r.record(&sample(10, MetricOutcome::Failure)).is_none());
        assert!(r.record(&sample(10, MetricOutcome::Failure)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_expiry() {
        let r = recorder(1);
        r.record(&sample(10, MetricOutcome::Success));
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(r.snapshot("report.build").samples, 0);
    }
}
