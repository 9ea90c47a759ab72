//! Metrics sink port. Calls never fail and never block on I/O.

pub trait MetricsSink {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]);

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64);
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment_counter(&self, _name: &str, _labels: &[(&str, &str)]) {}

    fn observe_histogram(&self, _name: &str, _labels: &[(&str, &str)], _value: f64) {}
}
