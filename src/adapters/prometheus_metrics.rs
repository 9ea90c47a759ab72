//! Prometheus-backed metrics sink.
//!
//! Metric families are registered on first use. The label names seen on that
//! first call fix the family's schema; later calls with a different label set
//! are logged and dropped.

use std::collections::HashMap;

use parking_lot::Mutex;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use tracing::warn;

use crate::domain::error::TradebotError;
use crate::ports::metrics_port::MetricsSink;

pub struct PrometheusMetrics {
    registry: Registry,
    counters: Mutex<HashMap<String, CounterVec>>,
    histograms: Mutex<HashMap<String, HistogramVec>>,
}

impl Default for PrometheusMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn split<'a>(labels: &[(&'a str, &'a str)]) -> (Vec<&'a str>, Vec<&'a str>) {
    labels.iter().copied().unzip()
}

impl PrometheusMetrics {
    pub fn new() -> Self {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Self {
        PrometheusMetrics {
            registry,
            counters: Mutex::new(HashMap::new()),
            histograms: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format of everything registered so far.
    pub fn render(&self) -> Result<String, TradebotError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(std::io::Error::other)?;
        String::from_utf8(buffer).map_err(|e| std::io::Error::other(e).into())
    }

    fn counter(&self, name: &str, label_names: &[&str]) -> Option<CounterVec> {
        let mut counters = self.counters.lock();
        if let Some(existing) = counters.get(name) {
            return Some(existing.clone());
        }
        let created = CounterVec::new(Opts::new(name, name.replace('_', " ")), label_names)
            .and_then(|c| self.registry.register(Box::new(c.clone())).map(|_| c));
        match created {
            Ok(c) => {
                counters.insert(name.to_string(), c.clone());
                Some(c)
            }
            Err(e) => {
                warn!(metric = name, error = %e, "cannot register counter");
                None
            }
        }
    }

    fn histogram(&self, name: &str, label_names: &[&str]) -> Option<HistogramVec> {
        let mut histograms = self.histograms.lock();
        if let Some(existing) = histograms.get(name) {
            return Some(existing.clone());
        }
        let created = HistogramVec::new(
            HistogramOpts::new(name, name.replace('_', " ")),
            label_names,
        )
        .and_then(|h| self.registry.register(Box::new(h.clone())).map(|_| h));
        match created {
            Ok(h) => {
                histograms.insert(name.to_string(), h.clone());
                Some(h)
            }
            Err(e) => {
                warn!(metric = name, error = %e, "cannot register histogram");
                None
            }
        }
    }
}

impl MetricsSink for PrometheusMetrics {
    fn increment_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let (names, values) = split(labels);
        let Some(family) = self.counter(name, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(counter) => counter.inc(),
            Err(e) => warn!(metric = name, error = %e, "counter labels rejected"),
        }
    }

    fn observe_histogram(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let (names, values) = split(labels);
        let Some(family) = self.histogram(name, &names) else {
            return;
        };
        match family.get_metric_with_label_values(&values) {
            Ok(histogram) => histogram.observe(value),
            Err(e) => warn!(metric = name, error = %e, "histogram labels rejected"),
        }
    }
}
