//! Metric sources feeding the evaluator.

use std::fmt;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One observed metric value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// Metric name, e.g. `CPU Usage`.
    pub metric_name: String,
    /// Metric category, e.g. `System`.
    pub metric_category: String,
    /// Observed value.
    pub value: f64,
}

impl MetricSample {
    /// Creates a sample.
    pub fn new(
        metric_name: impl Into<String>,
        metric_category: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            metric_name: metric_name.into(),
            metric_category: metric_category.into(),
            value,
        }
    }
}

impl fmt::Display for MetricSample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}={}",
            self.metric_category, self.metric_name, self.value
        )
    }
}

/// Produces the current value of every metric it knows about.
pub trait MetricSource: Send + Sync + fmt::Debug {
    /// Collects current samples.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::MetricSource` if collection fails.
    fn collect(&self) -> Result<Vec<MetricSample>>;
}

/// A source returning a fixed, replaceable set of samples.
#[derive(Debug, Default)]
pub struct StaticMetricSource {
    samples: RwLock<Vec<MetricSample>>,
}

impl StaticMetricSource {
    /// Creates a source with the given samples.
    #[must_use]
    pub fn new(samples: Vec<MetricSample>) -> Self {
        Self {
            samples: RwLock::new(samples),
        }
    }

    /// Replaces the samples returned by later collections.
    pub fn set(&self, samples: Vec<MetricSample>) {
        *self.samples.write() = samples;
    }

    /// Sets the value of one metric, adding it if missing.
    pub fn set_value(&self, metric_name: &str, metric_category: &str, value: f64) {
        let mut samples = self.samples.write();
        match samples
            .iter_mut()
            .find(|s| s.metric_name == metric_name && s.metric_category == metric_category)
        {
            Some(sample) => sample.value = value,
            None => samples.push(MetricSample::new(metric_name, metric_category, value)),
        }
    }
}

impl MetricSource for StaticMetricSource {
    fn collect(&self) -> Result<Vec<MetricSample>> {
        Ok(self.samples.read().clone())
    }
}
