//! # Aggregator
//!
//! Per metric accumulation of the samples seen during one window. The variant is chosen from
//! the first sample of a metric and kept for the rest of the window.

use crate::emf::OutputValue;
use crate::histogram::ExponentialHistogram;
use crate::record::{MetricValue, Summary};
use crate::Error;
use ordered_float::NotNan;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::debug;

/// Above this many distinct values a window is summarized with an [ExponentialHistogram]
const MAX_EXACT_VALUES: usize = 2;

/// Final statistics of one metric for one window
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MetricStats {
    #[serde(rename = "Values", skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<f64>,
    #[serde(rename = "Counts", skip_serializing_if = "Vec::is_empty")]
    pub counts: Vec<u64>,
    #[serde(rename = "Min")]
    pub min: f64,
    #[serde(rename = "Max")]
    pub max: f64,
    #[serde(rename = "Sum")]
    pub sum: f64,
    #[serde(rename = "Count")]
    pub count: u64,
    /// Exact number of distinct values observed, 0 when the variant cannot know
    #[serde(skip)]
    pub distinct: usize,
}

impl MetricStats {
    /// The field to emit, a bare number when the window saw a single distinct value
    pub fn into_output(self) -> Option<OutputValue> {
        if self.count == 0 {
            return None;
        }
        if self.distinct == 1 {
            return Some(OutputValue::Scalar(self.min));
        }
        Some(OutputValue::Stats(self))
    }
}

#[derive(Clone, Debug)]
pub enum MetricAggregator {
    Exact(ExactAggregator),
    Rate(RateAggregator),
}

impl MetricAggregator {
    /// Choose the variant from the first sample of a metric
    ///
    /// Distributions and single valued summaries are tracked exactly, any other summary
    /// can only be accumulated as a rate
    pub fn for_sample(sample: &MetricValue) -> Self {
        match sample {
            MetricValue::Distribution { .. } => Self::Exact(ExactAggregator::default()),
            MetricValue::Summary(summary) if summary.min == summary.max => Self::Exact(ExactAggregator::default()),
            MetricValue::Summary(_) => Self::Rate(RateAggregator::default()),
        }
    }

    pub fn add(&mut self, sample: &MetricValue) -> Result<(), Error> {
        match self {
            Self::Exact(exact) => exact.add(sample),
            Self::Rate(rate) => {
                rate.add(&sample.summary());
                Ok(())
            }
        }
    }

    /// `None` when nothing was recorded; a rate aggregator reports zeroed stats instead so
    /// callers must check [MetricStats::count]
    pub fn reduce(&self, epsilon: f64) -> Option<MetricStats> {
        match self {
            Self::Exact(exact) => exact.reduce(epsilon),
            Self::Rate(rate) => Some(rate.reduce()),
        }
    }
}

/// Exact value → count tracking, summarized by a histogram past [MAX_EXACT_VALUES]
#[derive(Clone, Debug, Default)]
pub struct ExactAggregator {
    values: BTreeMap<NotNan<f64>, u64>,
}

impl ExactAggregator {
    pub fn add(&mut self, sample: &MetricValue) -> Result<(), Error> {
        match sample {
            MetricValue::Distribution { values, counts } => {
                for (value, count) in values.iter().zip(counts) {
                    self.record(*value, *count);
                }
                Ok(())
            }
            MetricValue::Summary(summary) if summary.min == summary.max => {
                self.record(summary.min, summary.count);
                Ok(())
            }
            MetricValue::Summary(summary) => Err(Error::IncompatibleSample(format!(
                "summary with min {} and max {} has no discrete values",
                summary.min, summary.max
            ))),
        }
    }

    fn record(&mut self, value: f64, count: u64) {
        if count == 0 {
            return;
        }
        match NotNan::new(value) {
            Ok(key) if value.is_finite() => {
                let total = self.values.entry(key).or_default();
                *total = total.saturating_add(count);
            }
            _ => debug!(value, "ignoring non-finite sample"),
        }
    }

    pub fn distinct_values(&self) -> usize {
        self.values.len()
    }

    pub fn reduce(&self, epsilon: f64) -> Option<MetricStats> {
        let (min, max) = match (self.values.first_key_value(), self.values.last_key_value()) {
            (Some((min, _)), Some((max, _))) => (min.into_inner(), max.into_inner()),
            _ => return None,
        };

        if self.values.len() <= MAX_EXACT_VALUES {
            return Some(MetricStats {
                values: self.values.keys().map(|v| v.into_inner()).collect(),
                counts: self.values.values().copied().collect(),
                min,
                max,
                sum: self.values.iter().map(|(v, c)| v.into_inner() * *c as f64).sum(),
                count: self.values.values().fold(0, |total, count| total.saturating_add(*count)),
                distinct: self.values.len(),
            });
        }

        let mut histogram = ExponentialHistogram::new(epsilon);
        for (value, count) in &self.values {
            histogram.add(value.into_inner(), *count);
        }
        let (values, counts): (Vec<f64>, Vec<u64>) = histogram
            .non_empty_buckets()
            .into_iter()
            .map(|bucket| (bucket.value, bucket.count))
            .unzip();

        Some(MetricStats {
            values,
            counts,
            min: histogram.min().unwrap_or(min),
            max: histogram.max().unwrap_or(max),
            sum: histogram.sum(),
            count: histogram.count(),
            distinct: self.values.len(),
        })
    }
}

/// Sum / min / max / count accumulation for pre-reduced samples
#[derive(Clone, Debug)]
pub struct RateAggregator {
    sum: f64,
    min: f64,
    max: f64,
    count: u64,
}

impl Default for RateAggregator {
    fn default() -> Self {
        Self {
            sum: 0.0,
            min: f64::MAX,
            max: f64::MIN,
            count: 0,
        }
    }
}

impl RateAggregator {
    pub fn add(&mut self, sample: &Summary) {
        self.sum += sample.sum;
        self.count = self.count.saturating_add(sample.count);
        self.min = self.min.min(sample.min);
        self.max = self.max.max(sample.max);
    }

    pub fn reduce(&self) -> MetricStats {
        if self.count == 0 {
            return MetricStats::default();
        }
        MetricStats {
            values: Vec::new(),
            counts: Vec::new(),
            min: self.min,
            max: self.max,
            sum: self.sum,
            count: self.count,
            distinct: usize::from(self.count == 1),
        }
    }
}
