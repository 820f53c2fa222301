//! # EMF
//!
//! CloudWatch Embedded Metric Format shapes shared by the parser, the aggregation window
//! and the emitted events, serialized via serde_json
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatch/latest/monitoring/CloudWatch_Embedded_Metric_Format_Specification.html>

use crate::aggregator::MetricStats;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// Key of the metadata block in every EMF document
pub const AWS_KEY: &str = "_aws";

/// The `_aws` metadata envelope
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AwsMetadata {
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    #[serde(rename = "CloudWatchMetrics")]
    pub cloudwatch_metrics: Vec<ProjectionDefinition>,
}

/// One namespace + dimension sets + metric declarations view over a document
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ProjectionDefinition {
    #[serde(rename = "Namespace")]
    pub namespace: String,
    #[serde(rename = "Dimensions")]
    pub dimensions: Vec<Vec<String>>,
    #[serde(rename = "Metrics")]
    pub metrics: Vec<MetricDefinition>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct MetricDefinition {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Unit")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl AwsMetadata {
    /// Fold another record's metadata into this one
    ///
    /// * The timestamp becomes the earliest of the two, so the window reports when it started
    /// * Projections merge only when namespace and dimension sets both match, otherwise the
    ///   incoming projection is appended so no metric is emitted under a dimension grouping
    ///   it was not declared under
    pub fn merge(&mut self, incoming: &AwsMetadata) {
        self.timestamp = self.timestamp.min(incoming.timestamp);

        for projection in &incoming.cloudwatch_metrics {
            match self
                .cloudwatch_metrics
                .iter_mut()
                .find(|existing| existing.is_mergeable_with(projection))
            {
                Some(existing) => existing.merge_metrics(&projection.metrics),
                None => self.cloudwatch_metrics.push(projection.clone()),
            }
        }
    }
}

impl ProjectionDefinition {
    /// Dimension sets compared as a set of sorted name tuples
    fn dimension_sets(&self) -> BTreeSet<Vec<&str>> {
        self.dimensions
            .iter()
            .map(|set| {
                let mut names: Vec<&str> = set.iter().map(String::as_str).collect();
                names.sort_unstable();
                names
            })
            .collect()
    }

    fn is_mergeable_with(&self, other: &ProjectionDefinition) -> bool {
        self.namespace == other.namespace && self.dimension_sets() == other.dimension_sets()
    }

    /// Union of metric declarations, deduplicated on (name, unit)
    pub(crate) fn merge_metrics(&mut self, metrics: &[MetricDefinition]) {
        for metric in metrics {
            if !self.metrics.contains(metric) {
                self.metrics.push(metric.clone());
            }
        }
    }
}

/// A metric field in an emitted document
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutputValue {
    Scalar(f64),
    Stats(MetricStats),
}

/// One compacted document per dimension group per flush
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OutputEvent {
    #[serde(rename = "_aws")]
    pub aws: AwsMetadata,
    #[serde(flatten)]
    pub dimensions: BTreeMap<String, String>,
    #[serde(flatten)]
    pub values: BTreeMap<String, OutputValue>,
}
