//! # Record
//!
//! Turns a loosely typed EMF document into an [EmfMetric]: the `_aws` metadata block plus
//! every top level field classified as a dimension value or a metric sample

use crate::emf::{AwsMetadata, MetricDefinition, ProjectionDefinition, AWS_KEY};
use crate::Error;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use tracing::warn;

/// Pre-reduced statistics for a sample with no discrete values
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Summary {
    pub min: f64,
    pub max: f64,
    pub sum: f64,
    pub count: u64,
}

/// A parsed metric sample
///
/// Bare numbers are normalized into a one element distribution
#[derive(Clone, Debug, PartialEq)]
pub enum MetricValue {
    /// Parallel `Values` / `Counts`, always the same non-zero length
    Distribution { values: Vec<f64>, counts: Vec<u64> },
    Summary(Summary),
}

impl MetricValue {
    pub fn scalar(value: f64) -> Self {
        Self::Distribution {
            values: vec![value],
            counts: vec![1],
        }
    }

    /// Summary statistics of the sample, computed for distributions
    pub fn summary(&self) -> Summary {
        match self {
            Self::Summary(summary) => *summary,
            Self::Distribution { values, counts } => values.iter().zip(counts).fold(
                Summary {
                    min: f64::MAX,
                    max: f64::MIN,
                    sum: 0.0,
                    count: 0,
                },
                |acc, (value, count)| Summary {
                    min: acc.min.min(*value),
                    max: acc.max.max(*value),
                    sum: acc.sum + value * *count as f64,
                    count: acc.count.saturating_add(*count),
                },
            ),
        }
    }
}

/// A record after parsing
#[derive(Clone, Debug, PartialEq)]
pub struct EmfMetric {
    pub aws: AwsMetadata,
    pub dimensions: BTreeMap<String, String>,
    pub metric_data: BTreeMap<String, MetricValue>,
}

impl TryFrom<&Value> for EmfMetric {
    type Error = Error;

    fn try_from(record: &Value) -> Result<Self, Self::Error> {
        parse(record)
    }
}

/// Parse one EMF document
///
/// * Fails with [Error::MalformedRecord] when `_aws`, its `Timestamp` or its
///   `CloudWatchMetrics` list is missing or of the wrong type
/// * A malformed projection, dimension set or metric declaration is skipped with a warning
/// * A metric field whose value has no valid shape is dropped with a warning
/// * Fields that are neither declared metrics nor declared dimensions are ignored
pub fn parse(record: &Value) -> Result<EmfMetric, Error> {
    let fields = record
        .as_object()
        .ok_or_else(|| Error::malformed(format!("record is not an object, was {record}")))?;

    let aws = fields
        .get(AWS_KEY)
        .ok_or_else(|| Error::malformed("no _aws metadata found in record"))?
        .as_object()
        .ok_or_else(|| Error::malformed("_aws metadata is not an object"))?;

    let timestamp = parse_timestamp(
        aws.get("Timestamp")
            .ok_or_else(|| Error::malformed("no Timestamp found in _aws metadata"))?,
    )?;

    let cloudwatch_metrics: Vec<ProjectionDefinition> = aws
        .get("CloudWatchMetrics")
        .ok_or_else(|| Error::malformed("no CloudWatchMetrics found in _aws metadata"))?
        .as_array()
        .ok_or_else(|| Error::malformed("CloudWatchMetrics is not an array"))?
        .iter()
        .filter_map(parse_projection)
        .collect();

    let (dimensions, metric_data) = classify_fields(fields, &cloudwatch_metrics);

    Ok(EmfMetric {
        aws: AwsMetadata {
            timestamp,
            cloudwatch_metrics,
        },
        dimensions,
        metric_data,
    })
}

/// Split the top level fields into dimension values and metric samples
///
/// Membership is decided against the names declared across every projection of the record
fn classify_fields(
    fields: &Map<String, Value>,
    projections: &[ProjectionDefinition],
) -> (BTreeMap<String, String>, BTreeMap<String, MetricValue>) {
    let dimension_names: HashSet<&str> = projections
        .iter()
        .flat_map(|p| p.dimensions.iter().flatten())
        .map(String::as_str)
        .collect();
    let metric_names: HashSet<&str> = projections
        .iter()
        .flat_map(|p| &p.metrics)
        .map(|m| m.name.as_str())
        .collect();

    let mut dimensions = BTreeMap::new();
    let mut metric_data = BTreeMap::new();

    for (name, value) in fields {
        if name == AWS_KEY {
            continue;
        }

        if metric_names.contains(name.as_str()) {
            match parse_metric_value(value) {
                Some(metric) => {
                    metric_data.insert(name.clone(), metric);
                }
                None => {
                    warn!(metric = %name, %value, "dropping invalid metric value");
                    metrics::counter!("emf_aggregator_metric_values_dropped").increment(1);
                }
            }
        } else if dimension_names.contains(name.as_str()) {
            dimensions.insert(name.clone(), dimension_value(value));
        }
    }

    (dimensions, metric_data)
}

/// Any integer representation is accepted, including floats with no fractional part
fn parse_timestamp(value: &Value) -> Result<i64, Error> {
    let Value::Number(number) = value else {
        return Err(Error::malformed(format!("Timestamp is not an integer, was {value}")));
    };

    number
        .as_i64()
        .or_else(|| number.as_u64().and_then(|t| i64::try_from(t).ok()))
        .or_else(|| {
            number
                .as_f64()
                .filter(|t| t.fract() == 0.0 && *t >= i64::MIN as f64 && *t <= i64::MAX as f64)
                .map(|t| t as i64)
        })
        .ok_or_else(|| Error::malformed(format!("Timestamp is not an integer, was {number}")))
}

fn parse_projection(value: &Value) -> Option<ProjectionDefinition> {
    let Some(definition) = value.as_object() else {
        warn!("skipping projection: not an object, was {value}");
        return None;
    };

    let Some(namespace) = definition.get("Namespace").and_then(Value::as_str) else {
        warn!("skipping projection: missing or non-string Namespace");
        return None;
    };

    let Some(dimension_sets) = definition.get("Dimensions").and_then(Value::as_array) else {
        warn!(namespace, "skipping projection: missing or non-array Dimensions");
        return None;
    };

    let Some(metric_declarations) = definition.get("Metrics").and_then(Value::as_array) else {
        warn!(namespace, "skipping projection: missing or non-array Metrics");
        return None;
    };

    let dimensions = dimension_sets
        .iter()
        .filter_map(|set| match set.as_array() {
            Some(names) => Some(
                names
                    .iter()
                    .filter_map(|name| match name.as_str() {
                        Some(name) => Some(name.to_owned()),
                        None => {
                            warn!(namespace, "skipping dimension: name is not a string, was {name}");
                            None
                        }
                    })
                    .collect(),
            ),
            None => {
                warn!(namespace, "skipping dimension set: not an array, was {set}");
                None
            }
        })
        .collect();

    let mut projection = ProjectionDefinition {
        namespace: namespace.to_owned(),
        dimensions,
        metrics: Vec::with_capacity(metric_declarations.len()),
    };
    let metrics: Vec<MetricDefinition> = metric_declarations
        .iter()
        .filter_map(|declaration| {
            let name = declaration.get("Name").and_then(Value::as_str);
            match name {
                Some(name) => Some(MetricDefinition {
                    name: name.to_owned(),
                    unit: declaration.get("Unit").and_then(Value::as_str).map(str::to_owned),
                }),
                None => {
                    warn!(namespace, "skipping metric declaration without a string Name: {declaration}");
                    None
                }
            }
        })
        .collect();
    projection.merge_metrics(&metrics);

    Some(projection)
}

/// Parse a metric field into one of the supported shapes
///
/// Returns `None` when the value is neither a number, a non-empty `Values`/`Counts` pair
/// of equal length, nor a complete summary (`Sum` may be omitted when `Min == Max`)
pub fn parse_metric_value(value: &Value) -> Option<MetricValue> {
    let Value::Object(fields) = value else {
        return to_f64(value).map(MetricValue::scalar);
    };

    let values = fields
        .get("Values")
        .and_then(Value::as_array)
        .and_then(|values| values.iter().map(to_f64).collect::<Option<Vec<f64>>>());
    let counts = fields
        .get("Counts")
        .and_then(Value::as_array)
        .and_then(|counts| counts.iter().map(to_count).collect::<Option<Vec<u64>>>());

    if let (Some(values), Some(counts)) = (values, counts) {
        if !values.is_empty() && values.len() == counts.len() {
            return Some(MetricValue::Distribution { values, counts });
        }
    }

    let min = fields.get("Min").and_then(to_f64);
    let max = fields.get("Max").and_then(to_f64);
    let sum = fields.get("Sum").and_then(to_f64);
    let count = fields.get("Count").and_then(to_count);

    match (min, max, sum, count) {
        (Some(min), Some(max), Some(sum), Some(count)) => Some(MetricValue::Summary(Summary { min, max, sum, count })),
        (Some(min), Some(max), None, Some(count)) if min == max => {
            let sum = min * count as f64;
            sum.is_finite().then_some(MetricValue::Summary(Summary { min, max, sum, count }))
        }
        _ => None,
    }
}

/// Finite numbers only; `"NaN"` and `"inf"` parse as floats but have no JSON form
fn to_f64(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v: &f64| v.is_finite())
}

fn to_count(value: &Value) -> Option<u64> {
    match value {
        Value::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().filter(|c| c.is_finite() && *c >= 0.0).map(|c| c as u64)),
        _ => to_f64(value).filter(|c| *c >= 0.0).map(|c| c as u64),
    }
}

fn dimension_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
