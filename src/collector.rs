//! # Collector
//!
//! The aggregation window: records grouped by dimension fingerprint, folded into one
//! [MetricAggregator] per metric and reduced into one [OutputEvent] per group on flush.

use crate::aggregator::MetricAggregator;
use crate::emf::{AwsMetadata, OutputEvent};
use crate::histogram::DEFAULT_EPSILON;
use crate::record::{self, EmfMetric};
use crate::sink::{FlushSummary, Flusher};
use crate::Error;
use fnv::FnvHasher;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Collector settings, derived from [Builder](super::Builder)
#[derive(Clone, Debug)]
pub struct Config {
    /// Relative error of the histogram used for high cardinality metrics
    pub histogram_epsilon: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            histogram_epsilon: DEFAULT_EPSILON,
        }
    }
}

/// Everything known about one dimension group during the current window
struct Group {
    aws: AwsMetadata,
    dimensions: BTreeMap<String, String>,
    metrics: HashMap<String, MetricAggregator>,
}

impl Group {
    fn new(metric: &EmfMetric) -> Self {
        Self {
            aws: metric.aws.clone(),
            dimensions: metric.dimensions.clone(),
            metrics: HashMap::new(),
        }
    }

    fn absorb(&mut self, metric: EmfMetric) {
        for (name, sample) in metric.metric_data {
            let aggregator = self
                .metrics
                .entry(name)
                .or_insert_with(|| MetricAggregator::for_sample(&sample));
            if let Err(err) = aggregator.add(&sample) {
                warn!("dropping sample that does not fit its aggregator: {err}");
                metrics::counter!("emf_aggregator_metric_values_dropped").increment(1);
            }
        }
    }

    fn reduce(&self, epsilon: f64) -> Option<OutputEvent> {
        let values: BTreeMap<_, _> = self
            .metrics
            .iter()
            .filter_map(|(name, aggregator)| {
                let value = aggregator.reduce(epsilon)?.into_output()?;
                Some((name.clone(), value))
            })
            .collect();

        if values.is_empty() {
            return None;
        }

        Some(OutputEvent {
            aws: self.aws.clone(),
            dimensions: self.dimensions.clone(),
            values,
        })
    }
}

/// Window state, lives within the lock
#[derive(Default)]
struct CollectorState {
    groups: HashMap<u64, Group>,
}

impl CollectorState {
    fn ingest(&mut self, metric: EmfMetric) {
        let fingerprint = dimension_fingerprint(&metric.dimensions);

        match self.groups.get_mut(&fingerprint) {
            Some(group) => {
                group.aws.merge(&metric.aws);
                for (name, value) in &metric.dimensions {
                    if !group.dimensions.contains_key(name) {
                        group.dimensions.insert(name.clone(), value.clone());
                    }
                }
                group.absorb(metric);
            }
            None => {
                let mut group = Group::new(&metric);
                group.absorb(metric);
                self.groups.insert(fingerprint, group);
            }
        }
    }
}

/// The aggregation engine
///
/// Shared between any number of ingesting callers and the scheduled flush. Ingestion takes the
/// write lock once per batch, a flush holds it from reduction until the sink has answered.
///
/// # Example
/// ```no_run
/// # async fn demo() -> Result<(), emf_aggregator::Error> {
/// use emf_aggregator::{collector, sink::FileSink, Collector};
/// use serde_json::json;
///
/// let collector = Collector::new(collector::Config::default(), Box::new(FileSink::open("metrics.json")?));
/// collector
///     .ingest_records(&[json!({
///         "_aws": {
///             "Timestamp": 1700000000000i64,
///             "CloudWatchMetrics": [{"Namespace": "App", "Dimensions": [["Service"]], "Metrics": [{"Name": "Latency"}]}]
///         },
///         "Service": "api",
///         "Latency": 42.0
///     })])
///     .await;
/// collector.flush().await?;
/// # Ok(())
/// # }
/// ```
pub struct Collector {
    state: RwLock<CollectorState>,
    flusher: Box<dyn Flusher>,
    pub config: Config,
}

impl Collector {
    pub fn new(config: Config, flusher: Box<dyn Flusher>) -> Self {
        Self {
            state: RwLock::new(CollectorState::default()),
            flusher,
            config,
        }
    }

    /// Fold one parsed record into the current window
    pub async fn ingest(&self, metric: EmfMetric) {
        self.ingest_batch(std::iter::once(metric)).await
    }

    /// Fold parsed records into the current window under a single acquisition of the lock
    pub async fn ingest_batch(&self, batch: impl IntoIterator<Item = EmfMetric>) {
        let mut state = self.state.write().await;
        let mut ingested = 0;
        for metric in batch {
            state.ingest(metric);
            ingested += 1;
        }
        drop(state);

        metrics::counter!("emf_aggregator_records_ingested").increment(ingested);
    }

    /// Parse and ingest raw records, rejected records are logged and skipped
    ///
    /// Returns the number of records ingested
    pub async fn ingest_records(&self, records: &[Value]) -> usize {
        let parsed = parse_records(records);
        let ingested = parsed.len();
        self.ingest_batch(parsed).await;
        ingested
    }

    /// [Collector::ingest_records] for synchronous host threads
    ///
    /// # Panics
    /// When called from within an asynchronous execution context
    pub fn ingest_records_blocking(&self, records: &[Value]) -> usize {
        let parsed = parse_records(records);
        let ingested = parsed.len();

        let mut state = self.state.blocking_write();
        for metric in parsed {
            state.ingest(metric);
        }
        drop(state);

        metrics::counter!("emf_aggregator_records_ingested").increment(ingested as u64);
        ingested
    }

    /// Number of dimension groups in the current window
    pub async fn group_count(&self) -> usize {
        self.state.read().await.groups.len()
    }

    /// Reduce the window and hand the events to the sink
    ///
    /// * An empty window never reaches the sink
    /// * The window is cleared only once the sink reports success, on failure it keeps
    ///   accumulating until the next flush
    pub async fn flush(&self) -> Result<FlushSummary, Error> {
        let mut state = self.state.write().await;

        if state.groups.is_empty() {
            debug!("nothing to flush");
            return Ok(FlushSummary::default());
        }

        let epsilon = self.config.histogram_epsilon;
        let mut events = Vec::with_capacity(state.groups.len());
        for (fingerprint, group) in &state.groups {
            match group.reduce(epsilon) {
                Some(event) => events.push(event),
                None => warn!(fingerprint, "dimension group has no metric values to emit"),
            }
        }

        if events.is_empty() {
            state.groups.clear();
            return Ok(FlushSummary::default());
        }

        match self.flusher.flush(&events).await {
            Ok(summary) => {
                state.groups.clear();
                metrics::counter!("emf_aggregator_flush_events").increment(summary.events_written);
                metrics::counter!("emf_aggregator_flush_bytes").increment(summary.bytes_written);
                info!(
                    events = summary.events_written,
                    bytes = summary.bytes_written,
                    "flushed aggregated metrics"
                );
                Ok(summary)
            }
            Err(err) => {
                metrics::counter!("emf_aggregator_flush_failures").increment(1);
                error!(groups = state.groups.len(), "flush failed, keeping window: {err}");
                Err(err)
            }
        }
    }
}

fn parse_records(records: &[Value]) -> Vec<EmfMetric> {
    records
        .iter()
        .filter_map(|record| match record::parse(record) {
            Ok(metric) => Some(metric),
            Err(err) => {
                error!("rejecting record: {err}");
                metrics::counter!("emf_aggregator_records_rejected").increment(1);
                None
            }
        })
        .collect()
}

/// Grouping key over the sorted `(name, value)` pairs of a record's dimensions
pub fn dimension_fingerprint<'a, I, K, V>(dimensions: I) -> u64
where
    I: IntoIterator<Item = (&'a K, &'a V)>,
    K: AsRef<str> + ?Sized + 'a,
    V: AsRef<str> + ?Sized + 'a,
{
    let mut pairs: Vec<(&str, &str)> = dimensions
        .into_iter()
        .map(|(name, value)| (name.as_ref(), value.as_ref()))
        .collect();
    pairs.sort_unstable();

    let mut hasher = FnvHasher::default();
    for (name, value) in pairs {
        hasher.write(name.as_bytes());
        hasher.write_u8(0xff);
        hasher.write(value.as_bytes());
        hasher.write_u8(0xfe);
    }
    hasher.finish()
}
