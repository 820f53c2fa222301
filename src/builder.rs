use super::collector::{self, Collector};
use super::histogram::{DEFAULT_EPSILON, MIN_EPSILON};
use super::sink::{FileSink, FlushSummary, Flusher};
use super::task::{ScheduledTask, Work};
use super::Error;
use futures::FutureExt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const DEFAULT_AGGREGATION_PERIOD: &str = "1m";
const DEFAULT_PROTOCOL: &str = "https";

/// Where flushed events go
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SinkConfig {
    File {
        path: PathBuf,
    },
    CloudWatch {
        log_group_name: String,
        log_stream_name: String,
        /// Full endpoint URL, scheme included
        endpoint_url: Option<String>,
    },
}

/// Validated configuration, see [Builder::build]
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub sink: SinkConfig,
    pub aggregation_period: Duration,
    pub histogram_epsilon: f64,
    pub send_timeout: Duration,
}

/// Builder for the EMF aggregator
///
/// Exactly one sink must be configured, either [Builder::output_path] or the
/// [Builder::log_group_name] / [Builder::log_stream_name] pair
///
/// # Example
/// ```no_run
/// # async fn demo() -> Result<(), emf_aggregator::Error> {
/// let aggregator = emf_aggregator::Builder::new()
///     .output_path("/var/log/metrics.json")
///     .aggregation_period("30s")
///     .init()
///     .await?;
///
/// aggregator.collector().ingest_records(&[]).await;
/// aggregator.shutdown().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, Default)]
pub struct Builder {
    output_path: Option<PathBuf>,
    log_group_name: Option<String>,
    log_stream_name: Option<String>,
    endpoint: Option<String>,
    protocol: Option<String>,
    aggregation_period: Option<String>,
    histogram_epsilon: Option<f64>,
    send_timeout: Option<Duration>,
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append aggregated events to a local file as newline delimited JSON
    pub fn output_path(self, path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: Some(path.into()),
            ..self
        }
    }

    /// Send aggregated events to this CloudWatch Logs group
    /// * Requires [Builder::log_stream_name]
    pub fn log_group_name(self, name: impl Into<String>) -> Self {
        Self {
            log_group_name: Some(name.into()),
            ..self
        }
    }

    /// The CloudWatch Logs stream, created when the aggregator starts
    pub fn log_stream_name(self, name: impl Into<String>) -> Self {
        Self {
            log_stream_name: Some(name.into()),
            ..self
        }
    }

    /// Host (and optional port) of a non default CloudWatch Logs endpoint
    pub fn endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..self
        }
    }

    /// Scheme used with [Builder::endpoint], `https` when unset
    pub fn protocol(self, protocol: impl Into<String>) -> Self {
        Self {
            protocol: Some(protocol.into()),
            ..self
        }
    }

    /// Length of an aggregation window as a duration string such as `1m` or `30s`
    /// * Defaults to `1m`
    pub fn aggregation_period(self, period: impl Into<String>) -> Self {
        Self {
            aggregation_period: Some(period.into()),
            ..self
        }
    }

    /// Relative error of the histogram buckets used for metrics with many distinct values
    /// * Defaults to 0.1, must be finite and at least [MIN_EPSILON]
    pub fn histogram_epsilon(self, epsilon: f64) -> Self {
        Self {
            histogram_epsilon: Some(epsilon),
            ..self
        }
    }

    /// Upper bound on each CloudWatch Logs call
    /// * Defaults to 30 seconds
    pub fn send_timeout(self, timeout: Duration) -> Self {
        Self {
            send_timeout: Some(timeout),
            ..self
        }
    }

    /// Validate the settings without starting anything
    pub fn build(self) -> Result<Config, Error> {
        let cloudwatch = match (self.log_group_name, self.log_stream_name) {
            (Some(log_group_name), Some(log_stream_name)) => Some((log_group_name, log_stream_name)),
            (Some(_), None) => return Err(Error::BuilderIncomplete("log_stream_name missing".into())),
            (None, Some(_)) => return Err(Error::BuilderIncomplete("log_group_name missing".into())),
            (None, None) => None,
        };

        let sink = match (self.output_path, cloudwatch) {
            (Some(path), None) => SinkConfig::File { path },
            (None, Some((log_group_name, log_stream_name))) => SinkConfig::CloudWatch {
                log_group_name,
                log_stream_name,
                endpoint_url: self.endpoint.map(|endpoint| {
                    let protocol = self.protocol.as_deref().unwrap_or(DEFAULT_PROTOCOL);
                    format!("{protocol}://{endpoint}")
                }),
            },
            (Some(_), Some(_)) => {
                return Err(Error::InvalidConfig(
                    "output_path and log_group_name are mutually exclusive".into(),
                ))
            }
            (None, None) => {
                return Err(Error::BuilderIncomplete(
                    "one of output_path or log_group_name/log_stream_name is required".into(),
                ))
            }
        };

        let period = self.aggregation_period.as_deref().unwrap_or(DEFAULT_AGGREGATION_PERIOD);
        let aggregation_period = humantime::parse_duration(period)
            .map_err(|err| Error::InvalidConfig(format!("aggregation_period {period:?}: {err}")))?;
        if aggregation_period.is_zero() {
            return Err(Error::InvalidConfig("aggregation_period must be greater than zero".into()));
        }

        let histogram_epsilon = self.histogram_epsilon.unwrap_or(DEFAULT_EPSILON);
        if !histogram_epsilon.is_finite() || histogram_epsilon < MIN_EPSILON {
            return Err(Error::InvalidConfig(format!(
                "histogram_epsilon must be a finite number of at least {MIN_EPSILON}, got {histogram_epsilon}"
            )));
        }

        Ok(Config {
            sink,
            aggregation_period,
            histogram_epsilon,
            send_timeout: self.send_timeout.unwrap_or(crate::sink::cloudwatch::DEFAULT_SEND_TIMEOUT),
        })
    }

    /// Open the configured sink, then start the collector and its flush schedule
    ///
    /// Must be called from within a tokio runtime
    pub async fn init(self) -> Result<Aggregator, Error> {
        let config = self.build()?;
        let flusher = open_sink(&config).await?;
        Ok(Aggregator::start(config, flusher))
    }

    /// Like [Builder::init] but delivering to `flusher` instead of the configured sink
    ///
    /// The sink settings are still validated. Must be called from within a tokio runtime
    pub fn init_with_flusher(self, flusher: impl Flusher + 'static) -> Result<Aggregator, Error> {
        let config = self.build()?;
        Ok(Aggregator::start(config, Box::new(flusher)))
    }
}

async fn open_sink(config: &Config) -> Result<Box<dyn Flusher>, Error> {
    match &config.sink {
        SinkConfig::File { path } => {
            info!(path = %path.display(), "writing aggregated metrics to file");
            Ok(Box::new(FileSink::open(path)?))
        }
        #[cfg(feature = "cloudwatch")]
        SinkConfig::CloudWatch {
            log_group_name,
            log_stream_name,
            endpoint_url,
        } => {
            info!(%log_group_name, %log_stream_name, "sending aggregated metrics to CloudWatch Logs");
            let sink = crate::sink::CloudWatchSink::connect(
                log_group_name.as_str(),
                log_stream_name.as_str(),
                endpoint_url.clone(),
                config.send_timeout,
            )
            .await?;
            Ok(Box::new(sink))
        }
        #[cfg(not(feature = "cloudwatch"))]
        SinkConfig::CloudWatch { .. } => Err(Error::InvalidConfig(
            "CloudWatch Logs support requires the cloudwatch feature".into(),
        )),
    }
}

/// A running aggregator: the shared [Collector] plus its flush schedule
pub struct Aggregator {
    collector: Arc<Collector>,
    task: ScheduledTask,
}

impl Aggregator {
    fn start(config: Config, flusher: Box<dyn Flusher>) -> Self {
        let collector = Arc::new(Collector::new(
            collector::Config {
                histogram_epsilon: config.histogram_epsilon,
            },
            flusher,
        ));

        let work: Work = {
            let collector = collector.clone();
            Arc::new(move || {
                let collector = collector.clone();
                async move { collector.flush().await.map(|_| ()) }.boxed()
            })
        };

        let mut task = ScheduledTask::new(config.aggregation_period, work);
        task.start();

        Self { collector, task }
    }

    /// The shared collector, for ingestion from any number of callers
    pub fn collector(&self) -> &Arc<Collector> {
        &self.collector
    }

    /// Flush now, outside the schedule
    pub async fn flush(&self) -> Result<FlushSummary, Error> {
        self.collector.flush().await
    }

    /// Stop the schedule, wait for any flush in progress, then flush what is left
    pub async fn shutdown(mut self) -> Result<FlushSummary, Error> {
        self.task.join().await;
        info!("aggregator stopped, flushing remaining metrics");
        self.collector.flush().await
    }
}
