//! CloudWatch Logs delivery with `PutLogEvents` batching
//!
//! <https://docs.aws.amazon.com/AmazonCloudWatchLogs/latest/APIReference/API_PutLogEvents.html>

use super::{FlushSummary, Flusher};
use crate::emf::OutputEvent;
use crate::{BoxError, Error};
use futures::future::{BoxFuture, FutureExt};
use std::mem;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// Fixed overhead CloudWatch Logs charges on top of each message
pub const PER_EVENT_BYTES: usize = 26;
pub const MAX_BYTES_PER_PUT: usize = 1_048_576;
pub const MAX_EVENTS_PER_PUT: usize = 10_000;
pub const MAX_BYTES_PER_EVENT: usize = 256 * 1024;

/// Default limit on a single outbound call
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEvent {
    pub timestamp: i64,
    pub message: String,
}

/// The two CloudWatch Logs operations the sink needs, implemented for the AWS SDK client
pub trait CloudWatchLogs: Send + Sync {
    fn create_log_stream<'a>(
        &'a self,
        log_group_name: &'a str,
        log_stream_name: &'a str,
    ) -> BoxFuture<'a, Result<(), BoxError>>;

    fn put_log_events<'a>(
        &'a self,
        log_group_name: &'a str,
        log_stream_name: &'a str,
        events: Vec<LogEvent>,
    ) -> BoxFuture<'a, Result<(), BoxError>>;
}

pub struct CloudWatchSink<C> {
    client: C,
    log_group_name: String,
    log_stream_name: String,
    send_timeout: Duration,
}

impl<C: CloudWatchLogs> CloudWatchSink<C> {
    /// Creates the log stream; failing to do so fails construction
    pub async fn new(
        client: C,
        log_group_name: impl Into<String>,
        log_stream_name: impl Into<String>,
        send_timeout: Duration,
    ) -> Result<Self, Error> {
        let log_group_name = log_group_name.into();
        let log_stream_name = log_stream_name.into();

        client
            .create_log_stream(&log_group_name, &log_stream_name)
            .await
            .map_err(Error::Sink)?;

        Ok(Self {
            client,
            log_group_name,
            log_stream_name,
            send_timeout,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    async fn send_batch(&self, batch: Vec<LogEvent>) -> Result<FlushSummary, Error> {
        let summary = FlushSummary {
            bytes_written: batch.iter().map(|event| event.message.len() as u64).sum(),
            events_written: batch.len() as u64,
        };

        let put = self
            .client
            .put_log_events(&self.log_group_name, &self.log_stream_name, batch);
        match tokio::time::timeout(self.send_timeout, put).await {
            Ok(Ok(())) => Ok(summary),
            Ok(Err(err)) => Err(Error::Sink(err)),
            Err(_) => Err(Error::Sink(
                format!("PutLogEvents timed out after {:?}", self.send_timeout).into(),
            )),
        }
    }

    async fn send_events(&self, events: &[OutputEvent]) -> Result<FlushSummary, Error> {
        let messages = events
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()?;

        let mut total = FlushSummary::default();
        for batch in pack_batches(messages, now_millis()) {
            match self.send_batch(batch).await {
                Ok(summary) => total += summary,
                Err(err) => {
                    warn!(
                        bytes_sent = total.bytes_written,
                        events_sent = total.events_written,
                        "PutLogEvents failed part way through a flush"
                    );
                    return Err(err);
                }
            }
        }

        debug!(
            log_group = %self.log_group_name,
            log_stream = %self.log_stream_name,
            bytes = total.bytes_written,
            events = total.events_written,
            "sent events to CloudWatch Logs"
        );
        Ok(total)
    }
}

impl<C: CloudWatchLogs> Flusher for CloudWatchSink<C> {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>> {
        self.send_events(events).boxed()
    }
}

/// Pack messages into as few `PutLogEvents` batches as the service limits allow
///
/// * A batch holds at most [MAX_EVENTS_PER_PUT] events and [MAX_BYTES_PER_PUT] bytes, each
///   message costing its length plus [PER_EVENT_BYTES]
/// * A message over [MAX_BYTES_PER_EVENT] is dropped, never split
pub fn pack_batches(messages: impl IntoIterator<Item = String>, timestamp: i64) -> Vec<Vec<LogEvent>> {
    let mut batches = Vec::new();
    let mut batch = Vec::new();
    let mut batch_size = 0;

    for message in messages {
        let size = message.len() + PER_EVENT_BYTES;
        if size > MAX_BYTES_PER_EVENT {
            warn!(size = message.len(), "dropping event that is too large to send");
            metrics::counter!("emf_aggregator_events_dropped").increment(1);
            continue;
        }

        if batch_size + size > MAX_BYTES_PER_PUT || batch.len() == MAX_EVENTS_PER_PUT {
            batches.push(mem::take(&mut batch));
            batch_size = 0;
        }

        batch.push(LogEvent { timestamp, message });
        batch_size += size;
    }

    if !batch.is_empty() {
        batches.push(batch);
    }
    batches
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or_default()
}

#[cfg(feature = "cloudwatch")]
mod aws {
    use super::*;
    use aws_sdk_cloudwatchlogs::{error::DisplayErrorContext, types::InputLogEvent, Client};

    impl CloudWatchLogs for Client {
        fn create_log_stream<'a>(
            &'a self,
            log_group_name: &'a str,
            log_stream_name: &'a str,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            let request = self
                .create_log_stream()
                .log_group_name(log_group_name)
                .log_stream_name(log_stream_name);
            async move {
                request
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| BoxError::from(DisplayErrorContext(&err).to_string()))
            }
            .boxed()
        }

        fn put_log_events<'a>(
            &'a self,
            log_group_name: &'a str,
            log_stream_name: &'a str,
            events: Vec<LogEvent>,
        ) -> BoxFuture<'a, Result<(), BoxError>> {
            let request = self
                .put_log_events()
                .log_group_name(log_group_name)
                .log_stream_name(log_stream_name);
            async move {
                let events = events
                    .into_iter()
                    .map(|event| {
                        InputLogEvent::builder()
                            .timestamp(event.timestamp)
                            .message(event.message)
                            .build()
                    })
                    .collect::<Result<Vec<_>, _>>()?;

                request
                    .set_log_events(Some(events))
                    .send()
                    .await
                    .map(|_| ())
                    .map_err(|err| BoxError::from(DisplayErrorContext(&err).to_string()))
            }
            .boxed()
        }
    }

    impl CloudWatchSink<Client> {
        /// Build a client from the ambient AWS configuration, optionally pointed at a custom
        /// endpoint URL, and create the log stream
        pub async fn connect(
            log_group_name: impl Into<String>,
            log_stream_name: impl Into<String>,
            endpoint_url: Option<String>,
            send_timeout: Duration,
        ) -> Result<Self, Error> {
            let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
            if let Some(endpoint_url) = endpoint_url {
                loader = loader.endpoint_url(endpoint_url);
            }
            let config = loader.load().await;

            Self::new(Client::new(&config), log_group_name, log_stream_name, send_timeout).await
        }
    }
}
