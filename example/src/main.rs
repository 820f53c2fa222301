//! Reads EMF documents, one per line, from stdin and aggregates them
//!
//! ```sh
//! EMF_OUTPUT_PATH=/tmp/metrics.json EMF_AGGREGATION_PERIOD=10s RUST_LOG=info cargo run < records.jsonl
//! ```

use emf_aggregator::{Builder, Error};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

/// Records handed to the collector per lock acquisition, partial batches go in every second
const BATCH_SIZE: usize = 256;

fn builder_from_env() -> Builder {
    let mut builder = Builder::new();
    if let Ok(path) = std::env::var("EMF_OUTPUT_PATH") {
        builder = builder.output_path(path);
    }
    if let Ok(group) = std::env::var("EMF_LOG_GROUP_NAME") {
        builder = builder.log_group_name(group);
    }
    if let Ok(stream) = std::env::var("EMF_LOG_STREAM_NAME") {
        builder = builder.log_stream_name(stream);
    }
    if let Ok(endpoint) = std::env::var("EMF_ENDPOINT") {
        builder = builder.endpoint(endpoint);
    }
    if let Ok(protocol) = std::env::var("EMF_PROTOCOL") {
        builder = builder.protocol(protocol);
    }
    if let Ok(period) = std::env::var("EMF_AGGREGATION_PERIOD") {
        builder = builder.aggregation_period(period);
    }
    builder
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::filter::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let aggregator = builder_from_env().init().await?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut batch: Vec<serde_json::Value> = Vec::with_capacity(BATCH_SIZE);
    let mut pending = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => {
                    match serde_json::from_str(&line) {
                        Ok(record) => batch.push(record),
                        Err(err) => warn!("skipping line that is not JSON: {err}"),
                    }
                    if batch.len() >= BATCH_SIZE {
                        aggregator.collector().ingest_records(&batch).await;
                        batch.clear();
                    }
                }
                None => break,
            },
            _ = pending.tick(), if !batch.is_empty() => {
                aggregator.collector().ingest_records(&batch).await;
                batch.clear();
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    aggregator.collector().ingest_records(&batch).await;
    aggregator.shutdown().await?;
    Ok(())
}
