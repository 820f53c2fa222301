//! Aggregates CloudWatch Embedded Metric Format records over a time window and emits one
//! compacted EMF event per dimension group to a file or a CloudWatch Logs stream.

/// Error type returned by transport clients
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub use {
    builder::{Aggregator, Builder},
    collector::Collector,
    error::Error,
    record::{parse, EmfMetric, MetricValue},
};

pub mod aggregator;
pub mod builder;
pub mod collector;
pub mod emf;
mod error;
pub mod histogram;
pub mod record;
pub mod sink;
pub mod task;
