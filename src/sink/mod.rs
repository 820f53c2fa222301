//! # Sink
//!
//! Destinations for the events produced by a flush

use crate::emf::OutputEvent;
use crate::Error;
use futures::future::BoxFuture;
use std::ops::AddAssign;
use std::sync::Arc;

pub mod cloudwatch;
pub mod file;

pub use {cloudwatch::CloudWatchSink, file::FileSink};

/// What a sink delivered for one flush
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FlushSummary {
    pub bytes_written: u64,
    pub events_written: u64,
}

impl AddAssign for FlushSummary {
    fn add_assign(&mut self, other: Self) {
        self.bytes_written = self.bytes_written.saturating_add(other.bytes_written);
        self.events_written = self.events_written.saturating_add(other.events_written);
    }
}

/// Delivers a batch of aggregated events
///
/// An `Err` tells the collector the batch was not delivered and the window must be kept
pub trait Flusher: Send + Sync {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>>;
}

impl<F: Flusher + ?Sized> Flusher for Arc<F> {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>> {
        (**self).flush(events)
    }
}

impl<F: Flusher + ?Sized> Flusher for Box<F> {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>> {
        (**self).flush(events)
    }
}
