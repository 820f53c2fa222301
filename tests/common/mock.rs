#![allow(unused)]
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use emf_aggregator::sink::cloudwatch::{CloudWatchLogs, LogEvent};
use emf_aggregator::BoxError;
use futures::future::{BoxFuture, FutureExt};

#[derive(Clone, Default)]
pub struct MockCloudWatchLogs {
    pub created_streams: Arc<Mutex<Vec<(String, String)>>>,
    pub put_log_events: Arc<Mutex<Vec<Vec<LogEvent>>>>,
    pub fail_create: Arc<AtomicBool>,
    pub fail_put: Arc<AtomicBool>,
    pub put_delay: Arc<Mutex<Option<Duration>>>,
}

impl MockCloudWatchLogs {
    pub fn puts(&self) -> Vec<Vec<LogEvent>> {
        self.put_log_events.lock().unwrap().clone()
    }
}

impl CloudWatchLogs for MockCloudWatchLogs {
    fn create_log_stream<'a>(
        &'a self,
        log_group_name: &'a str,
        log_stream_name: &'a str,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return async { Err(BoxError::from("ResourceNotFoundException: log group does not exist")) }.boxed();
        }
        self.created_streams
            .lock()
            .unwrap()
            .push((log_group_name.to_owned(), log_stream_name.to_owned()));
        async { Ok(()) }.boxed()
    }

    fn put_log_events<'a>(
        &'a self,
        _log_group_name: &'a str,
        _log_stream_name: &'a str,
        events: Vec<LogEvent>,
    ) -> BoxFuture<'a, Result<(), BoxError>> {
        let delay = *self.put_delay.lock().unwrap();
        async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail_put.load(Ordering::SeqCst) {
                return Err(BoxError::from("ServiceUnavailableException"));
            }
            self.put_log_events.lock().unwrap().push(events);
            Ok(())
        }
        .boxed()
    }
}
