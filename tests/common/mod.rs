mod mock;

pub use mock::MockCloudWatchLogs;
