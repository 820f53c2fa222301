//! Newline delimited JSON appended to a local file

use super::{FlushSummary, Flusher};
use crate::emf::OutputEvent;
use crate::Error;
use bytes::{BufMut, Bytes, BytesMut};
use futures::future::{BoxFuture, FutureExt};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::task;
use tracing::debug;

/// Appends each flush to one file; the write and fsync run on the blocking pool
pub struct FileSink {
    path: PathBuf,
    file: Arc<Mutex<File>>,
}

impl FileSink {
    /// Open `path` for appending, creating it and any missing parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: path.to_owned(),
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn write_events(&self, events: &[OutputEvent]) -> Result<FlushSummary, Error> {
        let buffer = serialize(events)?;
        let file = Arc::clone(&self.file);
        let path = self.path.clone();

        let bytes_written = task::spawn_blocking(move || append(&file, &path, &buffer))
            .await
            .map_err(|err| Error::Sink(Box::new(err)))??;

        debug!(path = %self.path.display(), events = events.len(), "wrote events");

        Ok(FlushSummary {
            bytes_written,
            events_written: events.len() as u64,
        })
    }
}

impl Flusher for FileSink {
    fn flush<'a>(&'a self, events: &'a [OutputEvent]) -> BoxFuture<'a, Result<FlushSummary, Error>> {
        self.write_events(events).boxed()
    }
}

fn serialize(events: &[OutputEvent]) -> Result<Bytes, Error> {
    let mut writer = BytesMut::with_capacity(256 * events.len()).writer();
    for event in events {
        serde_json::to_writer(&mut writer, event)?;
        writer.write_all(b"\n")?;
    }
    Ok(writer.into_inner().freeze())
}

/// Bytes are measured as the growth of the file across the sync
fn append(file: &Mutex<File>, path: &Path, buffer: &[u8]) -> Result<u64, Error> {
    let mut file = file
        .lock()
        .map_err(|_| Error::Sink(format!("lock on {} poisoned", path.display()).into()))?;

    let size_before = file.metadata()?.len();
    file.write_all(buffer)?;
    file.sync_all()?;
    let size_after = file.metadata()?.len();

    Ok(size_after.saturating_sub(size_before))
}
