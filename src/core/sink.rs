//! Message sinks: where received messages end up.
//!
//! [`CsvMessageLogger`] is the durable one. Each call opens the store,
//! appends one row, syncs and closes it, so nothing is held between
//! messages and a crash never leaves a half-buffered row behind. A store is
//! created with its header the first time a message is recorded and is
//! never truncated or rewritten afterwards.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::record::{header_row, LogRecord, RecordError};

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Invalid message: {0}")]
    InvalidRecord(#[from] RecordError),

    #[error("Failed to write message store: {0}")]
    Io(#[from] io::Error),
}

/// Receives messages in arrival order.
pub trait MessageSink: Send + Sync {
    fn record(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError>;
}

/// Appends messages to a CSV store at a fixed path.
///
/// Clones share a write lock, so rows from concurrent callers never
/// interleave and none lands before the header.
#[derive(Debug, Clone)]
pub struct CsvMessageLogger {
    path: PathBuf,
    write_lock: Arc<Mutex<()>>,
}

impl CsvMessageLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes an already stamped record.
    ///
    /// Creates the store with its header first if it does not exist yet.
    /// The file is opened, appended to, synced and closed within the call.
    ///
    /// # Arguments
    ///
    /// * `record` - The record to append as one CSV row.
    ///
    /// # Errors
    ///
    /// Returns `SinkError::InvalidRecord` if the timestamp cannot be
    /// formatted, and `SinkError::Io` if creating, writing or syncing the
    /// store fails. A failed header write never leaves a headerless store
    /// behind.
    pub fn append(&self, record: &LogRecord) -> Result<(), SinkError> {
        let row = record.to_row()?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "message store lock poisoned"))?;
        self.ensure_header()?;

        let mut file = OpenOptions::new().append(true).open(&self.path)?;
        file.write_all(&row)?;
        file.flush()?;
        file.sync_data()?;

        debug!(
            topic = %record.topic(),
            bytes = record.payload().len(),
            path = %self.path.display(),
            "Message recorded"
        );
        Ok(())
    }

    /// Creates the store with its header unless it already has content.
    ///
    /// Returns whether the header was written by this call.
    fn ensure_header(&self) -> io::Result<bool> {
        self.write_header_with(|file| file.write_all(&header_row()))
    }

    /// Header creation with the write step injectable, so a failing write
    /// can be exercised.
    fn write_header_with<F>(&self, write_header: F) -> io::Result<bool>
    where
        F: FnOnce(&mut File) -> io::Result<()>,
    {
        let (mut file, created) = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(file) => (file, true),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                if fs::metadata(&self.path)?.len() > 0 {
                    return Ok(false);
                }
                // left empty by an interrupted creation
                (OpenOptions::new().append(true).open(&self.path)?, false)
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = write_header(&mut file).and_then(|()| file.sync_data()) {
            if created {
                drop(file);
                if let Err(remove_err) = fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), error = %remove_err, "Failed to remove store after header write failed");
                }
            } else if let Err(truncate_err) = file.set_len(0) {
                warn!(path = %self.path.display(), error = %truncate_err, "Failed to reset store after header write failed");
            }
            return Err(e);
        }

        info!(path = %self.path.display(), "Created message store");
        Ok(true)
    }
}

impl MessageSink for CsvMessageLogger {
    fn record(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        let record = LogRecord::new(topic, payload)?;
        self.append(&record)
    }
}

/// Keeps records in memory; for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|records| records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MessageSink for MemorySink {
    fn record(&self, topic: &str, payload: &[u8]) -> Result<(), SinkError> {
        let record = LogRecord::new(topic, payload)?;
        self.records
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "memory sink lock poisoned"))?
            .push(record);
        Ok(())
    }
}
