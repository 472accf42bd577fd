//! Writes the events of a machine to a CSV table, one row per event.

use crate::cli::CliError;
use ringclock_core::{Event, EventRecorder};
use serde::Serialize;
use std::{
    fs::File,
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

/// The column names, in order.
pub const HEADER: [&str; 5] = [
    "timestamp",
    "logical_clock_time",
    "queue_length",
    "event_type",
    "message",
];

#[derive(Serialize)]
struct Row<'a> {
    timestamp: f64,
    logical_clock_time: u64,
    queue_length: usize,
    event_type: &'static str,
    message: Option<&'a str>,
}

impl<'a> From<&'a Event> for Row<'a> {
    fn from(event: &'a Event) -> Self {
        Self {
            timestamp: event.system_time,
            logical_clock_time: event.clock,
            queue_length: event.queue_len,
            event_type: event.kind.as_str(),
            message: event.message.as_deref(),
        }
    }
}

/// Appends events to a CSV file, flushing after each row so the table is
/// complete even if the process is killed.
pub struct CsvRecorder {
    path: PathBuf,
    writer: Mutex<csv::Writer<File>>,
}

impl CsvRecorder {
    /// Creates (or truncates) the file at `path` and writes the header.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, CliError> {
        let path = path.as_ref().to_path_buf();
        let table_error = |source| CliError::EventTable {
            path: path.clone(),
            source,
        };
        // The header is written by hand so an empty run still has one
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_path(&path)
            .map_err(table_error)?;
        writer.write_record(HEADER).map_err(table_error)?;
        writer.flush().map_err(|e| table_error(e.into()))?;
        Ok(Self {
            path,
            writer: Mutex::new(writer),
        })
    }

    /// The table name of machine `id` running at `rate`.
    pub fn file_name(id: usize, rate: u32) -> String {
        format!("log_{id}_{rate}.csv")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventRecorder for CsvRecorder {
    fn record(&self, event: &Event) {
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let result = writer
            .serialize(Row::from(event))
            .and_then(|_| writer.flush().map_err(csv::Error::from));
        if let Err(e) = result {
            tracing::error!(path = ?self.path, "Failed to record event: {}", e);
        }
    }
}
