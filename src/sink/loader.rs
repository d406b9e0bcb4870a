use super::traits::{Destination, DestinationSession, FieldValue, SinkError, TableRef};
use crate::config::types::{SinkConfig, SourceConfig};
use crate::source::Record;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("row at offset {offset} has {actual} fields, expected {expected}")]
    RowShape {
        offset: u64,
        expected: usize,
        actual: usize,
    },

    #[error("a sink worker has stopped; no further rows are accepted")]
    WorkerUnavailable,

    #[error("sink worker failed: {0}")]
    WorkerFailed(String),

    #[error("invalid loader configuration: {0}")]
    Config(String),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub table: TableRef,
    /// Data columns, in row order.
    pub columns: Vec<String>,
    pub offset_column: String,
    pub line_column: Option<String>,
    /// Server-identity column and the value written into it.
    pub server_column: Option<(String, String)>,
    pub pad_short_rows: bool,
    pub null_text: Option<String>,
    pub rows_per_commit: usize,
    pub workers: usize,
    pub commit_delay: Duration,
}

impl LoaderConfig {
    pub fn from_config(columns: Vec<String>, source: &SourceConfig, sink: &SinkConfig) -> Self {
        Self {
            table: TableRef::new(sink.schema.clone(), sink.table.clone()),
            columns,
            offset_column: sink.offset_column.clone(),
            line_column: sink.line_column.clone(),
            server_column: sink.server_name_column.clone().zip(sink.server_identity()),
            pad_short_rows: source.pad_short_rows,
            null_text: source.null_text.clone(),
            rows_per_commit: sink.rows_per_commit,
            workers: sink.workers,
            commit_delay: sink.commit_delay,
        }
    }

    /// Every column a row is written to: data, then offset, line and server identity.
    pub fn destination_columns(&self) -> Vec<String> {
        let mut columns = self.columns.clone();
        columns.push(self.offset_column.clone());
        columns.extend(self.line_column.iter().cloned());
        columns.extend(self.server_column.iter().map(|(column, _)| column.clone()));
        columns
    }

    fn scope(&self) -> Option<(&str, &str)> {
        self.server_column
            .as_ref()
            .map(|(column, identity)| (column.as_str(), identity.as_str()))
    }

    /// Shape a record into a destination row.
    pub fn prepare(&self, record: Record) -> Result<Vec<FieldValue>, LoaderError> {
        let expected = self.columns.len();
        let actual = record.fields.len();
        if actual > expected || (actual < expected && !self.pad_short_rows) {
            return Err(LoaderError::RowShape {
                offset: record.offset,
                expected,
                actual,
            });
        }

        let mut row: Vec<FieldValue> = record
            .fields
            .into_iter()
            .map(|field| match &self.null_text {
                Some(null_text) if *null_text == field => FieldValue::Null,
                _ => FieldValue::Text(field),
            })
            .collect();
        row.resize(expected, FieldValue::Null);

        row.push(FieldValue::Int(record.offset as i64));
        if self.line_column.is_some() {
            row.push(FieldValue::Int(record.line as i64));
        }
        if let Some((_, identity)) = &self.server_column {
            row.push(FieldValue::Text(identity.clone()));
        }

        Ok(row)
    }
}

/// Pending rows for one connection, written and committed together.
struct BatchWriter {
    config: Arc<LoaderConfig>,
    session: Box<dyn DestinationSession>,
    columns: Vec<String>,
    pending: Vec<Vec<FieldValue>>,
}

impl BatchWriter {
    fn new(destination: &dyn Destination, config: Arc<LoaderConfig>) -> Result<Self, LoaderError> {
        Ok(Self {
            session: destination.connect()?,
            columns: config.destination_columns(),
            pending: Vec::with_capacity(config.rows_per_commit + 1),
            config,
        })
    }

    fn push(&mut self, record: Record) -> Result<(), LoaderError> {
        let row = self.config.prepare(record)?;
        self.pending.push(row);
        Ok(())
    }

    fn len(&self) -> usize {
        self.pending.len()
    }

    /// Insert and commit the pending rows; false when there was nothing to write.
    fn write(&mut self) -> Result<bool, LoaderError> {
        if self.pending.is_empty() {
            return Ok(false);
        }

        let inserted = self
            .session
            .insert_ignore(&self.config.table, &self.columns, &self.pending)?;
        self.session.commit()?;
        debug!(
            rows = self.pending.len(),
            inserted,
            table = %self.config.table,
            "batch committed"
        );
        self.pending.clear();
        Ok(true)
    }

    /// Write, then hold the connection idle for the commit delay.
    fn flush(&mut self) -> Result<(), LoaderError> {
        if self.write()? && !self.config.commit_delay.is_zero() {
            std::thread::sleep(self.config.commit_delay);
        }
        Ok(())
    }
}

/// Flush a caller-side writer on the blocking pool. The slot is empty only
/// when a previous flush task died.
async fn flush_inline(slot: &mut Option<BatchWriter>) -> Result<(), LoaderError> {
    let mut writer = slot.take().ok_or(LoaderError::WorkerUnavailable)?;

    let (writer, written) = tokio::task::spawn_blocking(move || {
        let written = writer.write();
        (writer, written)
    })
    .await
    .map_err(|e| SinkError::Join(e.to_string()))?;

    let delay = writer.config.commit_delay;
    *slot = Some(writer);

    if written? && !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
    Ok(())
}

enum QueueItem {
    Row(Record),
    Done,
}

struct Shared {
    queue: Mutex<mpsc::Receiver<QueueItem>>,
    depth: AtomicUsize,
    died: AtomicBool,
}

enum Mode {
    /// No workers: rows are buffered by the caller and flushed on the blocking pool.
    Inline(Option<BatchWriter>),
    Workers {
        sender: mpsc::Sender<QueueItem>,
        shared: Arc<Shared>,
        handles: Vec<JoinHandle<Result<(), LoaderError>>>,
    },
}

/// Feeds records to the destination through a bounded queue and a pool of
/// writer threads, each with its own connection.
pub struct BatchLoader {
    config: Arc<LoaderConfig>,
    high_water_mark: Option<i64>,
    mode: Mode,
}

impl BatchLoader {
    /// Query the high-water-mark, then start the workers.
    pub async fn start(
        destination: Arc<dyn Destination>,
        config: LoaderConfig,
    ) -> Result<Self, LoaderError> {
        if config.rows_per_commit == 0 {
            return Err(LoaderError::Config(
                "rows_per_commit must be at least 1".to_string(),
            ));
        }
        let config = Arc::new(config);

        let high_water_mark = {
            let destination = destination.clone();
            let config = config.clone();
            tokio::task::spawn_blocking(move || {
                destination.max_offset(&config.table, &config.offset_column, config.scope())
            })
            .await
            .map_err(|e| SinkError::Join(e.to_string()))??
        };

        let mode = if config.workers == 0 {
            Mode::Inline(Some(BatchWriter::new(destination.as_ref(), config.clone())?))
        } else {
            let (sender, receiver) = mpsc::channel(config.rows_per_commit);
            let shared = Arc::new(Shared {
                queue: Mutex::new(receiver),
                depth: AtomicUsize::new(0),
                died: AtomicBool::new(false),
            });

            let mut handles = Vec::with_capacity(config.workers);
            for worker in 0..config.workers {
                let destination = destination.clone();
                let config = config.clone();
                let shared = shared.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("sink-worker-{}", worker))
                    .spawn(move || run_worker(worker, destination, config, shared))?;
                handles.push(handle);
            }

            Mode::Workers {
                sender,
                shared,
                handles,
            }
        };

        info!(
            table = %config.table,
            high_water_mark = ?high_water_mark,
            workers = config.workers,
            rows_per_commit = config.rows_per_commit,
            "batch loader started"
        );

        Ok(Self {
            config,
            high_water_mark,
            mode,
        })
    }

    /// Largest offset already recorded at the destination.
    pub fn high_water_mark(&self) -> Option<i64> {
        self.high_water_mark
    }

    /// Where the source should resume. The row at this offset is delivered
    /// again and dropped by the destination's uniqueness constraint.
    pub fn resume_offset(&self) -> u64 {
        self.high_water_mark
            .map(|offset| offset.max(0) as u64)
            .unwrap_or(0)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Queue one record, waiting while the queue is full.
    pub async fn add_row(&mut self, record: Record) -> Result<(), LoaderError> {
        match &mut self.mode {
            Mode::Inline(slot) => {
                let full = slot
                    .as_ref()
                    .is_some_and(|writer| writer.len() >= self.config.rows_per_commit);
                if full {
                    flush_inline(slot).await?;
                }
                slot.as_mut()
                    .ok_or(LoaderError::WorkerUnavailable)?
                    .push(record)
            }
            Mode::Workers { sender, shared, .. } => {
                if shared.died.load(Ordering::SeqCst) {
                    return Err(LoaderError::WorkerUnavailable);
                }

                shared.depth.fetch_add(1, Ordering::SeqCst);
                if sender.send(QueueItem::Row(record)).await.is_err() {
                    shared.depth.fetch_sub(1, Ordering::SeqCst);
                    return Err(LoaderError::WorkerUnavailable);
                }
                Ok(())
            }
        }
    }

    /// Drain the queue, stop the workers and report the first worker failure.
    pub async fn shutdown(self) -> Result<(), LoaderError> {
        match self.mode {
            Mode::Inline(mut slot) => flush_inline(&mut slot).await,
            Mode::Workers {
                sender, handles, ..
            } => {
                for _ in 0..handles.len() {
                    if sender.send(QueueItem::Done).await.is_err() {
                        break;
                    }
                }
                drop(sender);

                let results = tokio::task::spawn_blocking(move || {
                    handles
                        .into_iter()
                        .map(|handle| handle.join())
                        .collect::<Vec<_>>()
                })
                .await
                .map_err(|e| SinkError::Join(e.to_string()))?;

                let mut failure = None;
                for result in results {
                    let outcome = result.unwrap_or_else(|_| {
                        Err(LoaderError::WorkerFailed("worker thread panicked".to_string()))
                    });
                    if let Err(e) = outcome {
                        failure.get_or_insert(e);
                    }
                }

                match failure {
                    Some(e) => Err(e),
                    None => {
                        info!(table = %self.config.table, "batch loader stopped");
                        Ok(())
                    }
                }
            }
        }
    }
}

fn run_worker(
    worker: usize,
    destination: Arc<dyn Destination>,
    config: Arc<LoaderConfig>,
    shared: Arc<Shared>,
) -> Result<(), LoaderError> {
    let result = worker_loop(destination, config, &shared);

    if let Err(e) = &result {
        error!(worker, error = %e, "sink worker failed");
        shared.died.store(true, Ordering::SeqCst);
        // Wake a producer blocked on a full queue.
        match shared.queue.lock() {
            Ok(mut queue) => queue.close(),
            Err(poisoned) => poisoned.into_inner().close(),
        }
    } else {
        debug!(worker, "sink worker finished");
    }

    result
}

fn worker_loop(
    destination: Arc<dyn Destination>,
    config: Arc<LoaderConfig>,
    shared: &Shared,
) -> Result<(), LoaderError> {
    let mut writer = BatchWriter::new(destination.as_ref(), config.clone())?;

    loop {
        let item = {
            let mut queue = shared
                .queue
                .lock()
                .map_err(|_| LoaderError::WorkerFailed("queue lock poisoned".to_string()))?;
            queue.blocking_recv()
        };

        let done = match item {
            Some(QueueItem::Row(record)) => {
                shared.depth.fetch_sub(1, Ordering::SeqCst);
                writer.push(record)?;
                false
            }
            Some(QueueItem::Done) | None => true,
        };

        if done
            || writer.len() > config.rows_per_commit
            || shared.depth.load(Ordering::SeqCst) == 0
        {
            writer.flush()?;
        }

        if done {
            return Ok(());
        }
    }
}
