use crate::config::parse::load_config;
use crate::config::{expand_tilde, Config, ConfigError};
use crate::index::IndexError;
use crate::sink::{BatchLoader, Destination, DuckDbDestination, LoaderConfig, LoaderError, SinkError};
use crate::source::splitter::delimiter_byte;
use crate::source::timestamp::TimestampError;
use crate::source::{read_header, RecordSplitter, SourceError, TailOptions, TailingSource};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("config not found (searched ~/.config/shovel/config.yml and /etc/shovel/config.yml); use --config <path> or run 'shovel config init'")]
    ConfigNotFound,

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("index error: {0}")]
    Index(#[from] IndexError),

    #[error("timestamp error: {0}")]
    Timestamp(#[from] TimestampError),

    #[error("loader error: {0}")]
    Loader(#[from] LoaderError),

    #[error("destination error: {0}")]
    Sink(#[from] SinkError),
}

/// Tail the configured file into the destination until the input ends or Ctrl+C.
pub async fn run(config_path: Option<PathBuf>, file: Option<PathBuf>) -> Result<(), RunError> {
    let config = load(config_path.as_deref(), file.as_deref())?;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
            signal_token.cancel();
        }
    });

    run_pipeline(&config, cancel).await?;
    Ok(())
}

/// Load the config file; `file` replaces the configured source path.
pub fn load(config_path: Option<&Path>, file: Option<&Path>) -> Result<Config, RunError> {
    let config_path = config_path.ok_or(RunError::ConfigNotFound)?;
    info!(config_path = %config_path.display(), "Loading configuration");

    let mut config = load_config(config_path)?;
    if let Some(file) = file {
        config.source.path = expand_tilde(file);
    }
    Ok(config)
}

/// Configured column names, or the first row of the file when none are configured.
pub async fn resolve_columns(config: &Config) -> Result<Vec<String>, RunError> {
    match &config.source.columns {
        Some(columns) => Ok(columns.clone()),
        None => {
            let columns = read_header(&config.source).await?;
            info!(columns = ?columns, "Column names taken from the header row");
            Ok(columns)
        }
    }
}

pub async fn run_pipeline(config: &Config, cancel: CancellationToken) -> Result<u64, RunError> {
    let columns = resolve_columns(config).await?;
    let destination: Arc<dyn Destination> =
        Arc::new(DuckDbDestination::open(&config.sink.connection)?);
    run_with_destination(config, columns, destination, cancel).await
}

/// Pump records from the source into the loader. Returns the number of rows handed over.
pub async fn run_with_destination(
    config: &Config,
    columns: Vec<String>,
    destination: Arc<dyn Destination>,
    cancel: CancellationToken,
) -> Result<u64, RunError> {
    let loader_config = LoaderConfig::from_config(columns, &config.source, &config.sink);
    let progress_every = loader_config.rows_per_commit as u64;
    let mut loader = BatchLoader::start(destination, loader_config).await?;

    let options = TailOptions::from_config(&config.source)?;
    let tailer = TailingSource::open(&config.source.path, options)?;
    let mut records = RecordSplitter::new(tailer, delimiter_byte(config.source.delimiter)?);

    let resume = loader.resume_offset();
    if resume > 0 {
        if records.source_mut().seek(resume)? {
            info!(offset = resume, "Resuming from high-water-mark");
        } else {
            warn!(
                offset = resume,
                path = %config.source.path.display(),
                "High-water-mark lies past the end of the file, reading from the start"
            );
        }
    }

    info!(
        path = %config.source.path.display(),
        watch = ?config.source.watch,
        "Pipeline started, press Ctrl+C to shutdown"
    );

    let mut loaded: u64 = 0;
    let outcome: Result<(), RunError> = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(rows = loaded, "Stopping, no further rows will be read");
                break Ok(());
            }
            next = records.next_record() => next,
        };

        match next {
            Ok(Some(record)) => {
                if let Err(e) = loader.add_row(record).await {
                    break Err(e.into());
                }
                loaded += 1;
                if loaded % progress_every == 0 {
                    info!(rows = loaded, offset = records.source().tell(), "Progress");
                }
            }
            Ok(None) => {
                info!(rows = loaded, "End of input reached");
                break Ok(());
            }
            Err(e) => break Err(e.into()),
        }
    };

    match (outcome, loader.shutdown().await) {
        (Ok(()), Ok(())) => {
            info!(rows = loaded, "Pipeline shutdown complete");
            Ok(loaded)
        }
        (Err(e), Ok(())) => Err(e),
        // The worker's own error explains why a row was refused.
        (outcome, Err(e)) => {
            if let Err(producer) = outcome {
                error!(error = %producer, "Producer stopped");
            }
            Err(e.into())
        }
    }
}
