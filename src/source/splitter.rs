use super::{LineSource, SourceError, TailOptions, TailingSource};
use crate::config::types::{SourceConfig, WatchMode};
use csv::{ReaderBuilder, StringRecord};

/// One delimited row together with the position it was read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub fields: Vec<String>,
    pub line: u64,
    pub offset: u64,
}

/// Splits each line of a [`LineSource`] into fields.
pub struct RecordSplitter<S: LineSource> {
    source: S,
    delimiter: u8,
}

impl<S: LineSource> RecordSplitter<S> {
    pub fn new(source: S, delimiter: u8) -> Self {
        Self { source, delimiter }
    }

    pub async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        let Some(line) = self.source.next_line().await? else {
            return Ok(None);
        };

        let fields = split_line(&line.text, self.delimiter).map_err(|e| SourceError::Malformed {
            offset: line.offset,
            reason: e.to_string(),
        })?;

        Ok(Some(Record {
            fields,
            line: line.line,
            offset: line.offset,
        }))
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }

    pub fn into_inner(self) -> S {
        self.source
    }
}

/// Split a single line; quoting follows the usual CSV rules within the line.
pub fn split_line(line: &str, delimiter: u8) -> Result<Vec<String>, csv::Error> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(line.as_bytes());

    let mut record = StringRecord::new();
    if reader.read_record(&mut record)? {
        Ok(record.iter().map(str::to_string).collect())
    } else {
        Ok(Vec::new())
    }
}

/// Column names taken from the first row of the configured file.
pub async fn read_header(config: &SourceConfig) -> Result<Vec<String>, SourceError> {
    let options = TailOptions {
        encoding: config.encoding,
        watch: WatchMode::Off,
        ..TailOptions::default()
    };
    let source = TailingSource::open(&config.path, options)?;
    let mut splitter = RecordSplitter::new(source, delimiter_byte(config.delimiter)?);

    match splitter.next_record().await? {
        Some(record) if !record.fields.is_empty() => Ok(record.fields),
        _ => Err(SourceError::Config(format!(
            "cannot derive column names: {} has no header row",
            config.path.display()
        ))),
    }
}

pub fn delimiter_byte(delimiter: char) -> Result<u8, SourceError> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| {
            SourceError::Config(format!("delimiter must be a single ASCII character, got {:?}", delimiter))
        })
}
