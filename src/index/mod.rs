use crate::config::types::{IndexConfig, SourceConfig, WatchMode};
use crate::source::splitter::delimiter_byte;
use crate::source::timestamp::TimestampFormat;
use crate::source::{Record, RecordSplitter, SourceError, TailOptions, TailingSource};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;
use uuid::Uuid;

pub const CURRENT_VERSION: u32 = 3;

/// Slot of an entry in the arena of an [`OffsetIndex`].
pub type EntryId = usize;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index on disk is not compatible with the configuration: {0}")]
    Incompatible(String),

    #[error("no index entry for {0}")]
    NotFound(String),

    #[error("column '{0}' is not one of the configured columns")]
    UnknownColumn(String),

    #[error("cannot index line {line}: {reason}")]
    Malformed { line: u64, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("source error: {0}")]
    Source(#[from] SourceError),
}

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub line: u64,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    pub identifier: Option<Uuid>,
}

/// Which fields of a row feed the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexLayout {
    pub columns: Vec<String>,
    pub date_column: usize,
    pub date_format: String,
    pub identifier_column: Option<usize>,
}

impl IndexLayout {
    /// Resolve column names to positions. The date column defaults to the first one.
    pub fn from_config(columns: &[String], config: &IndexConfig) -> Result<Self> {
        let position = |name: &str| {
            columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| IndexError::UnknownColumn(name.to_string()))
        };

        let date_column = match &config.date_column {
            Some(name) => position(name)?,
            None => 0,
        };
        let identifier_column = config
            .identifier_column
            .as_deref()
            .map(position)
            .transpose()?;

        Ok(Self {
            columns: columns.to_vec(),
            date_column,
            date_format: config.date_format.clone(),
            identifier_column,
        })
    }
}

/// Date and identifier lookups into a file, persisted next to it.
///
/// Entries live once in `entries`; both maps hold slots into it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OffsetIndex {
    pub version: u32,
    pub columns: Vec<String>,
    pub date_column: usize,
    pub date_format: String,
    entries: Vec<IndexEntry>,
    date_index: HashMap<DateTime<Utc>, EntryId>,
    id_index: HashMap<Uuid, EntryId>,
}

impl OffsetIndex {
    pub fn new(layout: &IndexLayout) -> Self {
        Self {
            version: CURRENT_VERSION,
            columns: layout.columns.clone(),
            date_column: layout.date_column,
            date_format: layout.date_format.clone(),
            entries: Vec::new(),
            date_index: HashMap::new(),
            id_index: HashMap::new(),
        }
    }

    /// Load the index at `index_path`, or scan the source and persist a fresh one
    /// when the file is missing or empty. A source without rows yields an empty
    /// index that is not saved.
    pub async fn load_or_build(
        index_path: &Path,
        layout: &IndexLayout,
        source: &SourceConfig,
    ) -> Result<Self> {
        let has_content = std::fs::metadata(index_path)
            .map(|m| m.is_file() && m.len() > 0)
            .unwrap_or(false);

        if has_content {
            return Self::load(index_path, layout);
        }

        tracing::info!(
            index = %index_path.display(),
            source = %source.path.display(),
            "building offset index"
        );
        let index = Self::build(layout, source).await?;
        if index.is_empty() {
            tracing::warn!(
                source = %source.path.display(),
                "source has no rows, offset index not saved"
            );
        } else {
            index.persist(index_path)?;
        }
        Ok(index)
    }

    pub fn load(index_path: &Path, layout: &IndexLayout) -> Result<Self> {
        let bytes = std::fs::read(index_path)?;
        let index: OffsetIndex = serde_json::from_slice(&bytes).map_err(|e| {
            tracing::warn!(index = %index_path.display(), error = %e, "index is corrupt");
            IndexError::Incompatible(format!("cannot decode {}: {}", index_path.display(), e))
        })?;

        Self::new(layout).check_compatible(&index)?;
        index.check_entries()?;

        tracing::info!(
            index = %index_path.display(),
            entries = index.entries.len(),
            "loaded offset index"
        );
        Ok(index)
    }

    /// Scan the whole source as it is now; the scan never waits for more data.
    pub async fn build(layout: &IndexLayout, source: &SourceConfig) -> Result<Self> {
        let options = TailOptions {
            watch: WatchMode::Off,
            ..TailOptions::from_config(source)?
        };
        let tailer = TailingSource::open(&source.path, options)?;
        let mut splitter = RecordSplitter::new(tailer, delimiter_byte(source.delimiter)?);
        let format = TimestampFormat::new(&layout.date_format);

        let mut index = Self::new(layout);
        while let Some(record) = splitter.next_record().await? {
            let (timestamp, identifier) = index_keys(&record, layout, &format)?;
            index.add_index(record.line, record.offset, timestamp, identifier);
        }

        tracing::info!(entries = index.entries.len(), "offset index built");
        Ok(index)
    }

    /// Write the whole index, replacing whatever was there.
    pub fn persist(&self, index_path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec(self)?;
        std::fs::write(index_path, bytes)?;
        tracing::debug!(index = %index_path.display(), "offset index saved");
        Ok(())
    }

    pub fn add_index(
        &mut self,
        line: u64,
        offset: u64,
        timestamp: DateTime<Utc>,
        identifier: Option<Uuid>,
    ) -> EntryId {
        let id = self.entries.len();
        self.entries.push(IndexEntry {
            line,
            offset,
            timestamp,
            identifier,
        });
        self.date_index.insert(timestamp, id);
        if let Some(identifier) = identifier {
            self.id_index.insert(identifier, id);
        }
        id
    }

    pub fn find_by_date(&self, timestamp: &DateTime<Utc>) -> Result<&IndexEntry> {
        self.date_index
            .get(timestamp)
            .map(|&id| &self.entries[id])
            .ok_or_else(|| IndexError::NotFound(format!("date {}", timestamp.to_rfc3339())))
    }

    pub fn find_by_identifier(&self, identifier: &Uuid) -> Result<&IndexEntry> {
        self.id_index
            .get(identifier)
            .map(|&id| &self.entries[id])
            .ok_or_else(|| IndexError::NotFound(format!("identifier {}", identifier)))
    }

    pub fn entry(&self, id: EntryId) -> Option<&IndexEntry> {
        self.entries.get(id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_compatible(&self, other: &OffsetIndex) -> bool {
        self.check_compatible(other).is_ok() && other.check_entries().is_ok()
    }

    fn check_compatible(&self, other: &OffsetIndex) -> Result<()> {
        if other.version != self.version {
            return Err(IndexError::Incompatible(format!(
                "version {} (expected {})",
                other.version, self.version
            )));
        }
        if other.columns.len() != self.columns.len() {
            return Err(IndexError::Incompatible(format!(
                "{} columns (expected {})",
                other.columns.len(),
                self.columns.len()
            )));
        }
        if other.date_column != self.date_column {
            return Err(IndexError::Incompatible(format!(
                "date column {} (expected {})",
                other.date_column, self.date_column
            )));
        }
        if other.date_format != self.date_format {
            return Err(IndexError::Incompatible(format!(
                "date format '{}' (expected '{}')",
                other.date_format, self.date_format
            )));
        }
        Ok(())
    }

    /// At least one entry, and every map slot must name an entry carrying the same key.
    fn check_entries(&self) -> Result<()> {
        if self.entries.is_empty() || self.date_index.is_empty() {
            return Err(IndexError::Incompatible("index has no entries".to_string()));
        }
        for (timestamp, &id) in &self.date_index {
            match self.entries.get(id) {
                Some(entry) if entry.timestamp == *timestamp => {}
                _ => {
                    return Err(IndexError::Incompatible(format!(
                        "date entry {} points at invalid slot {}",
                        timestamp.to_rfc3339(),
                        id
                    )))
                }
            }
        }
        for (identifier, &id) in &self.id_index {
            match self.entries.get(id) {
                Some(entry) if entry.identifier == Some(*identifier) => {}
                _ => {
                    return Err(IndexError::Incompatible(format!(
                        "identifier entry {} points at invalid slot {}",
                        identifier, id
                    )))
                }
            }
        }
        Ok(())
    }
}

fn index_keys(
    record: &Record,
    layout: &IndexLayout,
    format: &TimestampFormat,
) -> Result<(DateTime<Utc>, Option<Uuid>)> {
    let field = |position: usize| {
        record
            .fields
            .get(position)
            .ok_or_else(|| IndexError::Malformed {
                line: record.line,
                reason: format!("row has no column {}", position),
            })
    };

    let timestamp = format
        .parse(field(layout.date_column)?)
        .map_err(|e| IndexError::Malformed {
            line: record.line,
            reason: e.to_string(),
        })?;

    let identifier = match layout.identifier_column {
        Some(position) => match field(position)?.trim() {
            "" => None,
            text => Some(Uuid::parse_str(text).map_err(|e| IndexError::Malformed {
                line: record.line,
                reason: format!("invalid identifier '{}': {}", text, e),
            })?),
        },
        None => None,
    };

    Ok((timestamp, identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    const ROWS: &str = "\
ts,id,msg
2024-03-01 10:00:00,6f1c1a4e-2c1b-4d8e-9a55-0d5f6c1e7a01,first
2024-03-01 10:00:05,0b9e7a3c-7d7e-4a63-8f0e-5b8c9a2d1e02,second
2024-03-01 10:00:09,,third
";

    fn source_file() -> NamedTempFile {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(ROWS.as_bytes()).unwrap();
        temp_file.flush().unwrap();
        temp_file
    }

    fn source_config(path: &Path) -> SourceConfig {
        serde_yaml::from_str(&format!("path: {}\nwatch: off", path.display())).unwrap()
    }

    fn layout(columns: &[&str]) -> IndexLayout {
        let config = IndexConfig {
            identifier_column: Some("id".into()),
            ..IndexConfig::default()
        };
        let columns: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
        IndexLayout::from_config(&columns, &config).unwrap()
    }

    #[test]
    fn test_layout_positions() {
        let layout = layout(&["ts", "id", "msg"]);
        assert_eq!(layout.date_column, 0);
        assert_eq!(layout.identifier_column, Some(1));

        let config = IndexConfig {
            date_column: Some("when".into()),
            ..IndexConfig::default()
        };
        assert!(matches!(
            IndexLayout::from_config(&["ts".to_string()], &config),
            Err(IndexError::UnknownColumn(_))
        ));
    }

    #[test]
    fn test_add_and_find() {
        let mut index = OffsetIndex::new(&layout(&["ts", "id", "msg"]));
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let id = Uuid::new_v4();

        let slot = index.add_index(3, 120, ts, Some(id));

        let by_date = index.find_by_date(&ts).unwrap();
        let by_id = index.find_by_identifier(&id).unwrap();
        assert_eq!(by_date, by_id);
        assert_eq!(index.entry(slot), Some(by_date));
        assert_eq!(by_date.offset, 120);

        let missing = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            index.find_by_date(&missing),
            Err(IndexError::NotFound(_))
        ));
        assert!(matches!(
            index.find_by_identifier(&Uuid::new_v4()),
            Err(IndexError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_build_then_reload() {
        let source = source_file();
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("events.index");
        let config = source_config(source.path());
        let layout = layout(&["ts", "id", "msg"]);

        let built = OffsetIndex::load_or_build(&index_path, &layout, &config)
            .await
            .unwrap();
        assert_eq!(built.len(), 3);
        assert!(index_path.exists());

        let loaded = OffsetIndex::load_or_build(&index_path, &layout, &config)
            .await
            .unwrap();
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 5).unwrap();
        let id = Uuid::parse_str("0b9e7a3c-7d7e-4a63-8f0e-5b8c9a2d1e02").unwrap();

        let by_date = loaded.find_by_date(&ts).unwrap();
        assert_eq!(by_date.line, 2);
        assert_eq!(by_date.offset, 73);
        assert_eq!(loaded.find_by_identifier(&id).unwrap(), by_date);

        // Row without an identifier is reachable by date only.
        let third = Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 9).unwrap();
        assert_eq!(loaded.find_by_date(&third).unwrap().identifier, None);
    }

    #[tokio::test]
    async fn test_column_count_mismatch_is_incompatible() {
        let source = source_file();
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("events.index");
        let config = source_config(source.path());

        OffsetIndex::load_or_build(&index_path, &layout(&["ts", "id", "msg"]), &config)
            .await
            .unwrap();

        let result =
            OffsetIndex::load_or_build(&index_path, &layout(&["ts", "id", "msg", "extra"]), &config)
                .await;
        assert!(matches!(result, Err(IndexError::Incompatible(_))));
    }

    fn one_entry(layout: &IndexLayout) -> OffsetIndex {
        let mut index = OffsetIndex::new(layout);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        index.add_index(1, 0, ts, None);
        index
    }

    #[test]
    fn test_format_and_version_mismatch() {
        let layout = layout(&["ts", "id", "msg"]);
        let expected = OffsetIndex::new(&layout);

        let mut other = one_entry(&layout);
        other.date_format = "iso8601".into();
        assert!(!expected.is_compatible(&other));

        let mut other = one_entry(&layout);
        other.version = CURRENT_VERSION - 1;
        assert!(!expected.is_compatible(&other));

        assert!(expected.is_compatible(&one_entry(&layout)));
        assert!(!expected.is_compatible(&OffsetIndex::new(&layout)));
    }

    #[tokio::test]
    async fn test_empty_index_is_not_saved_or_accepted() {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(b"ts,id,msg\n").unwrap();
        source.flush().unwrap();
        let config = source_config(source.path());
        let layout = layout(&["ts", "id", "msg"]);
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("events.index");

        let built = OffsetIndex::load_or_build(&index_path, &layout, &config)
            .await
            .unwrap();
        assert!(built.is_empty());
        assert!(!index_path.exists());

        OffsetIndex::new(&layout).persist(&index_path).unwrap();
        assert!(matches!(
            OffsetIndex::load(&index_path, &layout),
            Err(IndexError::Incompatible(_))
        ));
    }

    #[test]
    fn test_corrupt_file_is_incompatible() {
        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("events.index");
        std::fs::write(&index_path, b"{not json").unwrap();

        let result = OffsetIndex::load(&index_path, &layout(&["ts", "id", "msg"]));
        assert!(matches!(result, Err(IndexError::Incompatible(_))));
    }

    #[test]
    fn test_dangling_slot_is_incompatible() {
        let layout = layout(&["ts", "id", "msg"]);
        let mut index = OffsetIndex::new(&layout);
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        index.add_index(1, 0, ts, None);
        index.add_index(2, 40, ts + chrono::Duration::seconds(1), None);
        index.entries.truncate(1);

        let dir = TempDir::new().unwrap();
        let index_path = dir.path().join("events.index");
        index.persist(&index_path).unwrap();

        assert!(matches!(
            OffsetIndex::load(&index_path, &layout),
            Err(IndexError::Incompatible(_))
        ));
    }

    #[tokio::test]
    async fn test_unparseable_date_fails_build() {
        let mut source = NamedTempFile::new().unwrap();
        source.write_all(b"ts,id,msg\nyesterday,,oops\n").unwrap();
        source.flush().unwrap();
        let config = source_config(source.path());

        let result = OffsetIndex::build(&layout(&["ts", "id", "msg"]), &config).await;
        assert!(matches!(result, Err(IndexError::Malformed { line: 1, .. })));
    }
}
