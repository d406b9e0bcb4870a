use super::run::{load, resolve_columns, RunError};
use crate::config::Config;
use crate::index::{IndexEntry, IndexLayout, OffsetIndex};
use crate::source::timestamp::TimestampFormat;
use std::path::Path;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum LookupKey {
    /// Parsed with the configured date format.
    Date(String),
    Identifier(Uuid),
}

pub async fn build(config_path: Option<&Path>, file: Option<&Path>) -> Result<(), RunError> {
    let config = load(config_path, file)?;
    let index = open_index(&config).await?;
    println!(
        "{} entries in {}",
        index.len(),
        config.index.index_path(&config.source.path).display()
    );
    Ok(())
}

pub async fn lookup(
    config_path: Option<&Path>,
    file: Option<&Path>,
    key: LookupKey,
) -> Result<(), RunError> {
    let config = load(config_path, file)?;
    let index = open_index(&config).await?;

    let entry = find(&index, &config, &key)?;
    println!(
        "line={} offset={} timestamp={} identifier={}",
        entry.line,
        entry.offset,
        entry.timestamp.to_rfc3339(),
        entry
            .identifier
            .map(|id| id.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    Ok(())
}

/// Load the persisted index, building it from the source first if there is none.
pub async fn open_index(config: &Config) -> Result<OffsetIndex, RunError> {
    let columns = resolve_columns(config).await?;
    let layout = IndexLayout::from_config(&columns, &config.index)?;
    let path = config.index.index_path(&config.source.path);
    info!(index = %path.display(), "Opening offset index");
    Ok(OffsetIndex::load_or_build(&path, &layout, &config.source).await?)
}

pub fn find<'a>(
    index: &'a OffsetIndex,
    config: &Config,
    key: &LookupKey,
) -> Result<&'a IndexEntry, RunError> {
    let entry = match key {
        LookupKey::Date(text) => {
            let timestamp = TimestampFormat::new(&config.index.date_format).parse(text)?;
            index.find_by_date(&timestamp)?
        }
        LookupKey::Identifier(id) => index.find_by_identifier(id)?,
    };
    Ok(entry)
}
