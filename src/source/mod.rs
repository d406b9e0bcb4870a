pub mod splitter;
pub mod tailer;
pub mod timestamp;
pub mod watch;

use async_trait::async_trait;
use std::path::PathBuf;
use thiserror::Error;

pub use splitter::{read_header, split_line, Record, RecordSplitter};
pub use tailer::{LineRewrite, TailOptions, TailState, TailingSource};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("invalid source configuration: {0}")]
    Config(String),

    #[error("cannot read {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed record at offset {offset}: {reason}")]
    Malformed { offset: u64, reason: String },
}

/// One terminated line, paired with its own start offset and its emission number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLine {
    pub text: String,
    /// 1-based count of lines emitted since the source was opened.
    pub line: u64,
    /// Byte position at which the line begins.
    pub offset: u64,
}

/// A positioned, restartable line reader.
#[async_trait]
pub trait LineSource: Send {
    /// Next complete line, or `None` once the source is closed.
    async fn next_line(&mut self) -> Result<Option<SourceLine>, SourceError>;

    /// Position of the next unread byte.
    fn tell(&self) -> u64;

    /// Reposition; returns `false` without moving if `offset` lies past the end of the file.
    fn seek(&mut self, offset: u64) -> Result<bool, SourceError>;
}
