use super::watch::{FileChange, FileWatcher};
use super::{LineSource, SourceError, SourceLine};
use crate::config::types::{Encoding, SourceConfig, WatchMode};
use async_trait::async_trait;
use regex::bytes::Regex;
use std::borrow::Cow;
use std::fs::{File, Metadata};
use std::io::{BufRead, BufReader, ErrorKind, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Poll interval used in event mode while no notification watch is available.
const FALLBACK_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct TailOptions {
    pub encoding: Encoding,
    /// Complete lines discarded once, before anything is emitted.
    pub skip_lines: u64,
    /// Emit only lines whose counter is a multiple of this; 0 or 1 keeps every line.
    pub every_nth: u64,
    pub watch: WatchMode,
    pub event_timeout: Duration,
    pub rewrite: Option<LineRewrite>,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            encoding: Encoding::utf8(),
            skip_lines: 0,
            every_nth: 0,
            watch: WatchMode::Off,
            event_timeout: Duration::from_secs(60),
            rewrite: None,
        }
    }
}

impl TailOptions {
    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        Ok(Self {
            encoding: config.encoding,
            skip_lines: config.effective_skip_lines(),
            every_nth: config.every_nth.unwrap_or(0),
            watch: config.watch,
            event_timeout: config.event_timeout,
            rewrite: LineRewrite::new(
                config.regex_search.as_deref(),
                config.regex_replace.as_deref(),
            )?,
        })
    }
}

/// A single pattern/replacement pair applied to the raw bytes of every candidate line.
#[derive(Debug, Clone)]
pub struct LineRewrite {
    pattern: Regex,
    replacement: Vec<u8>,
}

impl LineRewrite {
    pub fn new(search: Option<&str>, replace: Option<&str>) -> Result<Option<Self>, SourceError> {
        match (search, replace) {
            (None, None) => Ok(None),
            (Some(search), Some(replace)) => {
                let pattern = Regex::new(search)
                    .map_err(|e| SourceError::Config(format!("invalid regex_search: {}", e)))?;
                Ok(Some(Self {
                    pattern,
                    replacement: replace.as_bytes().to_vec(),
                }))
            }
            (Some(_), None) => Err(SourceError::Config(
                "regex_replace must be set when regex_search is set".to_string(),
            )),
            (None, Some(_)) => Err(SourceError::Config(
                "regex_search must be set when regex_replace is set".to_string(),
            )),
        }
    }

    pub fn apply<'a>(&self, line: &'a [u8]) -> Cow<'a, [u8]> {
        self.pattern.replace_all(line, self.replacement.as_slice())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailState {
    Reading,
    EofWait,
    Closed,
}

/// Follows one file, yielding complete lines with the offset each one starts at.
pub struct TailingSource {
    path: PathBuf,
    options: TailOptions,

    file: Option<BufReader<File>>,
    file_id: Option<u64>,
    watcher: Option<FileWatcher>,

    // Position of the next unread byte; always the start of a line.
    position: u64,
    state: TailState,
    skip_remaining: u64,
    // Physical lines seen after the leading skip, emitted or not.
    counter: u64,
    emitted: u64,
    eof_logged: bool,
}

impl TailingSource {
    /// Open `path` positioned at its first byte.
    pub fn open(path: impl Into<PathBuf>, options: TailOptions) -> Result<Self, SourceError> {
        let mut source = Self {
            path: path.into(),
            skip_remaining: options.skip_lines,
            options,
            file: None,
            file_id: None,
            watcher: None,
            position: 0,
            state: TailState::Reading,
            counter: 0,
            emitted: 0,
            eof_logged: false,
        };
        source.open_file()?;
        Ok(source)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> TailState {
        self.state
    }

    /// Number of lines emitted so far.
    pub fn current_line(&self) -> u64 {
        self.emitted
    }

    pub fn tell(&self) -> u64 {
        self.position
    }

    pub fn seek(&mut self, offset: u64) -> Result<bool, SourceError> {
        if self.file.is_none() {
            return Ok(false);
        }

        let size = self.file_size()?;
        if offset > size {
            warn!(
                path = %self.path.display(),
                offset,
                size,
                "seek past end of file ignored"
            );
            return Ok(false);
        }

        self.reader_mut()?.seek(SeekFrom::Start(offset))?;
        self.position = offset;
        self.state = TailState::Reading;

        // A resume point is already past the leading lines.
        if offset > 0 && self.skip_remaining > 0 {
            debug!(
                skipped = self.skip_remaining,
                "leading line skip cancelled by seek"
            );
            self.skip_remaining = 0;
        }

        // The line at `offset` is the next one emitted; sampling continues
        // every `every_nth` lines from there.
        self.counter = if self.skip_remaining > 0 {
            0
        } else {
            self.options.every_nth.saturating_sub(1)
        };

        Ok(true)
    }

    /// Read the next emitted line, waiting at end of file when watching.
    pub async fn next_line(&mut self) -> Result<Option<SourceLine>, SourceError> {
        let mut buf = Vec::new();

        loop {
            match self.state {
                TailState::Closed => return Ok(None),
                TailState::EofWait => {
                    self.wait_for_change().await?;
                    continue;
                }
                TailState::Reading => {}
            }

            buf.clear();
            let line_start = self.position;
            let bytes_read = self.reader_mut()?.read_until(b'\n', &mut buf)?;

            if buf.last() != Some(&b'\n') {
                if bytes_read > 0 {
                    // Unterminated fragment: leave it to be read whole later.
                    self.reader_mut()?.seek(SeekFrom::Start(line_start))?;
                }
                self.handle_eof();
                continue;
            }

            self.position += bytes_read as u64;

            if self.skip_remaining > 0 {
                self.skip_remaining -= 1;
                continue;
            }

            self.counter += 1;
            if self.options.every_nth > 1 && self.counter % self.options.every_nth != 0 {
                continue;
            }

            let content_len = buf.len() - 1 - usize::from(buf.ends_with(b"\r\n"));
            let content = &buf[..content_len];
            let raw = match &self.options.rewrite {
                Some(rewrite) => rewrite.apply(content),
                None => Cow::Borrowed(content),
            };
            let text = decode(self.options.encoding, &raw, line_start)?;

            self.emitted += 1;
            return Ok(Some(SourceLine {
                text,
                line: self.emitted,
                offset: line_start,
            }));
        }
    }

    fn handle_eof(&mut self) {
        if !self.eof_logged {
            info!(
                path = %self.path.display(),
                offset = self.position,
                "end of file reached"
            );
            self.eof_logged = true;
        }

        if self.options.watch.is_watching() {
            self.state = TailState::EofWait;
        } else {
            debug!(path = %self.path.display(), "reached end of file and not watching, closing");
            self.state = TailState::Closed;
        }
    }

    async fn wait_for_change(&mut self) -> Result<(), SourceError> {
        if self.check_rotation()? {
            return Ok(());
        }

        let change = match (self.options.watch, self.watcher.as_mut()) {
            (WatchMode::Off, _) => {
                self.state = TailState::Closed;
                return Ok(());
            }
            (WatchMode::Events, Some(watcher)) if self.file.is_some() => {
                watcher.wait(self.options.event_timeout).await
            }
            (WatchMode::Events, _) => {
                sleep(FALLBACK_POLL_INTERVAL).await;
                FileChange::Modified
            }
            (WatchMode::Poll(interval), _) => {
                sleep(interval).await;
                FileChange::Modified
            }
        };

        match change {
            FileChange::Replaced => {
                if self.has_unread_bytes()? && self.has_complete_line()? {
                    // The watch follows the old file; poll until it is drained.
                    debug!(path = %self.path.display(), "draining replaced file");
                    self.watcher = None;
                    self.rejoin()?;
                } else {
                    info!(path = %self.path.display(), "file has changed, reopening");
                    self.reopen()?;
                }
            }
            FileChange::Modified => {
                if !self.check_rotation()? {
                    self.rejoin()?;
                }
            }
            FileChange::Timeout => {
                // Covers notifications lost while the watch was being rebuilt.
                if !self.check_rotation()? && self.has_unread_bytes()? {
                    debug!(path = %self.path.display(), "file grew without a notification");
                    self.rejoin()?;
                }
            }
        }

        Ok(())
    }

    /// Truncation and rotation guard; returns true when reading can resume
    /// without waiting for a change.
    fn check_rotation(&mut self) -> Result<bool, SourceError> {
        if self.file.is_none() {
            return self.reopen();
        }

        let size = self.file_size()?;
        if self.position > size {
            info!(
                path = %self.path.display(),
                position = self.position,
                size,
                "file size has reduced, reopening"
            );
            return self.reopen();
        }

        match std::fs::metadata(&self.path) {
            Ok(metadata) if Some(file_id(&metadata)) != self.file_id => {
                // Finish the complete lines left in the old file first.
                if self.position < size && self.has_complete_line()? {
                    debug!(path = %self.path.display(), "draining rotated file");
                    self.rejoin()?;
                    return Ok(true);
                }
                info!(path = %self.path.display(), "file was rotated, reopening");
                self.reopen()
            }
            Ok(_) => Ok(false),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(source) => Err(SourceError::Open {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Close and reopen the path. The position survives only when the path
    /// still names the same file and that file has not shrunk.
    fn reopen(&mut self) -> Result<bool, SourceError> {
        let previous_id = self.file_id;
        let previous_position = self.position;
        self.file = None;
        self.watcher = None;

        match self.open_file() {
            Ok(()) => {
                let size = self.file_size()?;
                if previous_id.is_some() && self.file_id == previous_id && previous_position <= size
                {
                    self.reader_mut()?.seek(SeekFrom::Start(previous_position))?;
                    self.position = previous_position;
                } else {
                    info!(path = %self.path.display(), "reading reopened file from the beginning");
                }
                self.state = TailState::Reading;
                self.eof_logged = false;
                Ok(true)
            }
            Err(SourceError::Open { source, .. }) if source.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "file is missing, waiting for it to reappear");
                self.state = TailState::EofWait;
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn rejoin(&mut self) -> Result<(), SourceError> {
        let position = self.position;
        if let Some(reader) = self.file.as_mut() {
            reader.seek(SeekFrom::Start(position))?;
            self.state = TailState::Reading;
        }
        Ok(())
    }

    fn open_file(&mut self) -> Result<(), SourceError> {
        let file = File::open(&self.path).map_err(|source| SourceError::Open {
            path: self.path.clone(),
            source,
        })?;
        let metadata = file.metadata()?;
        self.file_id = Some(file_id(&metadata));
        self.file = Some(BufReader::new(file));
        self.position = 0;

        if self.options.watch == WatchMode::Events {
            self.watcher = match FileWatcher::new(&self.path) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        error = %e,
                        "file notifications unavailable, polling instead"
                    );
                    None
                }
            };
        }

        debug!(path = %self.path.display(), "opened source file");
        Ok(())
    }

    fn has_complete_line(&mut self) -> Result<bool, SourceError> {
        let position = self.position;
        let reader = self.reader_mut()?;
        let mut rest = Vec::new();
        reader.seek(SeekFrom::Start(position))?;
        reader.read_until(b'\n', &mut rest)?;
        reader.seek(SeekFrom::Start(position))?;
        Ok(rest.last() == Some(&b'\n'))
    }

    fn has_unread_bytes(&self) -> Result<bool, SourceError> {
        if self.file.is_none() {
            return Ok(false);
        }
        Ok(self.file_size()? > self.position)
    }

    fn file_size(&self) -> Result<u64, SourceError> {
        match &self.file {
            Some(reader) => Ok(reader.get_ref().metadata()?.len()),
            None => Err(not_open()),
        }
    }

    fn reader_mut(&mut self) -> Result<&mut BufReader<File>, SourceError> {
        self.file.as_mut().ok_or_else(not_open)
    }
}

#[async_trait]
impl LineSource for TailingSource {
    async fn next_line(&mut self) -> Result<Option<SourceLine>, SourceError> {
        TailingSource::next_line(self).await
    }

    fn tell(&self) -> u64 {
        TailingSource::tell(self)
    }

    fn seek(&mut self, offset: u64) -> Result<bool, SourceError> {
        TailingSource::seek(self, offset)
    }
}

fn decode(encoding: Encoding, raw: &[u8], offset: u64) -> Result<String, SourceError> {
    let codec = encoding.codec();
    if encoding.is_lossy() {
        let (text, _) = codec.decode_without_bom_handling(raw);
        return Ok(text.into_owned());
    }

    codec
        .decode_without_bom_handling_and_without_replacement(raw)
        .map(|text| text.into_owned())
        .ok_or_else(|| SourceError::Malformed {
            offset,
            reason: format!("invalid {} byte sequence", codec.name()),
        })
}

fn not_open() -> SourceError {
    SourceError::Io(std::io::Error::new(
        ErrorKind::NotFound,
        "source file is not open",
    ))
}

#[cfg(unix)]
fn file_id(metadata: &Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

// No stable file identity here; rotation is detected by truncation only.
#[cfg(not(unix))]
fn file_id(_metadata: &Metadata) -> u64 {
    0
}
