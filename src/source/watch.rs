use notify::event::ModifyKind;
use notify::{
    Config as NotifyConfig, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error};

pub const WATCHER_CHANNEL_CAPACITY: usize = 64;

/// What happened to the watched file, ordered by how much work it forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileChange {
    /// Nothing arrived before the timeout.
    Timeout,
    /// Data was written; the open handle is still the right one.
    Modified,
    /// Removed, renamed or had its attributes changed; the path must be reopened.
    Replaced,
}

/// Change notifications for a single file.
///
/// The watch follows the file that was open when it was created, so it must be
/// rebuilt after every reopen.
pub struct FileWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<FileChange>,
}

impl FileWatcher {
    pub fn new(path: &Path) -> notify::Result<Self> {
        let (tx, rx) = mpsc::channel(WATCHER_CHANNEL_CAPACITY);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    if let Some(change) = classify(&event) {
                        send_change(&tx, change);
                    }
                }
                Err(err) => error!(error = %err, "file watcher error"),
            },
            NotifyConfig::default(),
        )?;

        watcher.watch(path, RecursiveMode::NonRecursive)?;
        debug!(path = %path.display(), "file watcher started");

        Ok(Self {
            _watcher: watcher,
            events: rx,
        })
    }

    /// Block up to `timeout` for the next change; events that are already
    /// queued behind it are coalesced into the strongest one.
    pub async fn wait(&mut self, timeout: Duration) -> FileChange {
        let first = match tokio::time::timeout(timeout, self.events.recv()).await {
            Ok(Some(change)) => change,
            Ok(None) | Err(_) => return FileChange::Timeout,
        };

        let mut change = first;
        while let Ok(next) = self.events.try_recv() {
            change = change.max(next);
        }
        change
    }
}

fn classify(event: &Event) -> Option<FileChange> {
    match event.kind {
        EventKind::Modify(ModifyKind::Name(_))
        | EventKind::Modify(ModifyKind::Metadata(_))
        | EventKind::Remove(_) => Some(FileChange::Replaced),
        EventKind::Modify(_) | EventKind::Create(_) => Some(FileChange::Modified),
        _ => None,
    }
}

fn send_change(tx: &mpsc::Sender<FileChange>, change: FileChange) {
    match tx.try_send(change) {
        Ok(_) => {}
        // A full queue already guarantees a wake-up.
        Err(TrySendError::Full(_)) => debug!(?change, "watcher channel full; dropping file event"),
        Err(TrySendError::Closed(_)) => debug!(?change, "watcher channel closed; dropping file event"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind, RenameMode};

    #[test]
    fn test_classify_events() {
        let data = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Any)));
        assert_eq!(classify(&data), Some(FileChange::Modified));

        let rename = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::From)));
        assert_eq!(classify(&rename), Some(FileChange::Replaced));

        let attrib = Event::new(EventKind::Modify(ModifyKind::Metadata(MetadataKind::Any)));
        assert_eq!(classify(&attrib), Some(FileChange::Replaced));

        let removed = Event::new(EventKind::Remove(RemoveKind::File));
        assert_eq!(classify(&removed), Some(FileChange::Replaced));

        let created = Event::new(EventKind::Create(CreateKind::File));
        assert_eq!(classify(&created), Some(FileChange::Modified));

        let access = Event::new(EventKind::Access(AccessKind::Any));
        assert_eq!(classify(&access), None);
    }

    #[test]
    fn test_change_ordering() {
        assert!(FileChange::Replaced > FileChange::Modified);
        assert!(FileChange::Modified > FileChange::Timeout);
    }

    #[tokio::test]
    async fn test_wait_times_out_without_events() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut watcher = FileWatcher::new(file.path()).unwrap();
        let change = watcher.wait(Duration::from_millis(50)).await;
        assert_eq!(change, FileChange::Timeout);
    }
}
