//! Filesystem notification seam.
//!
//! Production code subscribes directories through `notify`'s
//! `RecommendedWatcher` (inotify on Linux) and receives its events over a
//! crossbeam channel. Tests use [`RecordingNotifier`] and feed [`FsEvent`]s
//! by hand.

use std::path::{Path, PathBuf};

use crossbeam_channel::Receiver;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::error::{EngineError, Result};

/// Source of "something changed in this directory" subscriptions.
pub trait Notifier {
    /// Subscribes to entry creation (and content changes) inside `dir`.
    fn watch_dir(&mut self, dir: &Path) -> Result<()>;

    /// Drops the subscription for `dir`.
    fn unwatch_dir(&mut self, dir: &Path) -> Result<()>;
}

impl Notifier for RecommendedWatcher {
    fn watch_dir(&mut self, dir: &Path) -> Result<()> {
        self.watch(dir, RecursiveMode::NonRecursive)
            .map_err(|e| EngineError::Notification(format!("watch {}: {}", dir.display(), e)))
    }

    fn unwatch_dir(&mut self, dir: &Path) -> Result<()> {
        self.unwatch(dir)
            .map_err(|e| EngineError::Notification(format!("unwatch {}: {}", dir.display(), e)))
    }
}

/// Raw notification stream as delivered by the watcher backend.
pub type RawEvents = Receiver<notify::Result<notify::Event>>;

/// Creates the platform watcher together with the channel its events land on.
pub fn channel_watcher() -> Result<(RecommendedWatcher, RawEvents)> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let watcher = notify::recommended_watcher(move |res| {
        // Receiver gone means the scheduler is shutting down.
        let _ = tx.send(res);
    })?;
    Ok((watcher, rx))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsEventKind {
    /// A directory entry appeared (created or renamed into place).
    Created,
    /// File content changed.
    Modified,
    /// A directory entry went away.
    Removed,
    Other,
}

/// Engine-level view of one notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FsEvent {
    pub kind: FsEventKind,
    pub paths: Vec<PathBuf>,
}

impl FsEvent {
    pub fn new(kind: FsEventKind, path: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            paths: vec![path.into()],
        }
    }

    /// Converts a backend event. Events that name no path carry nothing we
    /// could act on and yield `None`.
    pub fn from_notify(event: notify::Event) -> Option<Self> {
        let mut paths = event.paths;
        let kind = match event.kind {
            EventKind::Create(_) => FsEventKind::Created,
            EventKind::Modify(ModifyKind::Name(RenameMode::To)) => FsEventKind::Created,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
                // [from, to]: only the destination matters here.
                let to = paths.pop()?;
                paths = vec![to];
                FsEventKind::Created
            }
            EventKind::Modify(ModifyKind::Name(RenameMode::From)) => FsEventKind::Removed,
            EventKind::Modify(_) => FsEventKind::Modified,
            EventKind::Remove(_) => FsEventKind::Removed,
            EventKind::Access(_) | EventKind::Any | EventKind::Other => FsEventKind::Other,
        };

        if paths.is_empty() {
            return None;
        }

        Some(Self { kind, paths })
    }
}

/// In-memory notifier that records every subscription change.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    /// Directories currently subscribed.
    pub active: Vec<PathBuf>,
    /// Every `watch_dir` call, in order.
    pub subscribed: Vec<PathBuf>,
    /// Every `unwatch_dir` call, in order.
    pub released: Vec<PathBuf>,
    /// `watch_dir` on this directory fails.
    pub fail_on: Option<PathBuf>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Notifier for RecordingNotifier {
    fn watch_dir(&mut self, dir: &Path) -> Result<()> {
        if self.fail_on.as_deref() == Some(dir) {
            return Err(EngineError::Notification(format!(
                "watch {}: refused",
                dir.display()
            )));
        }
        self.subscribed.push(dir.to_path_buf());
        self.active.push(dir.to_path_buf());
        Ok(())
    }

    fn unwatch_dir(&mut self, dir: &Path) -> Result<()> {
        let Some(pos) = self.active.iter().position(|d| d == dir) else {
            return Err(EngineError::Notification(format!(
                "unwatch {}: not watched",
                dir.display()
            )));
        };
        self.active.remove(pos);
        self.released.push(dir.to_path_buf());
        Ok(())
    }
}
