//! Watch registry: the set of tailed `<dir>/current` files.
//!
//! Each [`WatchEntry`] owns the open handle of its file, the directory
//! subscription, the line reader state and the bound collector. Entries
//! are opened at end-of-file so historical content is never replayed; on
//! rotation the replacement file is read from offset 0.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::collector::{Aggregates, Binding, Collector};
use crate::emitter::Emitter;
use crate::error::{EngineError, Result};
use crate::line_reader::LineReader;
use crate::notifier::Notifier;

/// Name of the tailed file inside every watched directory.
pub const CURRENT_LOG_FILE_NAME: &str = "current";

const READ_CHUNK: usize = 8192;

/// Device and inode of an open file.
type FileIdentity = (u64, u64);

#[cfg(unix)]
fn file_identity(file: &File) -> Option<FileIdentity> {
    use std::os::unix::fs::MetadataExt;
    file.metadata().ok().map(|m| (m.dev(), m.ino()))
}

/// Without inode numbers every reopen is treated as a new file.
#[cfg(not(unix))]
fn file_identity(_file: &File) -> Option<FileIdentity> {
    None
}

/// Result of [`WatchEntry::reopen`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reopen {
    /// Lines drained from the handle that was open before the event.
    pub drained: usize,
    /// False when `current` still was the file already being read.
    pub rotated: bool,
}

/// One tailed file.
pub struct WatchEntry {
    dir: PathBuf,
    file_name: String,
    file: Option<File>,
    identity: Option<FileIdentity>,
    reader: LineReader,
    binding: Binding,
    stalled: bool,
}

impl WatchEntry {
    /// Opens `<dir>/<file_name>` positioned at its end and subscribes `dir`.
    ///
    /// Nothing is subscribed when the file cannot be opened.
    pub fn open<N: Notifier + ?Sized>(
        dir: impl Into<PathBuf>,
        file_name: &str,
        name: impl Into<String>,
        collector: Box<dyn Collector>,
        line_capacity: usize,
        notifier: &mut N,
    ) -> Result<Self> {
        let dir = dir.into();
        let path = dir.join(file_name);
        let mut file = File::open(&path).map_err(|e| EngineError::file(&path, e))?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| EngineError::file(&path, e))?;
        notifier.watch_dir(&dir)?;

        debug!("watching {}", path.display());
        Ok(Self {
            dir,
            file_name: file_name.to_string(),
            identity: file_identity(&file),
            file: Some(file),
            reader: LineReader::new(line_capacity),
            binding: Binding::new(name, collector),
            stalled: false,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    pub fn name(&self) -> &str {
        self.binding.name()
    }

    pub fn reader(&self) -> &LineReader {
        &self.reader
    }

    pub fn has_open_file(&self) -> bool {
        self.file.is_some()
    }

    /// Set when the last rotation or read failed; cleared by the next
    /// successful reopen.
    pub fn is_stalled(&self) -> bool {
        self.stalled
    }

    /// Whether `path` names this entry's tailed file.
    pub fn matches(&self, path: &Path) -> bool {
        path.parent() == Some(self.dir.as_path())
            && path.file_name().is_some_and(|n| n == self.file_name.as_str())
    }

    /// Reads everything appended since the last drain and hands the complete
    /// lines to the collector. Returns the number of lines delivered.
    pub fn drain(&mut self, shared: &mut Aggregates) -> Result<usize> {
        let Some(file) = self.file.as_mut() else {
            return Ok(0);
        };

        let mut chunk = [0u8; READ_CHUNK];
        let mut lines = 0;
        loop {
            let n = match file.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    self.stalled = true;
                    return Err(EngineError::file(self.dir.join(&self.file_name), e));
                }
            };
            let binding = &mut self.binding;
            self.reader.feed(&chunk[..n], |line| {
                binding.process(line, shared);
                lines += 1;
            });
        }
        Ok(lines)
    }

    /// Handles rotation: drains the old handle, then swaps in the new file
    /// read from offset 0 with a fresh reader.
    ///
    /// A `current` with the same device and inode as the open handle is
    /// not a new file (a repeated or stale creation event); the handle and
    /// reader state are kept so nothing is read twice.
    ///
    /// When the new file cannot be opened the old handle is kept and the
    /// entry is marked stalled.
    pub fn reopen(&mut self, shared: &mut Aggregates) -> Result<Reopen> {
        let drained = match self.drain(shared) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("{}: draining rotated file: {}", self.dir.display(), e);
                0
            }
        };

        let path = self.path();
        let file = match File::open(&path) {
            Ok(file) => file,
            Err(e) => {
                self.stalled = true;
                return Err(EngineError::file(path, e));
            }
        };

        let identity = file_identity(&file);
        if identity.is_some() && identity == self.identity && self.file.is_some() {
            debug!(
                "{}: {} is already open, not reopening",
                self.dir.display(),
                self.file_name
            );
            return Ok(Reopen { drained, rotated: false });
        }

        // The old handle closes here, after the new one is open.
        self.file = Some(file);
        self.identity = identity;
        self.reader.reset();
        self.stalled = false;

        info!("{}: reopened {} after rotation", self.dir.display(), self.file_name);
        Ok(Reopen { drained, rotated: true })
    }

    pub fn header(&mut self, out: &mut Emitter) -> io::Result<()> {
        self.binding.header(out)
    }

    pub fn report(&mut self, out: &mut Emitter, shared: &mut Aggregates) -> io::Result<()> {
        self.binding.report(out, shared)
    }

    /// Closes the file and drops the directory subscription.
    pub fn release<N: Notifier + ?Sized>(&mut self, notifier: &mut N) {
        self.file = None;
        self.identity = None;
        if let Err(e) = notifier.unwatch_dir(&self.dir) {
            warn!("{}: {}", self.dir.display(), e);
        }
    }
}

/// Insertion-ordered collection of watches.
#[derive(Default)]
pub struct Registry {
    entries: Vec<WatchEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes room for `additional` more entries.
    pub fn reserve(&mut self, additional: usize) -> Result<()> {
        self.entries.try_reserve(additional)?;
        Ok(())
    }

    /// Appends `entry` and returns its index.
    pub fn add(&mut self, entry: WatchEntry) -> Result<usize> {
        self.entries.try_reserve(1)?;
        self.entries.push(entry);
        Ok(self.entries.len() - 1)
    }

    pub fn get(&self, index: usize) -> Option<&WatchEntry> {
        self.entries.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut WatchEntry> {
        self.entries.get_mut(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WatchEntry> {
        self.entries.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut WatchEntry> {
        self.entries.iter_mut()
    }

    /// Index of the entry whose tailed file is `path`.
    pub fn find(&self, path: &Path) -> Option<usize> {
        self.entries.iter().position(|e| e.matches(path))
    }

    /// Releases every entry in registration order and empties the registry.
    pub fn release_all<N: Notifier + ?Sized>(&mut self, notifier: &mut N) {
        for mut entry in self.entries.drain(..) {
            entry.release(notifier);
        }
    }
}
