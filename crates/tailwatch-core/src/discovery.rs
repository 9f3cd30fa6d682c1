//! Finds the log directories to tail under a plugin's root.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::collector::{Collector, ParserCollector, ScannerCollector, SendCollector, SmtpCollector};
use crate::error::{EngineError, Result};
use crate::notifier::Notifier;
use crate::registry::{CURRENT_LOG_FILE_NAME, Registry, WatchEntry};

/// Which collector a log directory gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Send,
    Smtp,
    Parser,
    Scanner,
}

impl LogKind {
    pub fn build(self) -> Box<dyn Collector> {
        match self {
            LogKind::Send => Box::new(SendCollector::new()),
            LogKind::Smtp => Box::new(SmtpCollector::new()),
            LogKind::Parser => Box::new(ParserCollector::new()),
            LogKind::Scanner => Box::new(ScannerCollector::new()),
        }
    }
}

/// Set of log kinds a plugin recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Qmail,
    Scanner,
}

impl Family {
    /// Maps a directory name to its log kind by substring.
    pub fn classify(self, dir_name: &str) -> Option<LogKind> {
        match self {
            Family::Qmail if dir_name.contains("send") => Some(LogKind::Send),
            Family::Qmail if dir_name.contains("smtp") => Some(LogKind::Smtp),
            Family::Qmail if dir_name.contains("parser") => Some(LogKind::Parser),
            Family::Scanner if dir_name.contains("scannerd") => Some(LogKind::Scanner),
            _ => None,
        }
    }
}

/// Registers a watch for every recognized subdirectory of `root`, in name
/// order, and returns how many were added.
///
/// Directories whose watch cannot be set up are logged and skipped. Only
/// an unreadable root or a failed registry allocation is an error.
pub fn discover<N: Notifier + ?Sized>(
    root: &Path,
    family: Family,
    line_capacity: usize,
    registry: &mut Registry,
    notifier: &mut N,
) -> Result<usize> {
    let mut names: Vec<String> = fs::read_dir(root)
        .map_err(|e| EngineError::file(root, e))?
        .flatten()
        .filter(|entry| entry.file_type().is_ok_and(|ft| ft.is_dir()))
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| !name.starts_with('.'))
        .collect();
    names.sort();

    let mut added = 0;
    for name in names {
        let Some(kind) = family.classify(&name) else {
            continue;
        };
        let dir = root.join(&name);
        // Reserved before subscribing so a full registry never strands a watch.
        registry.reserve(1)?;
        match WatchEntry::open(
            &dir,
            CURRENT_LOG_FILE_NAME,
            name.as_str(),
            kind.build(),
            line_capacity,
            notifier,
        ) {
            Ok(entry) => {
                registry.add(entry)?;
                info!("{}: tailing as {:?}", dir.display(), kind);
                added += 1;
            }
            Err(e) => warn!("{}: skipped: {}", dir.display(), e),
        }
    }
    Ok(added)
}
