//! Applies filesystem events to the registry.

use tracing::{debug, error, trace, warn};

use crate::collector::Aggregates;
use crate::notifier::{FsEvent, FsEventKind};
use crate::registry::Registry;

/// What one event caused.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchOutcome {
    /// Watches whose file was reopened.
    pub rotated: usize,
    /// Lines handed to collectors while handling the event.
    pub drained_lines: usize,
}

/// Routes `event` to the watches whose tailed file it names.
///
/// - `Created` on a watched file is a rotation: drain the old handle,
///   then reopen. A failed reopen stalls that watch only.
/// - `Modified` drains new content early, so a notifier that reports
///   content changes is handled as well as one reporting creations only.
/// - Everything else, and events for paths nobody watches, is ignored.
pub fn dispatch(
    registry: &mut Registry,
    event: &FsEvent,
    shared: &mut Aggregates,
) -> DispatchOutcome {
    let mut outcome = DispatchOutcome::default();

    for path in &event.paths {
        let Some(index) = registry.find(path) else {
            trace!("no watch for {}", path.display());
            continue;
        };
        let Some(entry) = registry.get_mut(index) else {
            continue;
        };

        match event.kind {
            FsEventKind::Created => match entry.reopen(shared) {
                Ok(reopen) => {
                    outcome.rotated += usize::from(reopen.rotated);
                    outcome.drained_lines += reopen.drained;
                }
                Err(e) => error!("{}: watch stalled: {}", entry.dir().display(), e),
            },
            FsEventKind::Modified => match entry.drain(shared) {
                Ok(lines) => outcome.drained_lines += lines,
                Err(e) => warn!("{}: {}", entry.dir().display(), e),
            },
            FsEventKind::Removed => {
                debug!(
                    "{}: {} removed, waiting for its replacement",
                    entry.dir().display(),
                    entry.file_name()
                );
            }
            FsEventKind::Other => {}
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::RecordingCollector;
    use crate::notifier::RecordingNotifier;
    use crate::registry::{CURRENT_LOG_FILE_NAME, WatchEntry};
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Fixture {
        _root: TempDir,
        dir: PathBuf,
        registry: Registry,
        collector: RecordingCollector,
    }

    fn fixture() -> Fixture {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("smtpd");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CURRENT_LOG_FILE_NAME), b"").unwrap();

        let collector = RecordingCollector::default();
        let mut notifier = RecordingNotifier::new();
        let mut registry = Registry::new();
        let entry = WatchEntry::open(
            &dir,
            CURRENT_LOG_FILE_NAME,
            "smtpd",
            Box::new(collector.clone()),
            64,
            &mut notifier,
        )
        .unwrap();
        registry.add(entry).unwrap();

        Fixture {
            _root: root,
            dir,
            registry,
            collector,
        }
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data).unwrap();
    }

    #[test]
    fn test_created_current_rotates() {
        let mut fx = fixture();
        let current = fx.dir.join(CURRENT_LOG_FILE_NAME);
        append(&current, b"one\ntwo\n");
        fs::rename(&current, fx.dir.join("@4000.s")).unwrap();
        fs::write(&current, b"three\n").unwrap();

        let mut shared = Aggregates::default();
        let outcome = dispatch(
            &mut fx.registry,
            &FsEvent::new(FsEventKind::Created, &current),
            &mut shared,
        );
        assert_eq!(outcome, DispatchOutcome { rotated: 1, drained_lines: 2 });

        let outcome = dispatch(
            &mut fx.registry,
            &FsEvent::new(FsEventKind::Modified, &current),
            &mut shared,
        );
        assert_eq!(outcome.drained_lines, 1);
        assert_eq!(fx.collector.seen(), vec!["one", "two", "three"]);
    }

    #[test]
    fn test_repeated_created_reads_new_file_once() {
        let mut fx = fixture();
        let current = fx.dir.join(CURRENT_LOG_FILE_NAME);
        fs::rename(&current, fx.dir.join("@1.s")).unwrap();
        fs::write(&current, b"").unwrap();
        fs::rename(&current, fx.dir.join("@2.s")).unwrap();
        fs::write(&current, b"third file line\n").unwrap();

        let mut shared = Aggregates::default();
        let created = FsEvent::new(FsEventKind::Created, &current);
        let first = dispatch(&mut fx.registry, &created, &mut shared);
        assert_eq!(first, DispatchOutcome { rotated: 1, drained_lines: 0 });
        let second = dispatch(&mut fx.registry, &created, &mut shared);
        assert_eq!(second, DispatchOutcome { rotated: 0, drained_lines: 1 });

        let entry = fx.registry.get_mut(0).unwrap();
        assert_eq!(entry.drain(&mut shared).unwrap(), 0);
        assert_eq!(fx.collector.seen(), vec!["third file line"]);
    }

    #[test]
    fn test_unrelated_paths_are_ignored() {
        let mut fx = fixture();
        let mut shared = Aggregates::default();
        for path in [fx.dir.join("lock"), PathBuf::from("/elsewhere/current")] {
            let outcome = dispatch(
                &mut fx.registry,
                &FsEvent::new(FsEventKind::Created, path),
                &mut shared,
            );
            assert_eq!(outcome, DispatchOutcome::default());
        }
        assert!(!fx.registry.get(0).unwrap().is_stalled());
    }

    #[test]
    fn test_failed_reopen_stalls_only_that_watch() {
        let mut fx = fixture();
        let current = fx.dir.join(CURRENT_LOG_FILE_NAME);
        fs::remove_file(&current).unwrap();

        let mut shared = Aggregates::default();
        let outcome = dispatch(
            &mut fx.registry,
            &FsEvent::new(FsEventKind::Created, &current),
            &mut shared,
        );
        assert_eq!(outcome.rotated, 0);
        let entry = fx.registry.get(0).unwrap();
        assert!(entry.is_stalled());
        assert!(entry.has_open_file());
    }

    #[test]
    fn test_removed_and_other_do_nothing() {
        let mut fx = fixture();
        let current = fx.dir.join(CURRENT_LOG_FILE_NAME);
        append(&current, b"pending\n");

        let mut shared = Aggregates::default();
        for kind in [FsEventKind::Removed, FsEventKind::Other] {
            let outcome = dispatch(&mut fx.registry, &FsEvent::new(kind, &current), &mut shared);
            assert_eq!(outcome, DispatchOutcome::default());
        }
        assert!(fx.collector.seen().is_empty());
    }
}
