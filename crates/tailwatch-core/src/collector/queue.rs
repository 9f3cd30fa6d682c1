//! Mail queue size collector.
//!
//! Standalone: it tails nothing and counts the files under the queue's
//! `mess` and `todo` directories once per cycle.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

pub const DEFAULT_QUEUE_DIR: &str = "/var/qmail/queue";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueCollector {
    root: PathBuf,
    pub mess: i64,
    pub todo: i64,
}

impl QueueCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            mess: 0,
            todo: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Counts non-hidden regular files below `dir`, descending into
/// subdirectories. Symlinks are neither followed nor counted.
///
/// An unreadable directory counts as empty.
pub fn count_files(dir: &Path) -> i64 {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("cannot open dir {}: {}", dir.display(), e);
            return 0;
        }
    };

    let mut count = 0;
    for entry in entries.flatten() {
        if entry.file_name().as_encoded_bytes().starts_with(b".") {
            continue;
        }
        match entry.file_type() {
            Ok(ft) if ft.is_dir() => count += count_files(&entry.path()),
            Ok(ft) if ft.is_file() => count += 1,
            _ => {}
        }
    }
    count
}

impl Collector for QueueCollector {
    fn kind(&self) -> &'static str {
        "queue"
    }

    fn print_header(&mut self, _name: &str, out: &mut Emitter) -> io::Result<()> {
        out.chart(
            &Chart::new(ChartId::new("qmail", "queue", ""), ChartType::Area).context("qmail.queue"),
        )?;
        out.dimension(&Dimension::new("mess", "mess"))?;
        out.dimension(&Dimension::new("todo", "todo").multiplier(-1))
    }

    fn process(&mut self, _line: &[u8], _shared: &mut Aggregates) {}

    fn postprocess(&mut self, _shared: &mut Aggregates) {
        self.mess = count_files(&self.root.join("mess"));
        self.todo = count_files(&self.root.join("todo"));
    }

    fn print(&mut self, _name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("qmail", "queue", ""), elapsed_us)?;
        out.set("mess", self.mess)?;
        out.set("todo", self.todo)?;
        out.end()
    }

    fn clear(&mut self) {
        self.mess = 0;
        self.todo = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::testing::SharedBuffer;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn test_counts_nested_files() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("mess/0/1001"));
        touch(&dir.path().join("mess/0/1002"));
        touch(&dir.path().join("mess/5/2001"));
        touch(&dir.path().join("mess/5/.hidden"));
        touch(&dir.path().join("todo/3001"));
        fs::create_dir_all(dir.path().join("todo/empty")).unwrap();

        let mut collector = QueueCollector::new(dir.path());
        collector.postprocess(&mut Aggregates::default());
        assert_eq!(collector.mess, 3);
        assert_eq!(collector.todo, 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_not_followed() {
        let dir = TempDir::new().unwrap();
        let mess = dir.path().join("mess");
        touch(&mess.join("0/1001"));
        std::os::unix::fs::symlink(&mess, mess.join("0/loop")).unwrap();
        std::os::unix::fs::symlink(mess.join("0/1001"), mess.join("link")).unwrap();

        assert_eq!(count_files(&mess), 1);
    }

    #[test]
    fn test_missing_queue_counts_zero() {
        let dir = TempDir::new().unwrap();
        assert_eq!(count_files(&dir.path().join("absent")), 0);
    }

    #[test]
    fn test_print_frame() {
        let dir = TempDir::new().unwrap();
        touch(&dir.path().join("todo/1"));
        touch(&dir.path().join("todo/2"));

        let buf = SharedBuffer::default();
        let mut out = Emitter::new(buf.clone());
        let mut collector = QueueCollector::new(dir.path());
        collector.print_header("queue", &mut out).unwrap();
        collector.postprocess(&mut Aggregates::default());
        collector.print("queue", &mut out, 0).unwrap();
        collector.clear();

        assert_eq!(
            buf.lines(),
            vec![
                "CHART qmail.queue '' '' '' '' 'qmail.queue' area",
                "DIMENSION mess 'mess' absolute 1 1",
                "DIMENSION todo 'todo' absolute -1 1",
                "BEGIN qmail.queue",
                "SET mess = 0",
                "SET todo = 2",
                "END",
            ]
        );
        assert_eq!((collector.mess, collector.todo), (0, 0));
    }
}
