//! The single-threaded event loop.
//!
//! One `Select` over three channels:
//!
//! - `shutdown`: one message per termination request
//! - `fs_events`: notifications from the directory watcher
//! - `ticks`: the flush timer
//!
//! After every wake-up the sources are serviced in that priority order.
//! Termination ends the loop before any other work of the same pass, and
//! rotations are handled before the flush so a cycle never reports from a
//! handle that is about to be replaced.

use std::time::Instant;

use crossbeam_channel::{Receiver, Select, TryRecvError};
use tracing::{debug, error, info, warn};

use crate::collector::{Aggregates, Binding, Collector};
use crate::dispatcher::dispatch;
use crate::emitter::Emitter;
use crate::error::{EngineError, Result};
use crate::notifier::{FsEvent, Notifier, RawEvents};
use crate::registry::Registry;

/// Upper bound on notifications handled in one pass, so a flood of events
/// cannot starve the timer.
pub const MAX_EVENTS_PER_PASS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// A termination request was received.
    Terminated,
    /// Writing a report failed.
    OutputClosed,
    /// The timer or termination channel went away.
    SourcesClosed,
}

/// The channels the loop waits on.
pub struct Sources {
    pub shutdown: Receiver<()>,
    pub ticks: Receiver<Instant>,
    pub fs_events: RawEvents,
}

pub struct Scheduler<N: Notifier> {
    notifier: N,
    registry: Registry,
    standalone: Vec<Binding>,
    shared: Aggregates,
    out: Emitter,
    state: LoopState,
    cycles: u64,
}

impl<N: Notifier> Scheduler<N> {
    pub fn new(notifier: N, registry: Registry, out: Emitter) -> Self {
        Self {
            notifier,
            registry,
            standalone: Vec::new(),
            shared: Aggregates::default(),
            out,
            state: LoopState::Running,
            cycles: 0,
        }
    }

    /// Adds a collector that tails nothing. Standalone collectors are
    /// reported after every watch, in insertion order.
    pub fn add_standalone(
        &mut self,
        name: impl Into<String>,
        collector: Box<dyn Collector>,
    ) -> Result<()> {
        self.standalone.try_reserve(1)?;
        self.standalone.push(Binding::new(name, collector));
        Ok(())
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Completed flush cycles.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Number of collectors, tailed and standalone.
    pub fn collectors(&self) -> usize {
        self.registry.len() + self.standalone.len()
    }

    /// Declares every chart. Must run once before [`Scheduler::run`].
    pub fn print_headers(&mut self) -> Result<()> {
        for entry in self.registry.iter_mut() {
            entry.header(&mut self.out)?;
        }
        for binding in &mut self.standalone {
            binding.header(&mut self.out)?;
        }
        self.out.flush()?;
        Ok(())
    }

    /// Tells the consumer to stop polling us.
    pub fn disable(&mut self) -> Result<()> {
        self.out.disable()?;
        Ok(())
    }

    /// Runs until termination, output failure or loss of a source, then
    /// releases every watch.
    pub fn run(&mut self, sources: &Sources) -> StopReason {
        let mut fs_open = true;
        info!(
            "collecting from {} watches and {} standalone collectors",
            self.registry.len(),
            self.standalone.len()
        );

        let reason = loop {
            let mut sel = Select::new();
            sel.recv(&sources.shutdown);
            sel.recv(&sources.ticks);
            if fs_open {
                sel.recv(&sources.fs_events);
            }
            sel.ready();

            match sources.shutdown.try_recv() {
                Ok(()) => {
                    self.state = LoopState::Draining;
                    while sources.shutdown.try_recv().is_ok() {}
                    info!("termination requested");
                    break StopReason::Terminated;
                }
                Err(TryRecvError::Disconnected) => {
                    warn!("termination channel closed");
                    break StopReason::SourcesClosed;
                }
                Err(TryRecvError::Empty) => {}
            }

            if fs_open {
                fs_open = self.service_fs_events(&sources.fs_events);
            }

            let mut ticks = 0;
            let mut ticks_closed = false;
            loop {
                match sources.ticks.try_recv() {
                    Ok(_) => ticks += 1,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        ticks_closed = true;
                        break;
                    }
                }
            }
            if ticks > 1 {
                debug!("{} ticks coalesced into one flush", ticks);
            }
            if ticks > 0
                && let Err(e) = self.flush_cycle()
            {
                error!("{}", e);
                break StopReason::OutputClosed;
            }
            if ticks_closed {
                warn!("timer channel closed");
                break StopReason::SourcesClosed;
            }
        };

        self.shutdown();
        reason
    }

    /// Handles pending notifications. Returns `false` once the channel is
    /// disconnected.
    fn service_fs_events(&mut self, events: &RawEvents) -> bool {
        for _ in 0..MAX_EVENTS_PER_PASS {
            match events.try_recv() {
                Ok(Ok(event)) => {
                    let Some(event) = FsEvent::from_notify(event) else {
                        debug!("notification without paths ignored");
                        continue;
                    };
                    let outcome = dispatch(&mut self.registry, &event, &mut self.shared);
                    if outcome.rotated > 0 {
                        debug!(
                            "{} rotations, {} lines drained from old files",
                            outcome.rotated, outcome.drained_lines
                        );
                    }
                }
                Ok(Err(e)) => warn!("notification error: {}", e),
                Err(TryRecvError::Empty) => return true,
                Err(TryRecvError::Disconnected) => {
                    warn!("notification channel closed, rotations are no longer tracked");
                    return false;
                }
            }
        }
        true
    }

    /// One flush cycle: drain every watch, then postprocess, print and
    /// clear every collector, standalone ones last.
    pub fn flush_cycle(&mut self) -> Result<()> {
        for entry in self.registry.iter_mut() {
            if let Err(e) = entry.drain(&mut self.shared) {
                warn!("{}: {}", entry.dir().display(), e);
            }
            entry
                .report(&mut self.out, &mut self.shared)
                .map_err(EngineError::Output)?;
        }
        for binding in &mut self.standalone {
            binding
                .report(&mut self.out, &mut self.shared)
                .map_err(EngineError::Output)?;
        }
        self.out.flush().map_err(EngineError::Output)?;
        self.shared.clear();
        self.cycles += 1;
        Ok(())
    }

    /// Releases every watch in registration order, then the standalone
    /// collectors. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if self.state == LoopState::Stopped {
            return;
        }
        self.state = LoopState::Draining;
        self.registry.release_all(&mut self.notifier);
        self.standalone.clear();
        self.state = LoopState::Stopped;
        debug!("all watches released");
    }
}

impl<N: Notifier> Drop for Scheduler<N> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::testing::RecordingCollector;
    use crate::emitter::testing::{ClosedPipe, SharedBuffer};
    use crate::notifier::RecordingNotifier;
    use crate::registry::{CURRENT_LOG_FILE_NAME, WatchEntry};
    use crossbeam_channel::{Sender, unbounded};
    use notify::EventKind;
    use notify::event::CreateKind;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct Harness {
        root: TempDir,
        shutdown_tx: Sender<()>,
        tick_tx: Sender<Instant>,
        fs_tx: Sender<notify::Result<notify::Event>>,
        sources: Sources,
    }

    impl Harness {
        fn new() -> Self {
            let (shutdown_tx, shutdown) = unbounded();
            let (tick_tx, ticks) = unbounded();
            let (fs_tx, fs_events) = unbounded();
            Self {
                root: TempDir::new().unwrap(),
                shutdown_tx,
                tick_tx,
                fs_tx,
                sources: Sources {
                    shutdown,
                    ticks,
                    fs_events,
                },
            }
        }

        fn log_dir(&self, name: &str) -> PathBuf {
            let dir = self.root.path().join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join(CURRENT_LOG_FILE_NAME), b"").unwrap();
            dir
        }

        fn created(&self, path: &Path) {
            let event =
                notify::Event::new(EventKind::Create(CreateKind::File)).add_path(path.to_path_buf());
            self.fs_tx.send(Ok(event)).unwrap();
        }

        /// One tick, then the timer goes away so `run` returns after the flush.
        fn last_tick(&mut self) {
            self.tick_tx.send(Instant::now()).unwrap();
            let (tick_tx, _) = unbounded();
            drop(std::mem::replace(&mut self.tick_tx, tick_tx));
        }
    }

    fn append(path: &Path, data: &[u8]) {
        let mut f = OpenOptions::new().append(true).open(path).unwrap();
        f.write_all(data).unwrap();
    }

    fn build(
        dirs: &[&Path],
        out: Emitter,
    ) -> (Scheduler<RecordingNotifier>, Vec<RecordingCollector>) {
        let mut notifier = RecordingNotifier::new();
        let mut registry = Registry::new();
        let mut collectors = Vec::new();
        for dir in dirs {
            let collector = RecordingCollector::default();
            let name = dir.file_name().unwrap().to_str().unwrap();
            let entry = WatchEntry::open(
                *dir,
                CURRENT_LOG_FILE_NAME,
                name,
                Box::new(collector.clone()),
                64,
                &mut notifier,
            )
            .unwrap();
            registry.add(entry).unwrap();
            collectors.push(collector);
        }
        (Scheduler::new(notifier, registry, out), collectors)
    }

    #[test]
    fn test_termination_wins_over_pending_event() {
        let harness = Harness::new();
        let a = harness.log_dir("send");
        let b = harness.log_dir("smtpd");
        let (mut scheduler, collectors) = build(&[a.as_path(), b.as_path()], Emitter::new(SharedBuffer::default()));
        scheduler.print_headers().unwrap();

        append(&a.join(CURRENT_LOG_FILE_NAME), b"not yet\n");
        harness.created(&a.join(CURRENT_LOG_FILE_NAME));
        harness.tick_tx.send(Instant::now()).unwrap();
        harness.shutdown_tx.send(()).unwrap();

        assert_eq!(scheduler.run(&harness.sources), StopReason::Terminated);
        assert_eq!(scheduler.state(), LoopState::Stopped);
        assert!(collectors[0].seen().is_empty());
        assert_eq!(*collectors[0].prints.borrow(), 0);
        assert_eq!(scheduler.cycles(), 0);

        // Released once each, in registration order.
        scheduler.shutdown();
        assert_eq!(scheduler.notifier().released, vec![a, b]);
        assert!(scheduler.notifier().active.is_empty());
        assert!(scheduler.registry().is_empty());
    }

    #[test]
    fn test_rotation_is_handled_before_flush() {
        let mut harness = Harness::new();
        let dir = harness.log_dir("send");
        let current = dir.join(CURRENT_LOG_FILE_NAME);
        let buf = SharedBuffer::default();
        let (mut scheduler, collectors) = build(&[dir.as_path()], Emitter::new(buf.clone()));
        scheduler.print_headers().unwrap();

        append(&current, b"old\n");
        fs::rename(&current, dir.join("@4000.s")).unwrap();
        fs::write(&current, b"new\n").unwrap();
        harness.created(&current);
        harness.last_tick();

        assert_eq!(scheduler.run(&harness.sources), StopReason::SourcesClosed);
        assert_eq!(collectors[0].seen(), vec!["old", "new"]);
        assert_eq!(scheduler.cycles(), 1);
        assert!(buf.contents().contains("SET lines = 2\nEND\n"));
    }

    #[test]
    fn test_flush_frames_only_declared_dimensions() {
        let mut harness = Harness::new();
        let a = harness.log_dir("send");
        let b = harness.log_dir("smtpd");
        let buf = SharedBuffer::default();
        let (mut scheduler, _) = build(&[a.as_path(), b.as_path()], Emitter::new(buf.clone()));
        scheduler.print_headers().unwrap();

        append(&a.join(CURRENT_LOG_FILE_NAME), b"1\n2\n");
        append(&b.join(CURRENT_LOG_FILE_NAME), b"3\n");
        harness.last_tick();
        scheduler.run(&harness.sources);

        let lines = buf.lines();
        let frames: Vec<&str> = lines
            .iter()
            .map(String::as_str)
            .skip_while(|l| !l.starts_with("BEGIN"))
            .collect();
        assert_eq!(frames.len(), 6);
        assert!(frames[0].starts_with("BEGIN test.send"));
        assert_eq!(&frames[1..3], &["SET lines = 2", "END"]);
        assert!(frames[3].starts_with("BEGIN test.smtpd"));
        assert_eq!(&frames[4..], &["SET lines = 1", "END"]);
    }

    #[test]
    fn test_standalone_reported_after_watches() {
        let mut harness = Harness::new();
        let a = harness.log_dir("send");
        let buf = SharedBuffer::default();
        let (mut scheduler, _) = build(&[a.as_path()], Emitter::new(buf.clone()));
        let standalone = RecordingCollector::default();
        scheduler
            .add_standalone("queue", Box::new(standalone.clone()))
            .unwrap();
        assert_eq!(scheduler.collectors(), 2);
        scheduler.print_headers().unwrap();

        harness.last_tick();
        scheduler.run(&harness.sources);

        let out = buf.contents();
        let watch = out.find("BEGIN test.send").unwrap();
        let queue = out.find("BEGIN test.queue").unwrap();
        assert!(watch < queue);
        assert_eq!(*standalone.prints.borrow(), 1);
    }

    #[test]
    fn test_output_failure_stops_loop() {
        let harness = Harness::new();
        let dir = harness.log_dir("send");
        let (mut scheduler, _) = build(&[dir.as_path()], Emitter::new(ClosedPipe));

        harness.tick_tx.send(Instant::now()).unwrap();
        assert_eq!(scheduler.run(&harness.sources), StopReason::OutputClosed);
        assert_eq!(scheduler.notifier().released, vec![dir]);
    }

    #[test]
    fn test_malformed_notifications_are_skipped() {
        let mut harness = Harness::new();
        let dir = harness.log_dir("send");
        let (mut scheduler, collectors) = build(&[dir.as_path()], Emitter::new(SharedBuffer::default()));
        scheduler.print_headers().unwrap();

        harness
            .fs_tx
            .send(Err(notify::Error::generic("queue overflow")))
            .unwrap();
        harness
            .fs_tx
            .send(Ok(notify::Event::new(EventKind::Create(CreateKind::File))))
            .unwrap();
        append(&dir.join(CURRENT_LOG_FILE_NAME), b"still read\n");
        harness.last_tick();

        assert_eq!(scheduler.run(&harness.sources), StopReason::SourcesClosed);
        assert_eq!(collectors[0].seen(), vec!["still read"]);
    }
}
