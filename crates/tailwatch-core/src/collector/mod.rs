//! Statistics collectors driven by the engine.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                        Scheduler                         │
//! │  ┌──────────────────────┐   ┌─────────────────────────┐  │
//! │  │ Registry             │   │ standalone Bindings     │  │
//! │  │  WatchEntry          │   │  queue, ratelimitspp,   │  │
//! │  │   LineReader ──┐     │   │  svstat                 │  │
//! │  │   Binding ◄────┘     │   └────────────┬────────────┘  │
//! │  └──────────┬───────────┘                │               │
//! │             └──────────────┬─────────────┘               │
//! │                     ┌──────▼──────┐                      │
//! │                     │  Collector  │ (trait)              │
//! │                     └──────┬──────┘                      │
//! └────────────────────────────┼─────────────────────────────┘
//!                              │ &mut Aggregates
//!        ┌─────────┬───────────┼───────────┬──────────┐
//!      send      smtp       scanner      parser    ...
//! ```
//!
//! A tailed collector sees every complete line of its file through
//! [`Collector::process`]. Once per flush cycle the engine calls
//! `postprocess`, `print` and `clear` in that order.

pub mod parser;
pub mod queue;
pub mod ratelimit;
pub mod scanner;
pub mod send;
pub mod smtp;
pub mod svstat;
mod text;

use std::io;
use std::time::Instant;

use crate::emitter::Emitter;

pub use parser::ParserCollector;
pub use queue::QueueCollector;
pub use ratelimit::{RateLimitCollector, RateLimitTotals};
pub use scanner::ScannerCollector;
pub use send::SendCollector;
pub use smtp::SmtpCollector;
pub use svstat::SupervisionCollector;

/// Cross-watch rollups shared by all collectors of one scheduler.
///
/// Filled by `process`, read by standalone collectors in `postprocess`,
/// reset by the scheduler at the end of every flush cycle.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Aggregates {
    pub rate_limits: RateLimitTotals,
}

impl Aggregates {
    pub fn clear(&mut self) {
        self.rate_limits.clear();
    }
}

/// Contract implemented by every statistics collector.
///
/// Construction stands in for `init` and `Drop` for `fini`.
pub trait Collector {
    /// Short label for diagnostics.
    fn kind(&self) -> &'static str;

    /// Declares charts and dimensions. Called once before the first cycle.
    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()>;

    /// Accounts one line. Unrecognized input is ignored or counted as
    /// "other", never an error.
    fn process(&mut self, line: &[u8], shared: &mut Aggregates);

    /// Derives summary values right before `print`.
    fn postprocess(&mut self, _shared: &mut Aggregates) {}

    /// Emits one `BEGIN`/`END` frame per chart.
    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()>;

    /// Resets the accumulators for the next interval.
    fn clear(&mut self);
}

/// A collector together with the name it reports under.
pub struct Binding {
    name: String,
    collector: Box<dyn Collector>,
    last_flush: Instant,
}

impl Binding {
    pub fn new(name: impl Into<String>, collector: Box<dyn Collector>) -> Self {
        Self {
            name: name.into(),
            collector,
            last_flush: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn collector(&self) -> &dyn Collector {
        self.collector.as_ref()
    }

    pub fn header(&mut self, out: &mut Emitter) -> io::Result<()> {
        self.collector.print_header(&self.name, out)?;
        self.last_flush = Instant::now();
        Ok(())
    }

    pub fn process(&mut self, line: &[u8], shared: &mut Aggregates) {
        self.collector.process(line, shared);
    }

    /// One flush for this collector: postprocess, print, clear.
    ///
    /// The accumulators are left untouched when printing fails.
    pub fn report(&mut self, out: &mut Emitter, shared: &mut Aggregates) -> io::Result<()> {
        self.collector.postprocess(shared);
        let now = Instant::now();
        let elapsed_us =
            u64::try_from(now.duration_since(self.last_flush).as_micros()).unwrap_or(u64::MAX);
        self.last_flush = now;
        self.collector.print(&self.name, out, elapsed_us)?;
        self.collector.clear();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    use super::{Aggregates, Collector};
    use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

    /// Collector that hands every line it sees to the test.
    #[derive(Clone, Default)]
    pub(crate) struct RecordingCollector {
        pub(crate) lines: Rc<RefCell<Vec<String>>>,
        pub(crate) prints: Rc<RefCell<usize>>,
        pending: i64,
    }

    impl RecordingCollector {
        pub(crate) fn seen(&self) -> Vec<String> {
            self.lines.borrow().clone()
        }
    }

    impl Collector for RecordingCollector {
        fn kind(&self) -> &'static str {
            "recording"
        }

        fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
            out.chart(&Chart::new(ChartId::new("test", name, ""), ChartType::Line))?;
            out.dimension(&Dimension::new("lines", "lines"))
        }

        fn process(&mut self, line: &[u8], _shared: &mut Aggregates) {
            self.lines
                .borrow_mut()
                .push(String::from_utf8_lossy(line).into_owned());
            self.pending += 1;
        }

        fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
            *self.prints.borrow_mut() += 1;
            out.begin(&ChartId::new("test", name, ""), elapsed_us)?;
            out.set("lines", self.pending)?;
            out.end()
        }

        fn clear(&mut self) {
            self.pending = 0;
        }
    }
}
