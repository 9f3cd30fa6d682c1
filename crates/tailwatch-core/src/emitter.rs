//! Line-oriented reporting protocol writer.
//!
//! Emits `CHART`, `DIMENSION`, `BEGIN`, `SET`, `END` and `DISABLE` lines
//! for the external monitoring collector that reads our stdout. The
//! emitter remembers which dimensions every chart declared and refuses to
//! `SET` anything else, so each `BEGIN`/`END` frame only ever carries
//! declared series.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, BufWriter, Write};

use tracing::warn;

/// Elapsed times below this are left out of `BEGIN`.
pub const MIN_REPORTED_ELAPSED_US: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Line,
    Area,
    Stacked,
}

impl ChartType {
    fn as_str(self) -> &'static str {
        match self {
            ChartType::Line => "line",
            ChartType::Area => "area",
            ChartType::Stacked => "stacked",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    Absolute,
    Incremental,
    PercentageOfAbsoluteRow,
    PercentageOfIncrementalRow,
}

impl Algorithm {
    fn as_str(self) -> &'static str {
        match self {
            Algorithm::Absolute => "absolute",
            Algorithm::Incremental => "incremental",
            Algorithm::PercentageOfAbsoluteRow => "percentage-of-absolute-row",
            Algorithm::PercentageOfIncrementalRow => "percentage-of-incremental-row",
        }
    }
}

/// Chart identifier rendered as `<type>.<prefix>[_<id>]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartId<'a> {
    pub kind: &'a str,
    pub prefix: &'a str,
    pub id: &'a str,
}

impl<'a> ChartId<'a> {
    pub fn new(kind: &'a str, prefix: &'a str, id: &'a str) -> Self {
        Self { kind, prefix, id }
    }
}

impl fmt::Display for ChartId<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.prefix)?;
        if !self.id.is_empty() {
            write!(f, "_{}", self.id)?;
        }
        Ok(())
    }
}

/// A `CHART` declaration.
#[derive(Debug, Clone, Copy)]
pub struct Chart<'a> {
    pub id: ChartId<'a>,
    pub name: &'a str,
    pub title: &'a str,
    pub units: &'a str,
    pub family: &'a str,
    pub context: &'a str,
    pub chart_type: ChartType,
}

impl<'a> Chart<'a> {
    pub fn new(id: ChartId<'a>, chart_type: ChartType) -> Self {
        Self {
            id,
            name: "",
            title: "",
            units: "",
            family: "",
            context: "",
            chart_type,
        }
    }

    pub fn name(mut self, name: &'a str) -> Self {
        self.name = name;
        self
    }

    pub fn title(mut self, title: &'a str) -> Self {
        self.title = title;
        self
    }

    pub fn units(mut self, units: &'a str) -> Self {
        self.units = units;
        self
    }

    pub fn family(mut self, family: &'a str) -> Self {
        self.family = family;
        self
    }

    pub fn context(mut self, context: &'a str) -> Self {
        self.context = context;
        self
    }
}

/// A `DIMENSION` declaration, attached to the chart declared just before it.
#[derive(Debug, Clone, Copy)]
pub struct Dimension<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub algorithm: Algorithm,
    pub multiplier: i64,
    pub divisor: i64,
    pub hidden: bool,
}

impl<'a> Dimension<'a> {
    /// Visible absolute dimension with multiplier and divisor 1.
    pub fn new(id: &'a str, name: &'a str) -> Self {
        Self {
            id,
            name,
            algorithm: Algorithm::Absolute,
            multiplier: 1,
            divisor: 1,
            hidden: false,
        }
    }

    pub fn algorithm(mut self, algorithm: Algorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    pub fn multiplier(mut self, multiplier: i64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn divisor(mut self, divisor: i64) -> Self {
        self.divisor = divisor;
        self
    }

    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }
}

/// Writer for the reporting protocol.
pub struct Emitter {
    out: Box<dyn Write>,
    /// Chart id -> declared dimension ids.
    declared: HashMap<String, HashSet<String>>,
    /// Chart the next `DIMENSION` belongs to.
    last_chart: Option<String>,
    /// Chart between `BEGIN` and `END`.
    open: Option<String>,
}

impl Emitter {
    pub fn new(out: impl Write + 'static) -> Self {
        Self {
            out: Box::new(out),
            declared: HashMap::new(),
            last_chart: None,
            open: None,
        }
    }

    /// Buffered stdout; callers flush once per cycle.
    pub fn stdout() -> Self {
        Self::new(BufWriter::new(io::stdout()))
    }

    pub fn chart(&mut self, chart: &Chart<'_>) -> io::Result<()> {
        let id = chart.id.to_string();
        writeln!(
            self.out,
            "CHART {} '{}' '{}' '{}' '{}' '{}' {}",
            id,
            chart.name,
            chart.title,
            chart.units,
            chart.family,
            chart.context,
            chart.chart_type.as_str()
        )?;
        self.declared.entry(id.clone()).or_default();
        self.last_chart = Some(id);
        Ok(())
    }

    pub fn dimension(&mut self, dim: &Dimension<'_>) -> io::Result<()> {
        let Some(chart) = self.last_chart.as_ref() else {
            warn!("DIMENSION {} without a preceding CHART, dropped", dim.id);
            return Ok(());
        };
        write!(
            self.out,
            "DIMENSION {} '{}' {} {} {}",
            dim.id,
            dim.name,
            dim.algorithm.as_str(),
            dim.multiplier,
            dim.divisor
        )?;
        if dim.hidden {
            self.out.write_all(b" hidden")?;
        }
        self.out.write_all(b"\n")?;
        if let Some(dims) = self.declared.get_mut(chart) {
            dims.insert(dim.id.to_string());
        }
        Ok(())
    }

    /// Returns whether `dim` was declared for `chart`.
    pub fn is_declared(&self, chart: &ChartId<'_>, dim: &str) -> bool {
        self.declared
            .get(&chart.to_string())
            .is_some_and(|dims| dims.contains(dim))
    }

    pub fn begin(&mut self, chart: &ChartId<'_>, elapsed_us: u64) -> io::Result<()> {
        let id = chart.to_string();
        if elapsed_us >= MIN_REPORTED_ELAPSED_US {
            writeln!(self.out, "BEGIN {} {}", id, elapsed_us)?;
        } else {
            writeln!(self.out, "BEGIN {}", id)?;
        }
        self.open = Some(id);
        Ok(())
    }

    pub fn set(&mut self, dim: &str, value: i64) -> io::Result<()> {
        let declared = self
            .open
            .as_ref()
            .and_then(|chart| self.declared.get(chart))
            .is_some_and(|dims| dims.contains(dim));
        if !declared {
            warn!(
                "SET {} outside a declared chart ({:?}), dropped",
                dim,
                self.open.as_deref()
            );
            return Ok(());
        }
        writeln!(self.out, "SET {} = {}", dim, value)
    }

    pub fn end(&mut self) -> io::Result<()> {
        self.open = None;
        self.out.write_all(b"END\n")
    }

    pub fn disable(&mut self) -> io::Result<()> {
        self.out.write_all(b"DISABLE\n")?;
        self.out.flush()
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }
}
