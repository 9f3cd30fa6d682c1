//! Anti-spam scanner log collector.
//!
//! Lines are tab separated: date, status, scan duration in seconds. The
//! status carries the verdict and the `:SC:` (scanner cache) and `:CC:`
//! (clamav cache) flags; durations are averaged per flag combination.

use std::io;

use tracing::warn;

use super::text::{as_text, leading_f64};
use super::{Aggregates, Collector};
use crate::emitter::{Algorithm, Chart, ChartId, ChartType, Dimension, Emitter};

/// Durations are reported in microseconds with a matching divisor.
const FRACTIONAL_CONVERSION: i64 = 1_000_000;

/// Fields of this length or longer are rejected.
pub const MAX_FIELD_LEN: usize = 256;

/// Duration buckets, indexed by [`bucket`].
const BUCKETS: [(&str, &str); 9] = [
    ("scan_duration_sc_0_cc_0", "SC:0_CC:0"),
    ("scan_duration_sc_0_cc_1", "SC:0_CC:1"),
    ("scan_duration_sc_1_cc_0", "SC:1_CC:0"),
    ("scan_duration_sc_1_cc_1", "SC:1_CC:1"),
    ("scan_duration_cc_0", "CC:0"),
    ("scan_duration_cc_1", "CC:1"),
    ("scan_duration_sc_0", "SC:0"),
    ("scan_duration_sc_1", "SC:1"),
    ("scan_duration__", "__"),
];

fn bucket(sc: Option<u8>, cc: Option<u8>) -> usize {
    match (sc, cc) {
        (Some(0), Some(0)) => 0,
        (Some(0), Some(_)) => 1,
        (Some(_), Some(0)) => 2,
        (Some(_), Some(_)) => 3,
        (None, Some(0)) => 4,
        (None, Some(_)) => 5,
        (Some(0), None) => 6,
        (Some(_), None) => 7,
        (None, None) => 8,
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DurationBucket {
    pub count: i64,
    pub sum: i64,
    pub average: i64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScannerCollector {
    pub clear: i64,
    pub clamdscan: i64,
    pub spam_tagged: i64,
    pub spam_rejected: i64,
    pub spam_deleted: i64,
    pub other: i64,
    pub sc_0: i64,
    pub sc_1: i64,
    pub cc_0: i64,
    pub cc_1: i64,
    pub durations: [DurationBucket; 9],
}

impl ScannerCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn classify(&mut self, status: &str) -> (Option<u8>, Option<u8>) {
        if status.contains("Clear") {
            self.clear += 1;
        } else if status.contains("CLAMDSCAN") {
            self.clamdscan += 1;
        } else if status.contains(":SPAM-TAGGED") {
            self.spam_tagged += 1;
        } else if status.contains(":SPAM-REJECTED") {
            self.spam_rejected += 1;
        } else if status.contains(":SPAM-DELETED") {
            self.spam_deleted += 1;
        } else {
            self.other += 1;
        }

        let sc = if status.contains(":SC:0") {
            self.sc_0 += 1;
            Some(0)
        } else if status.contains(":SC:1") {
            self.sc_1 += 1;
            Some(1)
        } else {
            None
        };
        let cc = if status.contains(":CC:0") {
            self.cc_0 += 1;
            Some(0)
        } else if status.contains(":CC:1") {
            self.cc_1 += 1;
            Some(1)
        } else {
            None
        };
        (sc, cc)
    }

    fn duration_dimensions(out: &mut Emitter, algorithm: Algorithm) -> io::Result<()> {
        for (id, name) in BUCKETS {
            out.dimension(
                &Dimension::new(id, name)
                    .algorithm(algorithm)
                    .divisor(FRACTIONAL_CONVERSION),
            )?;
        }
        Ok(())
    }

    fn duration_frame(
        &self,
        chart: &ChartId<'_>,
        out: &mut Emitter,
        elapsed_us: u64,
    ) -> io::Result<()> {
        out.begin(chart, elapsed_us)?;
        for ((id, _), bucket) in BUCKETS.iter().zip(&self.durations) {
            out.set(id, bucket.average)?;
        }
        out.end()
    }
}

/// Next tab-delimited field, or an error message when it is missing or too long.
fn next_field<'a>(
    fields: &mut impl Iterator<Item = &'a [u8]>,
    what: &str,
) -> Result<&'a [u8], String> {
    match fields.next() {
        Some(field) if field.len() < MAX_FIELD_LEN => Ok(field),
        Some(field) => Err(format!("{} field too long ({} bytes)", what, field.len())),
        None => Err(format!("missing {} field", what)),
    }
}

impl Collector for ScannerCollector {
    fn kind(&self) -> &'static str {
        "scanner"
    }

    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
        out.chart(
            &Chart::new(ChartId::new("scannerd", name, "type"), ChartType::Stacked)
                .units("volume")
                .family("scannerd")
                .context("scannerd.scannerd_type"),
        )?;
        out.dimension(&Dimension::new("clear", "Clear"))?;
        out.dimension(&Dimension::new("clamdscan", "Clamdscan"))?;
        out.dimension(&Dimension::new("spam_tagged", "SPAM Tagged"))?;
        out.dimension(&Dimension::new("spam_rejected", "SPAM Rejected"))?;
        out.dimension(&Dimension::new("spam_deleted", "SPAM Deleted"))?;
        out.dimension(&Dimension::new("other", "Other"))?;

        out.chart(
            &Chart::new(ChartId::new("scannerd", name, "cached"), ChartType::Stacked)
                .title("Cached results")
                .units("percentage")
                .family("scannerd")
                .context("scannerd.scannerd_sc"),
        )?;
        for (id, label) in [
            ("sc_0", "SC:0"),
            ("sc_1", "SC:1"),
            ("cc_0", "CC:0"),
            ("cc_1", "CC:1"),
        ] {
            out.dimension(
                &Dimension::new(id, label).algorithm(Algorithm::PercentageOfAbsoluteRow),
            )?;
        }

        out.chart(
            &Chart::new(ChartId::new("scannerd", name, "duration"), ChartType::Line)
                .title("Scan duration")
                .units("duration")
                .family("scannerd")
                .context("scannerd.scannerd_scan_duration"),
        )?;
        Self::duration_dimensions(out, Algorithm::Absolute)?;

        out.chart(
            &Chart::new(ChartId::new("scannerd", name, "duration_ratio"), ChartType::Stacked)
                .title("Scan duration ratio")
                .units("percentage")
                .family("scannerd")
                .context("scannerd.scannerd_scan_duration_ratio"),
        )?;
        Self::duration_dimensions(out, Algorithm::PercentageOfAbsoluteRow)
    }

    fn process(&mut self, line: &[u8], _shared: &mut Aggregates) {
        let mut fields = line.split(|b| *b == b'\t');

        if let Err(e) = next_field(&mut fields, "date") {
            warn!("scanner: cannot skip date: {}", e);
            return;
        }
        let status = match next_field(&mut fields, "status") {
            Ok(status) => as_text(status),
            Err(e) => {
                warn!("scanner: cannot get status: {}", e);
                return;
            }
        };
        let (sc, cc) = self.classify(&status);

        let duration = match next_field(&mut fields, "duration") {
            Ok(duration) => leading_f64(&as_text(duration)),
            Err(e) => {
                warn!("scanner: cannot get processing time: {}", e);
                return;
            }
        };
        let micros = duration * FRACTIONAL_CONVERSION as f64;
        if !micros.is_finite() || micros < 0.0 {
            warn!("scanner: invalid processing time {}", duration);
            return;
        }
        let bucket = &mut self.durations[bucket(sc, cc)];
        bucket.count += 1;
        // Float to integer casts saturate.
        bucket.sum = bucket.sum.saturating_add(micros as i64);
    }

    fn postprocess(&mut self, _shared: &mut Aggregates) {
        for bucket in &mut self.durations {
            if bucket.count > 0 {
                bucket.average = bucket.sum / bucket.count;
            }
        }
    }

    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("scannerd", name, "type"), elapsed_us)?;
        out.set("clear", self.clear)?;
        out.set("clamdscan", self.clamdscan)?;
        out.set("spam_tagged", self.spam_tagged)?;
        out.set("spam_rejected", self.spam_rejected)?;
        out.set("spam_deleted", self.spam_deleted)?;
        out.set("other", self.other)?;
        out.end()?;

        out.begin(&ChartId::new("scannerd", name, "cached"), elapsed_us)?;
        out.set("sc_0", self.sc_0)?;
        out.set("sc_1", self.sc_1)?;
        out.set("cc_0", self.cc_0)?;
        out.set("cc_1", self.cc_1)?;
        out.end()?;

        self.duration_frame(&ChartId::new("scannerd", name, "duration"), out, elapsed_us)?;
        self.duration_frame(&ChartId::new("scannerd", name, "duration_ratio"), out, elapsed_us)
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}
