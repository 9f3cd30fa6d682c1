//! qmail-smtpd (tcpserver) log collector.
//!
//! Besides its own charts it forwards `ratelimitspp:` lines to the shared
//! rate-limit rollup.

use std::io;

use super::text::{after, as_text, leading_u64};
use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

/// The average status is reported with two fixed decimals.
const STATUS_SCALE: i64 = 100;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SmtpCollector {
    pub tcp_ok: i64,
    pub tcp_deny: i64,
    pub status_sum: i64,
    pub status_count: i64,
    /// `status_sum * 100 / status_count` of the last interval that saw a
    /// status line. Survives `clear`, so quiet intervals repeat the last
    /// known average instead of dropping to zero.
    pub status_average: i64,
    pub end_status_0: i64,
    pub end_status_256: i64,
    pub end_status_25600: i64,
    pub end_status_others: i64,
}

impl SmtpCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collector for SmtpCollector {
    fn kind(&self) -> &'static str {
        "smtp"
    }

    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
        let title = format!("Qmail SMTPD for {}", name);
        out.chart(
            &Chart::new(ChartId::new("qmail", name, ""), ChartType::Area)
                .name("smtpd qmail")
                .title(&title)
                .units("# smtpd connections")
                .family("smtpd")
                .context("smtpd"),
        )?;
        out.dimension(&Dimension::new("tcp_ok", "TCP OK"))?;
        out.dimension(&Dimension::new("tcp_deny", "TCP Deny"))?;

        let title = format!("Qmail SMTPD Statuses for {}", name);
        out.chart(
            &Chart::new(ChartId::new("qmail", name, "status"), ChartType::Line)
                .name("smtpd statuses")
                .title(&title)
                .units("average status")
                .family("smtpd")
                .context("smtpd_status"),
        )?;
        out.dimension(
            &Dimension::new("tcp_status_average", "status average").divisor(STATUS_SCALE),
        )?;

        let title = format!("Qmail SMTPD End Statuses for {}", name);
        out.chart(
            &Chart::new(ChartId::new("qmail", name, "end_status"), ChartType::Line)
                .name("smtpd end statuses")
                .title(&title)
                .units("# smtpd end statuses")
                .family("smtpd")
                .context("smtpd_end_status"),
        )?;
        out.dimension(&Dimension::new("tcp_end_status_0", "0"))?;
        out.dimension(&Dimension::new("tcp_end_status_256", "256"))?;
        out.dimension(&Dimension::new("tcp_end_status_25600", "25600"))?;
        out.dimension(&Dimension::new("tcp_end_status_others", "other"))
    }

    fn process(&mut self, line: &[u8], shared: &mut Aggregates) {
        let line = as_text(line);

        if line.contains("tcpserver: ok") {
            self.tcp_ok += 1;
        }
        if line.contains("tcpserver: deny") {
            self.tcp_deny += 1;
        }
        if let Some(rest) = after(&line, "tcpserver: status: ") {
            let status = i64::try_from(leading_u64(rest)).unwrap_or(i64::MAX);
            self.status_sum = self.status_sum.saturating_add(status);
            self.status_count += 1;
        }
        if let Some(rest) = after(&line, "tcpserver: end ")
            && let Some(status) = after(rest, "status ")
        {
            match leading_u64(status) {
                0 => self.end_status_0 += 1,
                256 => self.end_status_256 += 1,
                25600 => self.end_status_25600 += 1,
                _ => self.end_status_others += 1,
            }
        }
        if let Some(rest) = after(&line, "ratelimitspp: ") {
            shared.rate_limits.record(rest);
        }
    }

    fn postprocess(&mut self, _shared: &mut Aggregates) {
        if self.status_count > 0 {
            self.status_average = self.status_sum.saturating_mul(STATUS_SCALE) / self.status_count;
        }
    }

    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("qmail", name, ""), elapsed_us)?;
        out.set("tcp_ok", self.tcp_ok)?;
        out.set("tcp_deny", -self.tcp_deny)?;
        out.end()?;

        out.begin(&ChartId::new("qmail", name, "status"), elapsed_us)?;
        out.set("tcp_status_average", self.status_average)?;
        out.end()?;

        out.begin(&ChartId::new("qmail", name, "end_status"), elapsed_us)?;
        out.set("tcp_end_status_0", self.end_status_0)?;
        out.set("tcp_end_status_256", self.end_status_256)?;
        out.set("tcp_end_status_25600", self.end_status_25600)?;
        out.set("tcp_end_status_others", self.end_status_others)?;
        out.end()
    }

    fn clear(&mut self) {
        *self = Self {
            status_average: self.status_average,
            ..Self::default()
        };
    }
}
