//! qmail-send log collector.

use std::io;

use super::text::{after, as_text};
use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

/// Delivery counters from a qmail-send `current` log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SendCollector {
    pub start_delivery: i64,
    pub end_msg: i64,
    pub delivery_success: i64,
    pub delivery_failure: i64,
    pub delivery_deferral: i64,
}

impl SendCollector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Collector for SendCollector {
    fn kind(&self) -> &'static str {
        "send"
    }

    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
        let title = format!("Qmail Send for {}", name);
        out.chart(
            &Chart::new(ChartId::new("qmail", name, ""), ChartType::Area)
                .name("send qmail")
                .title(&title)
                .units("# send")
                .context("send"),
        )?;
        out.dimension(&Dimension::new("start_delivery", "Start/End Delivery"))?;
        out.dimension(&Dimension::new("end_msg", "End Msg").multiplier(-1))?;

        let title = format!("Qmail Send delivery status for {}", name);
        out.chart(
            &Chart::new(ChartId::new("qmail", name, "delivery"), ChartType::Line)
                .name("send delivery")
                .title(&title)
                .units("# deliveries")
                .context("send_delivery"),
        )?;
        out.dimension(&Dimension::new("delivery_success", "Success"))?;
        out.dimension(&Dimension::new("delivery_failure", "Failure"))?;
        out.dimension(&Dimension::new("delivery_deferral", "Deferral"))
    }

    fn process(&mut self, line: &[u8], _shared: &mut Aggregates) {
        let line = as_text(line);
        if line.contains("starting delivery") {
            self.start_delivery += 1;
        } else if line.contains("end msg") {
            self.end_msg += 1;
        } else if let Some(rest) = after(&line, "delivery ") {
            if rest.contains("success:") {
                self.delivery_success += 1;
            } else if rest.contains("failure:") {
                self.delivery_failure += 1;
            } else if rest.contains("deferral:") {
                self.delivery_deferral += 1;
            }
        }
    }

    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("qmail", name, ""), elapsed_us)?;
        out.set("start_delivery", self.start_delivery)?;
        out.set("end_msg", self.end_msg)?;
        out.end()?;

        out.begin(&ChartId::new("qmail", name, "delivery"), elapsed_us)?;
        out.set("delivery_success", self.delivery_success)?;
        out.set("delivery_failure", self.delivery_failure)?;
        out.set("delivery_deferral", self.delivery_deferral)?;
        out.end()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}
