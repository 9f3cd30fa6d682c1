//! Table-update parser log collector.

use std::io;

use super::text::{after, as_text};
use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

const DIMENSIONS: [&str; 8] = [
    "conn_failed",
    "scanner_success",
    "scanner_failed",
    "delivery_success",
    "delivery_failed",
    "unknown_success",
    "unknown_failed",
    "other",
];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ParserCollector {
    pub conn_failed: i64,
    pub scanner_success: i64,
    pub scanner_failed: i64,
    pub delivery_success: i64,
    pub delivery_failed: i64,
    pub unknown_success: i64,
    pub unknown_failed: i64,
    pub other: i64,
}

impl ParserCollector {
    pub fn new() -> Self {
        Self::default()
    }

    fn values(&self) -> [i64; 8] {
        [
            self.conn_failed,
            self.scanner_success,
            self.scanner_failed,
            self.delivery_success,
            self.delivery_failed,
            self.unknown_success,
            self.unknown_failed,
            self.other,
        ]
    }
}

impl Collector for ParserCollector {
    fn kind(&self) -> &'static str {
        "parser"
    }

    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
        out.chart(
            &Chart::new(ChartId::new("parser", name, "table_updates"), ChartType::Stacked)
                .title("Table updates by parser")
                .units("update")
                .family("parser")
                .context("parser.table_updates"),
        )?;
        for id in DIMENSIONS {
            out.dimension(&Dimension::new(id, id))?;
        }
        Ok(())
    }

    fn process(&mut self, line: &[u8], _shared: &mut Aggregates) {
        let line = as_text(line);
        if let Some(table) = after(&line, "Successfully updated table ") {
            if table.contains("scanner") {
                self.scanner_success += 1;
            } else if table.contains("delivery") {
                self.delivery_success += 1;
            } else {
                self.unknown_success += 1;
            }
        } else if let Some(table) = after(&line, "Failed to update table ") {
            if table.contains("scanner") {
                self.scanner_failed += 1;
            } else if table.contains("delivery") {
                self.delivery_failed += 1;
            } else {
                self.unknown_failed += 1;
            }
        } else if let Some(reason) = after(&line, "Can't connect to MySQL server on ") {
            if reason.contains("[Errno 111] Connection refused") {
                self.conn_failed += 1;
            }
        } else {
            self.other += 1;
        }
    }

    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("parser", name, "table_updates"), elapsed_us)?;
        for (id, value) in DIMENSIONS.into_iter().zip(self.values()) {
            out.set(id, value)?;
        }
        out.end()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::testing::SharedBuffer;

    #[test]
    fn test_table_updates() {
        let mut collector = ParserCollector::new();
        let mut shared = Aggregates::default();
        for line in [
            "INFO Successfully updated table scanner_stats",
            "INFO Successfully updated table delivery_log",
            "INFO Successfully updated table misc",
            "ERROR Failed to update table scanner_stats",
            "ERROR Failed to update table delivery_log",
            "ERROR Failed to update table misc",
            "ERROR Can't connect to MySQL server on 'db' ([Errno 111] Connection refused)",
            "ERROR Can't connect to MySQL server on 'db' (timed out)",
            "DEBUG heartbeat",
        ] {
            collector.process(line.as_bytes(), &mut shared);
        }

        assert_eq!(collector.values(), [1, 1, 1, 1, 1, 1, 1, 1]);
    }

    #[test]
    fn test_print_sets_every_dimension() {
        let buf = SharedBuffer::default();
        let mut out = Emitter::new(buf.clone());
        let mut collector = ParserCollector::new();
        collector.print_header("parser", &mut out).unwrap();
        collector.process(b"noise", &mut Aggregates::default());
        collector.print("parser", &mut out, 0).unwrap();
        collector.clear();

        let lines = buf.lines();
        let frame = &lines[lines.len() - 10..];
        assert_eq!(frame[0], "BEGIN parser.parser_table_updates");
        assert_eq!(frame[8], "SET other = 1");
        assert_eq!(frame[9], "END");
        assert_eq!(collector, ParserCollector::default());
    }
}
