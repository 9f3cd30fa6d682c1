//! ratelimitspp rollup.
//!
//! The smtp collectors forward every `ratelimitspp:` line they see into
//! [`RateLimitTotals`]; [`RateLimitCollector`] reports the sum across all
//! smtp watches once per cycle. Each distinct `rule=<name>` label becomes a
//! dimension of its own, announced the first cycle it shows up.

use std::collections::{BTreeMap, BTreeSet};
use std::io;

use tracing::{debug, warn};

use super::text::after;
use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

/// Distinct rule dimensions announced before further labels are folded
/// into the overflow dimension.
pub const MAX_RULE_DIMENSIONS: usize = 32;

const OVERFLOW_DIMENSION: &str = "rules_overflow";

/// Per-cycle counters filled from `ratelimitspp:` lines.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RateLimitTotals {
    pub conn_timeout: i64,
    pub error: i64,
    pub ratelimited: i64,
    /// Hits per sanitized rule label. The dimension cap is applied by the
    /// reporting collector, which knows the labels already announced.
    pub rules: BTreeMap<String, i64>,
}

impl RateLimitTotals {
    /// Accounts the text following `ratelimitspp: `.
    pub fn record(&mut self, message: &str) {
        if message.contains("timeout") {
            self.conn_timeout += 1;
        } else if message.contains("error") {
            self.error += 1;
        } else if message.contains("ratelimited") {
            self.ratelimited += 1;
        }

        if let Some(label) = after(message, "rule=").and_then(rule_label) {
            *self.rules.entry(label).or_insert(0) += 1;
        }
    }

    pub fn clear(&mut self) {
        self.conn_timeout = 0;
        self.error = 0;
        self.ratelimited = 0;
        self.rules.clear();
    }
}

/// Keeps the leading run of `[A-Za-z0-9_.-]`, which is what the protocol
/// accepts in a dimension id.
fn rule_label(raw: &str) -> Option<String> {
    let label: String = raw
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    (!label.is_empty()).then_some(label)
}

fn rule_dimension(label: &str) -> String {
    format!("rule_{}", label)
}

/// Standalone collector reporting the shared [`RateLimitTotals`].
#[derive(Debug, Default)]
pub struct RateLimitCollector {
    /// Snapshot of the shared totals taken in `postprocess`.
    totals: RateLimitTotals,
    /// Rule labels that already have a dimension.
    announced: BTreeSet<String>,
    /// Labels to announce before the next rules frame.
    pending: Vec<String>,
    overflow: i64,
}

impl RateLimitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announced(&self) -> impl Iterator<Item = &str> {
        self.announced.iter().map(String::as_str)
    }

    fn rules_chart<'a>(id: ChartId<'a>, title: &'a str) -> Chart<'a> {
        Chart::new(id, ChartType::Stacked)
            .title(title)
            .units("hits")
            .family("ratelimitspp")
            .context("ratelimitspp.rules")
    }
}

impl Collector for RateLimitCollector {
    fn kind(&self) -> &'static str {
        "ratelimitspp"
    }

    fn print_header(&mut self, name: &str, out: &mut Emitter) -> io::Result<()> {
        out.chart(
            &Chart::new(ChartId::new("ratelimitspp", name, "results"), ChartType::Stacked)
                .title("Results of ratelimitspp")
                .units("update")
                .family("ratelimitspp")
                .context("ratelimitspp.results"),
        )?;
        out.dimension(&Dimension::new("conn_timeout", "conn_timeout"))?;
        out.dimension(&Dimension::new("error", "error"))?;
        out.dimension(&Dimension::new("ratelimited", "ratelimited"))?;

        let title = format!("ratelimitspp hits per rule for {}", name);
        out.chart(&Self::rules_chart(ChartId::new("ratelimitspp", name, "rules"), &title))?;
        out.dimension(&Dimension::new(OVERFLOW_DIMENSION, "other rules"))
    }

    fn process(&mut self, _line: &[u8], _shared: &mut Aggregates) {}

    fn postprocess(&mut self, shared: &mut Aggregates) {
        self.totals = shared.rate_limits.clone();
        self.overflow = 0;

        for (label, hits) in &self.totals.rules {
            if self.announced.contains(label) {
                continue;
            }
            if self.announced.len() + self.pending.len() < MAX_RULE_DIMENSIONS {
                debug!("new ratelimitspp rule {}", label);
                self.pending.push(label.clone());
            } else {
                self.overflow += hits;
            }
        }
    }

    fn print(&mut self, name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        out.begin(&ChartId::new("ratelimitspp", name, "results"), elapsed_us)?;
        out.set("conn_timeout", self.totals.conn_timeout)?;
        out.set("error", self.totals.error)?;
        out.set("ratelimited", self.totals.ratelimited)?;
        out.end()?;

        let rules = ChartId::new("ratelimitspp", name, "rules");
        if !self.pending.is_empty() {
            let title = format!("ratelimitspp hits per rule for {}", name);
            out.chart(&Self::rules_chart(rules, &title))?;
            for label in &self.pending {
                let id = rule_dimension(label);
                out.dimension(&Dimension::new(&id, label))?;
            }
            self.announced.extend(self.pending.drain(..));
            if self.announced.len() == MAX_RULE_DIMENSIONS {
                warn!(
                    "ratelimitspp: {} rules announced, further rules are reported as '{}'",
                    MAX_RULE_DIMENSIONS, OVERFLOW_DIMENSION
                );
            }
        }

        out.begin(&rules, elapsed_us)?;
        for label in &self.announced {
            let hits = self.totals.rules.get(label).copied().unwrap_or(0);
            out.set(&rule_dimension(label), hits)?;
        }
        out.set(OVERFLOW_DIMENSION, self.overflow)?;
        out.end()
    }

    fn clear(&mut self) {
        self.totals.clear();
        self.overflow = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::testing::SharedBuffer;

    #[test]
    fn test_record_classifies_results() {
        let mut totals = RateLimitTotals::default();
        totals.record("10.0.0.1 connection timeout");
        totals.record("10.0.0.1 lookup error");
        totals.record("10.0.0.1 ratelimited rule=per_ip");
        totals.record("10.0.0.2 ratelimited rule=per_ip");
        totals.record("10.0.0.3 ratelimited rule=burst.v2 extra");

        assert_eq!(totals.conn_timeout, 1);
        assert_eq!(totals.error, 1);
        assert_eq!(totals.ratelimited, 3);
        assert_eq!(totals.rules.get("per_ip"), Some(&2));
        assert_eq!(totals.rules.get("burst.v2"), Some(&1));
    }

    #[test]
    fn test_rule_label_is_sanitized() {
        assert_eq!(rule_label("a'b"), Some("a".to_string()));
        assert_eq!(rule_label(" x"), None);
        assert_eq!(rule_label("per-ip_1.2,rest"), Some("per-ip_1.2".to_string()));
    }

    #[test]
    fn test_announced_rules_keep_their_dimension_past_the_cap() {
        let buf = SharedBuffer::default();
        let mut out = Emitter::new(buf.clone());
        let mut collector = RateLimitCollector::new();
        let mut shared = Aggregates::default();
        collector.print_header("smtpd", &mut out).unwrap();

        shared.rate_limits.record("ratelimited rule=zz_known");
        collector.postprocess(&mut shared);
        collector.print("smtpd", &mut out, 0).unwrap();
        collector.clear();
        shared.clear();

        // Fresh labels sort ahead of the known one and exceed the cap.
        for i in 0..MAX_RULE_DIMENSIONS + 3 {
            shared.rate_limits.record(&format!("ratelimited rule=a{:02}", i));
        }
        shared.rate_limits.record("ratelimited rule=zz_known");
        collector.postprocess(&mut shared);
        collector.print("smtpd", &mut out, 0).unwrap();

        assert_eq!(collector.announced().count(), MAX_RULE_DIMENSIONS);
        assert!(collector.announced().any(|label| label == "zz_known"));
        let out = buf.contents();
        assert!(out.contains("SET rule_zz_known = 1\nSET rules_overflow = 4\nEND\n"));
    }

    #[test]
    fn test_new_rules_are_announced_once() {
        let buf = SharedBuffer::default();
        let mut out = Emitter::new(buf.clone());
        let mut collector = RateLimitCollector::new();
        let mut shared = Aggregates::default();
        collector.print_header("smtpd", &mut out).unwrap();

        shared.rate_limits.record("ratelimited rule=per_ip");
        collector.postprocess(&mut shared);
        collector.print("smtpd", &mut out, 0).unwrap();
        collector.clear();
        shared.clear();

        shared.rate_limits.record("ratelimited rule=per_ip");
        shared.rate_limits.record("ratelimited rule=per_ip");
        collector.postprocess(&mut shared);
        collector.print("smtpd", &mut out, 0).unwrap();

        let out = buf.contents();
        assert_eq!(out.matches("DIMENSION rule_per_ip 'per_ip'").count(), 1);
        assert!(out.contains("BEGIN ratelimitspp.smtpd_rules\nSET rule_per_ip = 1\nSET rules_overflow = 0\nEND\n"));
        assert!(out.contains("BEGIN ratelimitspp.smtpd_rules\nSET rule_per_ip = 2\nSET rules_overflow = 0\nEND\n"));
        assert_eq!(collector.announced().collect::<Vec<_>>(), vec!["per_ip"]);
    }

    #[test]
    fn test_results_use_declared_dimensions() {
        let buf = SharedBuffer::default();
        let mut out = Emitter::new(buf.clone());
        let mut collector = RateLimitCollector::new();
        let mut shared = Aggregates::default();
        collector.print_header("smtpd", &mut out).unwrap();
        shared.rate_limits.record("connection timeout");
        collector.postprocess(&mut shared);
        collector.print("smtpd", &mut out, 0).unwrap();

        assert!(buf.contents().contains(
            "BEGIN ratelimitspp.smtpd_results\nSET conn_timeout = 1\nSET error = 0\nSET ratelimited = 0\nEND\n"
        ));
    }
}
