//! daemontools supervision status collector.
//!
//! Every non-hidden directory under the service root is one dimension of
//! `daemontools.svstat`, valued with the service uptime in seconds decoded
//! from `<service>/supervise/status`. A service that is down reports the
//! negated time since it went down.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{Aggregates, Collector};
use crate::emitter::{Chart, ChartId, ChartType, Dimension, Emitter};

pub const DEFAULT_SERVICE_DIR: &str = "/service";

/// Size of the record supervise writes.
pub const STATUS_LEN: usize = 18;

/// TAI64 label of the Unix epoch, 2^62 + 10.
const TAI64_EPOCH: u64 = 4_611_686_018_427_387_914;

/// Decoded `supervise/status` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuperviseStatus {
    /// TAI64 seconds of the last state change.
    pub seconds: u64,
    pub nano: u32,
    /// 0 when the service is down.
    pub pid: u32,
    pub paused: u8,
    pub want: u8,
}

impl SuperviseStatus {
    pub fn parse(raw: &[u8; STATUS_LEN]) -> Self {
        let mut seconds = [0u8; 8];
        seconds.copy_from_slice(&raw[0..8]);
        let mut nano = [0u8; 4];
        nano.copy_from_slice(&raw[8..12]);
        let mut pid = [0u8; 4];
        pid.copy_from_slice(&raw[12..16]);
        Self {
            seconds: u64::from_be_bytes(seconds),
            nano: u32::from_be_bytes(nano),
            pid: u32::from_le_bytes(pid),
            paused: raw[16],
            want: raw[17],
        }
    }

    /// Seconds since the last state change as of `unix_now`, negative when
    /// the service is down.
    pub fn uptime(&self, unix_now: i64) -> i64 {
        let tai_now = TAI64_EPOCH.wrapping_add_signed(unix_now);
        let up = tai_now.wrapping_sub(self.seconds) as i64;
        if self.pid == 0 { up.wrapping_neg() } else { up }
    }
}

pub fn read_status(service: &Path) -> io::Result<SuperviseStatus> {
    let mut raw = [0u8; STATUS_LEN];
    File::open(service.join("supervise").join("status"))?.read_exact(&mut raw)?;
    Ok(SuperviseStatus::parse(&raw))
}

/// Sorted names of the non-hidden directories directly under `root`.
pub fn list_services(root: &Path) -> io::Result<Vec<String>> {
    let mut services = Vec::new();
    for entry in fs::read_dir(root)?.flatten() {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if fs::metadata(entry.path()).is_ok_and(|m| m.is_dir()) {
            services.push(name.to_string());
        }
    }
    services.sort();
    Ok(services)
}

pub struct SupervisionCollector {
    root: PathBuf,
    announced: BTreeSet<String>,
    pending: Vec<String>,
    /// Uptime per service measured in the last `postprocess`.
    uptimes: Vec<(String, i64)>,
}

impl SupervisionCollector {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            announced: BTreeSet::new(),
            pending: Vec::new(),
            uptimes: Vec::new(),
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.announced.iter().map(String::as_str)
    }

    fn chart(out: &mut Emitter) -> io::Result<()> {
        out.chart(
            &Chart::new(ChartId::new("daemontools", "svstat", ""), ChartType::Line)
                .units("time")
                .context("daemontools.svstat"),
        )
    }

    fn measure(&mut self, unix_now: i64) {
        let services = match list_services(&self.root) {
            Ok(services) => services,
            Err(e) => {
                warn!("cannot list {}: {}", self.root.display(), e);
                return;
            }
        };

        self.uptimes.clear();
        for service in services {
            let uptime = match read_status(&self.root.join(&service)) {
                Ok(status) => status.uptime(unix_now),
                Err(e) => {
                    warn!("{}: cannot read supervise/status: {}", service, e);
                    0
                }
            };
            if !self.announced.contains(&service) && !self.pending.contains(&service) {
                debug!("new service {}", service);
                self.pending.push(service.clone());
            }
            self.uptimes.push((service, uptime));
        }
    }
}

impl Collector for SupervisionCollector {
    fn kind(&self) -> &'static str {
        "svstat"
    }

    fn print_header(&mut self, _name: &str, out: &mut Emitter) -> io::Result<()> {
        Self::chart(out)?;
        match list_services(&self.root) {
            Ok(services) => {
                for service in services {
                    out.dimension(&Dimension::new(&service, &service))?;
                    self.announced.insert(service);
                }
            }
            Err(e) => warn!("cannot list {}: {}", self.root.display(), e),
        }
        Ok(())
    }

    fn process(&mut self, _line: &[u8], _shared: &mut Aggregates) {}

    fn postprocess(&mut self, _shared: &mut Aggregates) {
        self.measure(chrono::Utc::now().timestamp());
    }

    fn print(&mut self, _name: &str, out: &mut Emitter, elapsed_us: u64) -> io::Result<()> {
        if !self.pending.is_empty() {
            Self::chart(out)?;
            for service in &self.pending {
                out.dimension(&Dimension::new(service, service))?;
            }
            self.announced.extend(self.pending.drain(..));
        }

        out.begin(&ChartId::new("daemontools", "svstat", ""), elapsed_us)?;
        for (service, uptime) in &self.uptimes {
            out.set(service, *uptime)?;
        }
        out.end()
    }

    fn clear(&mut self) {
        self.uptimes.clear();
    }
}
