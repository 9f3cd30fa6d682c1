//! Shared bootstrap for the plugin binaries: command line, logging,
//! termination and timer sources.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Args;
use clap::builder::RangedU64ValueParser;
use crossbeam_channel::{Receiver, Sender};
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

use tailwatch_core::line_reader::{DEFAULT_LINE_CAPACITY, MIN_LINE_CAPACITY};
use tailwatch_core::notifier::{Notifier, RawEvents};
use tailwatch_core::scheduler::{Scheduler, Sources, StopReason};

/// Positional arguments and flags every plugin accepts.
#[derive(Args, Debug, Clone)]
pub struct CommonArgs {
    /// Flush interval in seconds.
    #[arg(
        env = "TAILWATCH_INTERVAL",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub interval: u64,

    /// Root directory to collect from.
    #[arg(env = "TAILWATCH_PATH")]
    pub path: Option<PathBuf>,

    /// Line buffer capacity in bytes; longer lines are truncated.
    #[arg(
        long,
        default_value_t = DEFAULT_LINE_CAPACITY,
        value_parser = RangedU64ValueParser::<usize>::new().range(MIN_LINE_CAPACITY as u64..)
    )]
    pub line_capacity: usize,

    /// Increase logging verbosity (-v for debug, -vv for trace). Default is info level.
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Quiet mode - only show errors.
    #[arg(short, long)]
    pub quiet: bool,
}

impl CommonArgs {
    pub fn root_or(&self, default: &str) -> PathBuf {
        self.path.clone().unwrap_or_else(|| PathBuf::from(default))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

/// Initializes the tracing subscriber on stderr; stdout carries the
/// reporting protocol. Default level is INFO, -q keeps errors only.
pub fn init_logging(verbose: u8, quiet: bool) {
    let level = if quiet {
        Level::ERROR
    } else {
        match verbose {
            0 => Level::INFO,
            1 => Level::DEBUG,
            _ => Level::TRACE,
        }
    };

    let mut filter = EnvFilter::from_default_env();
    for target in ["tailwatch", "qmail_plugin", "scanner_plugin", "svstat_plugin"] {
        if let Ok(directive) = format!("{}={}", target, level).parse() {
            filter = filter.add_directive(directive);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Channel fed once per SIGINT, SIGTERM, SIGHUP or SIGQUIT.
pub fn termination_channel() -> io::Result<Receiver<()>> {
    let (tx, rx) = crossbeam_channel::unbounded();
    forward_quit(tx.clone())?;
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(io::Error::other)?;
    Ok(rx)
}

/// Forwards SIGQUIT, which ctrlc leaves at its default core-dumping action.
#[cfg(unix)]
fn forward_quit(tx: Sender<()>) -> io::Result<()> {
    use signal_hook::consts::SIGQUIT;
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGQUIT])?;
    std::thread::Builder::new()
        .name("sigquit".to_string())
        .spawn(move || {
            for _ in signals.forever() {
                if tx.send(()).is_err() {
                    break;
                }
            }
        })?;
    Ok(())
}

#[cfg(not(unix))]
fn forward_quit(_tx: Sender<()>) -> io::Result<()> {
    Ok(())
}

/// Builds the loop's sources around the watcher's event channel.
pub fn sources(interval: Duration, fs_events: RawEvents) -> io::Result<Sources> {
    Ok(Sources {
        shutdown: termination_channel()?,
        ticks: crossbeam_channel::tick(interval),
        fs_events,
    })
}

/// Announces `DISABLE` and returns the startup failure exit code.
pub fn give_up<N: Notifier>(scheduler: &mut Scheduler<N>, reason: &str) -> ExitCode {
    error!("{}, disabling", reason);
    if let Err(e) = scheduler.disable() {
        error!("{}", e);
    }
    ExitCode::FAILURE
}

/// Declares the charts and runs the loop to completion.
///
/// Exits 0 on termination and when the consumer closed our stdout,
/// non-zero when nothing can be collected or a source was lost.
pub fn serve<N: Notifier>(
    mut scheduler: Scheduler<N>,
    root: &Path,
    interval: Duration,
    fs_events: RawEvents,
) -> ExitCode {
    if scheduler.collectors() == 0 {
        return give_up(&mut scheduler, &format!("nothing to collect under {}", root.display()));
    }

    let sources = match sources(interval, fs_events) {
        Ok(sources) => sources,
        Err(e) => {
            error!("cannot install termination handler: {}", e);
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = scheduler.print_headers() {
        error!("{}", e);
        return ExitCode::SUCCESS;
    }

    info!(
        "collecting from {} every {}s",
        root.display(),
        interval.as_secs()
    );
    match scheduler.run(&sources) {
        StopReason::Terminated | StopReason::OutputClosed => ExitCode::SUCCESS,
        StopReason::SourcesClosed => ExitCode::FAILURE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestArgs {
        #[command(flatten)]
        common: CommonArgs,
    }

    #[test]
    fn test_defaults() {
        let args = TestArgs::try_parse_from(["plugin"]).unwrap().common;
        assert_eq!(args.interval, 1);
        assert_eq!(args.path, None);
        assert_eq!(args.line_capacity, DEFAULT_LINE_CAPACITY);
        assert_eq!(args.root_or("/var/log/qmail"), PathBuf::from("/var/log/qmail"));
    }

    #[test]
    fn test_positionals() {
        let args = TestArgs::try_parse_from(["plugin", "5", "/srv/log", "-vv"])
            .unwrap()
            .common;
        assert_eq!(args.interval(), Duration::from_secs(5));
        assert_eq!(args.root_or("/var/log"), PathBuf::from("/srv/log"));
        assert_eq!(args.verbose, 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_sigquit_requests_termination() {
        let (tx, rx) = crossbeam_channel::unbounded();
        forward_quit(tx).unwrap();
        signal_hook::low_level::raise(signal_hook::consts::SIGQUIT).unwrap();
        assert!(rx.recv_timeout(Duration::from_secs(5)).is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_tiny_buffer() {
        assert!(TestArgs::try_parse_from(["plugin", "0"]).is_err());
        assert!(TestArgs::try_parse_from(["plugin", "--line-capacity", "1"]).is_err());
    }
}
