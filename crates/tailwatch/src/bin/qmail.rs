//! qmail-plugin - qmail log statistics for the monitoring agent.
//!
//! Tails `current` in every send, smtp and parser log directory under the
//! root and reports the mail queue size and the ratelimitspp rollup.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tailwatch::{CommonArgs, give_up, init_logging, serve};
use tailwatch_core::collector::queue::DEFAULT_QUEUE_DIR;
use tailwatch_core::collector::{QueueCollector, RateLimitCollector};
use tailwatch_core::discovery::{Family, discover};
use tailwatch_core::emitter::Emitter;
use tailwatch_core::notifier::channel_watcher;
use tailwatch_core::registry::Registry;
use tailwatch_core::scheduler::Scheduler;

const DEFAULT_LOG_DIR: &str = "/var/log/qmail";

/// qmail log collector.
#[derive(Parser)]
#[command(name = "qmail-plugin", about = "qmail log statistics collector", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,

    /// qmail queue directory.
    #[arg(long, env = "TAILWATCH_QUEUE_DIR", default_value = DEFAULT_QUEUE_DIR)]
    queue_dir: PathBuf,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.common.verbose, args.common.quiet);

    let root = args.common.root_or(DEFAULT_LOG_DIR);
    info!("qmail-plugin {} starting", env!("CARGO_PKG_VERSION"));
    info!(
        "Config: interval={}s, logs={}, queue={}",
        args.common.interval,
        root.display(),
        args.queue_dir.display()
    );

    let (mut watcher, fs_events) = match channel_watcher() {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let mut registry = Registry::new();
    let discovered = discover(
        &root,
        Family::Qmail,
        args.common.line_capacity,
        &mut registry,
        &mut watcher,
    );
    let mut scheduler = Scheduler::new(watcher, registry, Emitter::stdout());
    match discovered {
        Ok(0) => return give_up(&mut scheduler, &format!("no qmail logs under {}", root.display())),
        Ok(n) => info!("{} log directories found", n),
        Err(e) => return give_up(&mut scheduler, &e.to_string()),
    }

    let standalone = scheduler
        .add_standalone("queue", Box::new(QueueCollector::new(&args.queue_dir)))
        .and_then(|()| scheduler.add_standalone("smtpd", Box::new(RateLimitCollector::new())));
    if let Err(e) = standalone {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    serve(scheduler, &root, args.common.interval(), fs_events)
}
