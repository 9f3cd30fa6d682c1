//! scanner-plugin - anti-spam scanner log statistics.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tailwatch::{CommonArgs, give_up, init_logging, serve};
use tailwatch_core::discovery::{Family, discover};
use tailwatch_core::emitter::Emitter;
use tailwatch_core::notifier::channel_watcher;
use tailwatch_core::registry::Registry;
use tailwatch_core::scheduler::Scheduler;

const DEFAULT_LOG_DIR: &str = "/var/log";

#[derive(Parser)]
#[command(name = "scanner-plugin", about = "Anti-spam scanner log statistics collector", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.common.verbose, args.common.quiet);

    let root = args.common.root_or(DEFAULT_LOG_DIR);
    info!("scanner-plugin {} starting", env!("CARGO_PKG_VERSION"));

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
        Family::Scanner,
        args.common.line_capacity,
        &mut registry,
        &mut watcher,
    );
    let mut scheduler = Scheduler::new(watcher, registry, Emitter::stdout());
    match discovered {
        Ok(0) => give_up(&mut scheduler, &format!("no scannerd logs under {}", root.display())),
        Ok(n) => {
            info!("{} scanner log directories found", n);
            serve(scheduler, &root, args.common.interval(), fs_events)
        }
        Err(e) => give_up(&mut scheduler, &e.to_string()),
    }
}
