//! svstat-plugin - daemontools service uptimes.
//!
//! Tails nothing: one standalone collector reads `supervise/status` of
//! every service under the root each cycle.

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;
#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use tailwatch::{CommonArgs, give_up, init_logging, serve};
use tailwatch_core::collector::SupervisionCollector;
use tailwatch_core::collector::svstat::{DEFAULT_SERVICE_DIR, list_services};
use tailwatch_core::emitter::Emitter;
use tailwatch_core::notifier::channel_watcher;
use tailwatch_core::registry::Registry;
use tailwatch_core::scheduler::Scheduler;

#[derive(Parser)]
#[command(name = "svstat-plugin", about = "daemontools service status collector", version)]
struct Args {
    #[command(flatten)]
    common: CommonArgs,
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.common.verbose, args.common.quiet);

    let root = args.common.root_or(DEFAULT_SERVICE_DIR);
    info!("svstat-plugin {} starting", env!("CARGO_PKG_VERSION"));

    // No watches, but the loop still waits on a notification channel.
    let (watcher, fs_events) = match channel_watcher() {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };
    let mut scheduler = Scheduler::new(watcher, Registry::new(), Emitter::stdout());

    match list_services(&root) {
        Ok(services) if services.is_empty() => {
            return give_up(&mut scheduler, &format!("no services under {}", root.display()));
        }
        Ok(services) => info!("{} services found", services.len()),
        Err(e) => {
            return give_up(&mut scheduler, &format!("cannot list {}: {}", root.display(), e));
        }
    }

    if let Err(e) = scheduler.add_standalone("svstat", Box::new(SupervisionCollector::new(&root))) {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    serve(scheduler, &root, args.common.interval(), fs_events)
}
