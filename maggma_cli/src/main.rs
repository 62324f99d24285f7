//! Entry point: parse [`Config`], install logging, run, and translate the outcome into an
//! exit code -- 0 on success, nonzero on any fatal error surfaced from `get_items`,
//! `update_targets`, or the distributed Coordinator.

mod builtins;
mod config;
mod logging;
mod runner;

use clap::Parser;
use config::Config;
use observability_deps::tracing::{error, info};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(err) = logging::init(config.verbosity) {
        eprintln!("{err}");
        std::process::exit(1);
    }

    match runner::run(config).await {
        Ok(summary) => {
            info!(
                chunks_failed = summary.chunks_failed,
                item_errors = summary.item_errors,
                "run complete"
            );
            std::process::exit(0);
        }
        Err(err) => {
            error!(%err, "run failed");
            std::process::exit(1);
        }
    }
}
