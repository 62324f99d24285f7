//! Sets up a [`logfmt`] layer over a verbosity-driven [`tracing_subscriber::EnvFilter`]:
//! `RUST_LOG` always wins when set, otherwise `-v`/`-vv` raise the default level past `warn`.

use observability_deps::tracing::Level;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. Idempotent within a process: called once from `main`
/// before anything else logs.
pub fn init(verbosity: u8) -> Result<(), String> {
    let default_level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    tracing_subscriber::registry()
        .with(filter)
        .with(logfmt::LogFmtBuilder::new().build())
        .try_init()
        .map_err(|err| format!("failed to install logging subscriber: {err}"))
}
