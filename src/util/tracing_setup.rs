//! Tracing/logging initialization

use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber based on configuration
///
/// `RUST_LOG` overrides the configured level. The refill worker logs from
/// its own named thread, so thread names are always included.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| anyhow!("invalid log level {:?}: {}", config.level, e))?;

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match config.format.as_str() {
        "json" => {
            let fmt_layer = fmt::layer()
                .json()
                .with_target(true)
                .with_thread_names(true)
                .with_file(true)
                .with_line_number(true);
            subscriber.with(fmt_layer).try_init()
        }
        "pretty" => {
            let fmt_layer = fmt::layer()
                .with_target(true)
                .with_thread_names(true);
            subscriber.with(fmt_layer).try_init()
        }
        other => anyhow::bail!("unknown log format {:?}, expected \"json\" or \"pretty\"", other),
    };

    installed.map_err(|e| anyhow!("failed to install tracing subscriber: {}", e))
}
