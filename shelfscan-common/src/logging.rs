//! Logging initialization shared by ShelfScan services

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// Filter priority: `RUST_LOG` environment variable, then the `default_filter`
/// argument (typically from TOML config), then "info". Safe to call more than
/// once; subsequent calls are ignored.
pub fn init(default_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter.unwrap_or("info")));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
