//! Logging bootstrap.
//!
//! The configured level applies to this crate; dependencies (sled in
//! particular) only log warnings. `RUST_LOG`, when set, replaces both.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Build the filter for `level` (`error`, `warn`, `info`, `debug`, `trace`).
/// Unknown levels fall back to `info`.
pub fn filter(level: &str) -> EnvFilter {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    let level = if level.eq_ignore_ascii_case("warning") {
        LevelFilter::WARN
    } else {
        level.parse().unwrap_or(LevelFilter::INFO)
    };
    EnvFilter::new(format!("warn,relaystore={level}"))
}

/// Install the global fmt subscriber. Later calls are no-ops.
pub fn init(level: &str) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(false)
        .try_init();
}
