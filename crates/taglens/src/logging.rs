//! Logging initialization.
//!
//! Uses the `tracing` ecosystem with human-readable or JSON output. Logs go
//! to stderr; stdout is reserved for query output and summaries.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// ONNX Runtime logs every session option at info level.
const QUIET_DEPENDENCIES: &str = "ort=warn";

/// Build the filter for `level`, unless `RUST_LOG` is set.
fn filter_for(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},{QUIET_DEPENDENCIES}")))
}

/// Initialize the logging subsystem at `level` (error, warn, info, debug, trace).
pub fn init(level: &str, json_format: bool) {
    let filter = filter_for(level);

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

/// `logging.level` picks the default filter; `--verbose` forces debug.
pub fn init_from_config(
    config: &taglens_core::Config,
    verbose_override: bool,
    json_logs_override: bool,
) {
    let level = if verbose_override {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let json_format = json_logs_override || config.logging.format == "json";
    init(level, json_format);
}
