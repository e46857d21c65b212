//! Diagnostic logging setup.
//!
//! Diagnostics go to stderr through `tracing`. Operator events (`[opened]`,
//! `[data  ]`, ...) are separate and go to stdout through
//! [`EventLog`](crate::relay::EventLog); at `-vvv` they are mirrored here at
//! TRACE level.

use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map a `-v` count to a level filter directive.
#[must_use]
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the logging system.
///
/// `RUST_LOG` overrides the level derived from `verbosity`.
///
/// # Errors
///
/// Returns an error if a global subscriber is already installed.
pub fn init_logging(verbosity: u8) -> io::Result<()> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("nano_tcp_relay={level}")));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_target(verbosity >= 2)
                .with_file(verbosity >= 3)
                .with_line_number(verbosity >= 3),
        )
        .try_init()
        .map_err(|e| io::Error::other(e.to_string()))
}
