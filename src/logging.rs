//! Console logging setup.

use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

/// Installs the global `tracing` subscriber.
///
/// `RUST_LOG` takes precedence; otherwise this crate logs at `info`, or at
/// `debug` (one line per train step) when `verbose` is set. Fails if a
/// subscriber is already installed.
pub fn init_logging(verbose: bool) -> Result<(), TryInitError> {
    let default_directives = if verbose {
        "layerstack=debug,info"
    } else {
        "layerstack=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .compact(),
        )
        .try_init()
}
