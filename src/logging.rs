//! Diagnostic logging setup.

use tracing_subscriber::EnvFilter;

/// Installs the global `tracing` subscriber, writing to stderr.
///
/// `RUST_LOG` wins when set. Otherwise the level is `info`, raised to `debug`
/// with `verbose` and lowered to `warn` with `quiet`. Calling this twice is
/// harmless; the second call keeps the first subscriber.
pub fn init_logging(verbose: bool, quiet: bool) {
    let default_level = match (verbose, quiet) {
        (true, _) => "sortcopy=debug",
        (false, true) => "sortcopy=warn",
        (false, false) => "sortcopy=info",
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(verbose)
        .try_init();
}
