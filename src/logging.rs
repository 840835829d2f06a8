//! Diagnostic logging setup.

use std::io::IsTerminal;
use tracing_subscriber::EnvFilter;

/// Installs a stderr `tracing` subscriber. `verbose` raises the default level from `warn` to
/// `debug`; `RUST_LOG` overrides both. Calling this more than once is harmless.
pub fn init(verbose: bool) {
  let default_level = if verbose { "debug" } else { "warn" };
  let filter =
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
  let _ = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .with_ansi(std::io::stderr().is_terminal())
    .with_target(false)
    .without_time()
    .try_init();
}
