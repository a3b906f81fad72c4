//! Subscriber setup for binaries and tests
//!
//! The library only emits `tracing` events; nothing in it installs a
//! subscriber on its own.

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a global `fmt` subscriber. The filter comes from `RUST_LOG` when
/// set, otherwise from `default_filter` (e.g. `"aster_mcp_hub=debug"`).
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_line_number(true))
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_fails() {
        // Another test may have installed one already; either way the
        // second call in this process must fail.
        let _ = init_tracing("aster_mcp_hub=debug");
        assert!(init_tracing("aster_mcp_hub=debug").is_err());
    }
}
