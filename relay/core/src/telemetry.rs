//! Logging setup for embedding hosts
//!
//! The relay only emits `tracing` events; installing a subscriber is the
//! host's call. Hosts without their own subscriber can use [`init_tracing`].

use tracing_subscriber::EnvFilter;

/// Install a formatted subscriber for the relay crates
///
/// `RUST_LOG` takes precedence over `level` when set. Returns `false` if a
/// global subscriber was already installed.
pub fn init_tracing(level: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("relay_core={level}")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_refused() {
        init_tracing("debug");
        assert!(!init_tracing("info"));
    }
}
