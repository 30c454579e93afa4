//! Tracing/logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize JSON logging for the process, filtered via `RUST_LOG`
/// (default `info`).
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init() {
    init_with_default("info");
}

/// Like [`init`], with an explicit fallback filter directive for when
/// `RUST_LOG` is unset.
pub fn init_with_default(directive: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        init();
        init_with_default("debug");
        init();
    }
}
