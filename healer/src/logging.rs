//! Diagnostic tracing for the repair loop.
//!
//! Spans and events from the sandbox, the oracle client and the loop driver
//! (`script`, `model`, `timeout_ms`, transitions, dropped output) go to stderr
//! and are filtered by `RUST_LOG`. They are for debugging healer itself. What
//! a user reads, the per-script report, is printed by the binary to stdout
//! regardless of the filter.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Directive used when `RUST_LOG` is unset or unparsable: only warnings such
/// as timeouts, silent non-zero exits and abandoned units.
const DEFAULT_DIRECTIVE: &str = "warn";

/// Install the global subscriber. Call once, at the start of `main`.
///
/// ```bash
/// RUST_LOG=healer::repair_loop=debug,healer::io::oracle=info healer target_script.py
/// ```
pub fn init() {
    tracing_subscriber::registry()
        .with(filter_from(std::env::var("RUST_LOG").ok().as_deref()))
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}

fn filter_from(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_DIRECTIVE))
}
