//! Subscriber initialization.
//!
//! Production processes log JSON lines with timestamps; the filter comes from
//! `RUST_LOG` and defaults to `info`. Every entry point is safe to call more
//! than once: only the first call installs a subscriber.

use tracing_subscriber::EnvFilter;

pub const ENV_LOG_FORMAT: &str = "PACKLOOP_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    /// Single-line human-readable output, for local runs.
    Compact,
}

impl LogFormat {
    /// `PACKLOOP_LOG_FORMAT=compact` selects compact output; anything else is JSON.
    pub fn from_env() -> Self {
        match std::env::var(ENV_LOG_FORMAT) {
            Ok(v) if v.eq_ignore_ascii_case("compact") => LogFormat::Compact,
            _ => LogFormat::Json,
        }
    }
}

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Initialize tracing for the process using the environment.
pub fn init() {
    init_with(LogFormat::from_env(), "info");
}

/// Initialize with an explicit format and a fallback filter directive
/// (used when `RUST_LOG` is unset).
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_with(format: LogFormat, default_directive: &str) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(false);

    match format {
        LogFormat::Json => builder
            .json()
            .with_timer(tracing_subscriber::fmt::time::SystemTime)
            .try_init()
            .is_ok(),
        LogFormat::Compact => builder.compact().try_init().is_ok(),
    }
}

/// Compact output captured by the test harness (shown only for failing tests).
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter("debug"))
        .with_test_writer()
        .compact()
        .try_init();
}
