//! Logging setup using tracing.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::errors::{OtaError, Result};

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over `level`. When `output` is `"journald"`
/// timestamps are left to the journal.
pub fn init(level: &str, output: &str) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(level)
            .map_err(|e| OtaError::Config(format!("invalid log level '{}': {}", level, e)))?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    let result = if output == "journald" {
        registry
            .with(fmt::layer().without_time().with_ansi(false))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    result.map_err(|e| OtaError::Config(format!("logger already initialised: {}", e)))
}
