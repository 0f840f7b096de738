//! Logging bootstrap shared by the runner and the mock binaries.
//!
//! All diagnostics go through `tracing`; binaries call [`init_logging`]
//! once at startup. Output goes to stderr so it never pollutes captured
//! client streams.

use tracing_subscriber::EnvFilter;

/// Logging configuration for a harness binary.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default level directive when `RUST_LOG` is unset (e.g. "info").
    pub default_level: String,
}

impl LogConfig {
    /// Build a config that honors `RUST_LOG`, falling back to the given
    /// level.
    pub fn from_env(default_level: impl Into<String>) -> Self {
        Self {
            default_level: default_level.into(),
        }
    }

    /// Override the fallback level.
    pub fn with_level(mut self, level: impl Into<String>) -> Self {
        self.default_level = level.into();
        self
    }
}

/// Install the global subscriber. Safe to call more than once; later
/// calls are no-ops.
pub fn init_logging(config: &LogConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.default_level.clone()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .try_init();

    Ok(())
}
