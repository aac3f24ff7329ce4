//! Log subscriber setup.
//!
//! The subscriber comes up before the config file is read, so its filter sits
//! behind a reload layer and the configured `logging.level` is swapped in
//! afterwards. An explicit `RUST_LOG` always wins over the config file.

use std::sync::OnceLock;

use thiserror::Error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter, ParseError};
use tracing_subscriber::{Registry, fmt, prelude::*, reload};

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER: OnceLock<FilterHandle> = OnceLock::new();

/// Reasons a configured log level was not applied.
#[derive(Debug, Error)]
pub enum LogLevelError {
    #[error("RUST_LOG is set and takes precedence")]
    Overridden,

    #[error("tracing is not initialized")]
    Uninitialized,

    #[error("invalid log level {level:?}: {source}")]
    Invalid {
        level: String,
        #[source]
        source: ParseError,
    },

    #[error("failed to swap log filter: {0}")]
    Reload(#[from] reload::Error),
}

/// Parses a bare level (`"debug"`) or a directive list
/// (`"affiliate_server=trace,info"`).
pub fn parse_filter(level: &str) -> Result<EnvFilter, LogLevelError> {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .parse(level)
        .map_err(|source| LogLevelError::Invalid {
            level: level.to_string(),
            source,
        })
}

fn rust_log_is_set() -> bool {
    std::env::var_os(EnvFilter::DEFAULT_ENV).is_some()
}

/// Installs the global subscriber at `info`, or at whatever `RUST_LOG` says.
/// Calling it again is a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();
    if installed {
        let _ = FILTER.set(handle);
    }
}

/// Replaces the active filter with the configured level.
pub fn apply_logging_level(level: &str) -> Result<(), LogLevelError> {
    if rust_log_is_set() {
        return Err(LogLevelError::Overridden);
    }
    let filter = parse_filter(level)?;
    FILTER
        .get()
        .ok_or(LogLevelError::Uninitialized)?
        .reload(filter)?;
    tracing::debug!(level, "Applied configured log level");
    Ok(())
}
