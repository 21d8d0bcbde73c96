//! Structured tracing helpers.

use prd_primitives::RunId;
use thiserror::Error;
use tracing::{Span, info_span};
use tracing_subscriber::EnvFilter;

/// Errors raised while installing the subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The filter directives could not be parsed.
    #[error("invalid log filter: {reason}")]
    Filter {
        /// Parser message.
        reason: String,
    },
    /// A global subscriber is already installed.
    #[error("tracing subscriber already installed: {reason}")]
    AlreadyInstalled {
        /// Message from the subscriber registry.
        reason: String,
    },
}

/// Filter directives used when `RUST_LOG` is unset.
///
/// `0` logs warnings, `1` info, `2` debug, anything higher trace. The HTTP
/// stack stays at `error` below trace level.
#[must_use]
pub fn default_directives(verbosity: u8) -> String {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => return "trace".to_owned(),
    };
    format!("{level},hyper=error,rustls=error")
}

/// Installs the global fmt subscriber.
///
/// `RUST_LOG` takes precedence over `verbosity`.
///
/// # Errors
///
/// Returns [`TelemetryError`] when the directives are invalid or a global
/// subscriber has already been set.
pub fn init_tracing(verbosity: u8) -> Result<(), TelemetryError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directives(verbosity)).map_err(|err| {
            TelemetryError::Filter {
                reason: err.to_string(),
            }
        })?,
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .try_init()
        .map_err(|err| TelemetryError::AlreadyInstalled {
            reason: err.to_string(),
        })
}

/// Root span of one release; every event of the run is nested under it.
#[must_use]
pub fn release_span(run_id: RunId) -> Span {
    info_span!("release", run_id = %run_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(default_directives(0), "warn,hyper=error,rustls=error");
        assert_eq!(default_directives(2), "debug,hyper=error,rustls=error");
        assert_eq!(default_directives(9), "trace");
    }

    #[test]
    fn directives_parse() {
        for verbosity in 0..4 {
            assert!(EnvFilter::try_new(default_directives(verbosity)).is_ok());
        }
    }
}
