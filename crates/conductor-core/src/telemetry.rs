//! Logging initialisation.
//!
//! Every component logs through `tracing`; the binary calls [`init_logging`]
//! once at start-up to install a subscriber with an `EnvFilter` and either a
//! human-readable or JSON formatter.

#[cfg(feature = "telemetry")]
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{ConductorError, ConductorResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,conductor=debug";

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl FromStr for LogFormat {
    type Err = ConductorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "pretty" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConductorError::Configuration(format!(
                "unknown log format: {other}"
            ))),
        }
    }
}

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `default_filter`. Fails if a global
/// subscriber is already installed.
#[cfg(feature = "telemetry")]
pub fn init_logging(format: LogFormat, default_filter: &str) -> ConductorResult<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match format {
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            )
            .try_init(),
    };

    result.map_err(|e| ConductorError::Internal(format!("Failed to initialise logging: {e}")))
}

/// Placeholder for when the telemetry feature is disabled.
#[cfg(not(feature = "telemetry"))]
pub fn init_logging(_format: LogFormat, _default_filter: &str) -> ConductorResult<()> {
    Ok(())
}
