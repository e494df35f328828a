//! Tracing subscriber setup.
//!
//! The library only emits `tracing` events. Applications that want them
//! printed call [`init_tracing`] once at startup.

use std::str::FromStr;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::ConfigError;

/// Default filter directive when `MEMORA_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" | "human" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "MEMORA_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected pretty or json".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive, e.g. `memora_storage=debug,info`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl TelemetryConfig {
    /// Read `MEMORA_LOG` and `MEMORA_LOG_FORMAT`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let filter = std::env::var("MEMORA_LOG").unwrap_or_else(|_| DEFAULT_LOG_FILTER.to_string());
        let format = match std::env::var("MEMORA_LOG_FORMAT") {
            Ok(raw) => raw.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self { filter, format })
    }
}

/// Install the global tracing subscriber.
///
/// Fails with a [`ConfigError`] on a malformed filter or when a global
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), ConfigError> {
    let filter = EnvFilter::try_new(&config.filter).map_err(|e| ConfigError::InvalidValue {
        field: "MEMORA_LOG".to_string(),
        value: config.filter.clone(),
        reason: e.to_string(),
    })?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.format {
        LogFormat::Pretty => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(true))
            .try_init(),
    };

    result.map_err(|e| ConfigError::InvalidValue {
        field: "tracing_subscriber".to_string(),
        value: "global".to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_bad_filter_rejected() {
        let config = TelemetryConfig {
            filter: "memora=notalevel".to_string(),
            format: LogFormat::Pretty,
        };
        assert!(init_tracing(&config).is_err());
    }

    #[test]
    fn test_second_init_is_an_error() {
        let config = TelemetryConfig::default();
        // Whichever call wins the race installs the subscriber; the next must fail.
        let _ = init_tracing(&config);
        assert!(init_tracing(&config).is_err());
    }
}
