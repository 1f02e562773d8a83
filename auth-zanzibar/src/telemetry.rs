//! Tracing subscriber setup for binaries and tests embedding the engine

use crate::{config::LoggingConfig, error::ZanzibarError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over `config.level`. Fails if a subscriber is already set.
pub fn init_tracing(config: &LoggingConfig) -> Result<(), ZanzibarError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| ZanzibarError::ConfigError(format!(
            "Invalid log filter '{}': {}",
            config.level,
            e,
        )))?;

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        // Structured JSON logging for production
        registry
            .with(fmt::layer().with_target(true).with_ansi(false).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true).compact())
            .try_init()
    };

    result.map_err(|e| ZanzibarError::ConfigError(format!(
        "Failed to install tracing subscriber: {}",
        e,
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_filter_rejected() {
        let config = LoggingConfig {
            level: "warn,auth_zanzibar=loud".to_string(),
            json: false,
        };
        // Only meaningful when RUST_LOG is unset
        if std::env::var("RUST_LOG").is_err() {
            assert!(matches!(init_tracing(&config), Err(ZanzibarError::ConfigError(_))));
        }
    }
}
