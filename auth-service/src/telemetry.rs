use crate::config::LoggingConfig;
use crate::error::{Result, ServiceError};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber. `RUST_LOG` takes precedence over
/// the configured level.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "auth_service={level},authz_engine={level}",
            level = config.level
        ))
    });

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json {
        // Structured JSON logging for production
        registry
            .with(fmt::layer().with_target(false).with_ansi(false).json())
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .try_init()
    };

    installed.map_err(|e| ServiceError::ConfigError(format!("Failed to install tracing subscriber: {}", e)))
}
