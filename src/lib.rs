pub mod auth;
pub mod config;
pub mod env;
pub mod error;
pub mod fallback;
pub mod formatter;
pub mod json;
pub mod level;
pub mod middleware;
pub mod record;
pub mod retry;
pub mod service;
pub mod transport;

#[cfg(feature = "tracing-layer")]
pub mod init;
#[cfg(feature = "tracing-layer")]
pub mod layer;

pub use config::{AuthMode, ConfigOverrides, LoggingConfig};
pub use error::{ConfigError, DeliveryError};
pub use level::LogLevel;
pub use record::{metadata_from, LogEntry, LogMetadata};
pub use service::{DeliveryService, HealthStatus};

/// Build a [`DeliveryService`] from the environment and `overrides`.
pub fn create_logger(overrides: ConfigOverrides) -> Result<DeliveryService, ConfigError> {
    DeliveryService::new(overrides)
}
