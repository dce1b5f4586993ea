use config::ConfigError;
use thiserror::Error;
use tracing_subscriber::util::TryInitError;

use crate::state::BootstrapState;

/// Errors raised while preparing the process around the launch sequence.
///
/// The launch sequence itself never returns these; see
/// [`Bootstrap::bootstrap`](crate::bootstrap::Bootstrap::bootstrap).
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("unable to load config: {0}")]
    ConfigLoadError(#[from] ConfigError),
    #[error("unable to show config: {0}")]
    ConfigShowError(#[source] ConfigError),
    #[error("missing config value: {0}")]
    MissingConfigValueError(String),
    #[error("invalid config value: {0}")]
    InvalidConfigValueError(String),
    #[error("unable to create log file: {0}")]
    LogFileCreationError(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("unable to initialize tracing subscriber: {0}")]
    TracingSubscriberInitError(#[from] TryInitError),
    #[error("invalid service registration: {0}")]
    ServiceValidationError(String),
    #[error("bootstrap state cannot move from `{from}` to `{to}`")]
    InvalidTransitionError {
        from: BootstrapState,
        to: BootstrapState,
    },
}
