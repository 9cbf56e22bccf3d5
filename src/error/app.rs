use thiserror::Error;

use super::{CommunicationError, ConfigError, EngineError, ValidationError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("CLI error: {source}")]
    Clap {
        #[from]
        source: clap::Error,
    },
    #[error("JSON error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
    #[error("TOML error: {source}")]
    Toml {
        #[from]
        source: toml::de::Error,
    },
    #[error("Join error: {source}")]
    Join {
        #[from]
        source: tokio::task::JoinError,
    },
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Communication error: {0}")]
    Communication(#[from] CommunicationError),
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation<E>(error: E) -> Self
    where
        E: Into<ValidationError>,
    {
        error.into().into()
    }

    pub fn config<E>(error: E) -> Self
    where
        E: Into<ConfigError>,
    {
        error.into().into()
    }

    pub fn communication<E>(error: E) -> Self
    where
        E: Into<CommunicationError>,
    {
        error.into().into()
    }

    pub fn engine<E>(error: E) -> Self
    where
        E: Into<EngineError>,
    {
        error.into().into()
    }

    /// Whether this error reports that a pool, queue, kernel or acceptor
    /// has been shut down.
    #[must_use]
    pub const fn is_shutdown(&self) -> bool {
        matches!(
            self,
            AppError::Communication(CommunicationError::Shutdown { .. })
        )
    }

    /// Whether this error reports that a blocked caller was interrupted.
    #[must_use]
    pub const fn is_interrupted(&self) -> bool {
        matches!(self, AppError::Communication(CommunicationError::Interrupted))
    }
}
