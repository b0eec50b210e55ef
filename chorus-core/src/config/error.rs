//! Configuration errors

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Cannot read config file {0}")]
    FileReadError(String),

    #[error("Cannot write config file: {0}")]
    FileWriteError(String),

    #[error("Malformed config: {0}")]
    ParseError(String),

    #[error("Cannot serialize config: {0}")]
    SerializeError(String),

    /// An environment override could not be parsed
    #[error("Invalid value for {0}")]
    InvalidValue(String),

    #[error("Invalid config: {0}")]
    ValidationFailed(String),
}
