//! Error types for server operations

use crate::types::{ChannelId, ServerId, SessionId};
use thiserror::Error;

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors surfaced by the state core.
///
/// A rejected reparent is reported as `false`, not as an error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServerError {
    /// Channel id not present in the graph
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// Session id not connected
    #[error("Unknown session: {0}")]
    UnknownSession(SessionId),

    /// The root channel cannot be removed
    #[error("The root channel cannot be removed")]
    RootChannel,

    /// Connection limit reached
    #[error("Server is full ({0} users)")]
    ServerFull(usize),

    /// Virtual server id not hosted by this process
    #[error("Unknown server: {0}")]
    UnknownServer(ServerId),

    /// Virtual server id already running
    #[error("Server already running: {0}")]
    ServerRunning(ServerId),

    /// The server was stopped and accepts no new sessions
    #[error("Server stopped: {0}")]
    ServerStopped(ServerId),

    /// The attached authenticator refused the credentials
    #[error("Authentication rejected for {0}")]
    AuthenticationRejected(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<crate::config::ConfigError> for ServerError {
    fn from(e: crate::config::ConfigError) -> Self {
        ServerError::Config(e.to_string())
    }
}
