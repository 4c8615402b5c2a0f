//! Error types for the chat server

use thiserror::Error;

/// Errors that stop the server from starting or running.
///
/// Per-connection I/O failures never surface here: they end the session that
/// raised them and are only logged.
#[derive(Error, Debug)]
pub enum ChatError {
    /// Wrong command-line shape
    #[error("[USAGE]: tcp-chat [host] [port]")]
    Usage,

    /// Port argument is not a valid TCP port
    #[error("invalid port '{0}'")]
    InvalidPort(String),

    /// Configuration file could not be read or parsed
    #[error("configuration error: {0}")]
    Config(String),

    /// Listener could not be bound
    #[error("error listening on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Tokio runtime could not be built
    #[error("failed to build Tokio runtime: {0}")]
    Runtime(std::io::Error),

    /// Any other I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, ChatError>;
