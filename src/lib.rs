//! Multi-client TCP chat server.
//!
//! Clients connect, pick a display name, get the chat history replayed and
//! then exchange newline-terminated messages with everyone else connected.

// Server settings from JSON and `[host] [port]` arguments.
pub mod config;

// Error type for startup and configuration failures.
pub mod error;

// Diagnostic logging (fern) and the dated chat transcript.
pub mod logger;

// Listener, accept loop and shutdown.
pub mod server;

// Session protocol, handler and shared registry.
pub mod session;

pub use config::{LoggerConfig, ServerConfig};
pub use error::{ChatError, Result};
pub use logger::{FileJournal, Journal, Logger, MemoryJournal, init_logger};
pub use server::{ChatServer, Shutdown, run_server};
pub use session::SessionRegistry;
