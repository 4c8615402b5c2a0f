//! Per-connection chat sessions and the registry they share.

pub mod handler;
pub mod protocol;
pub mod registry;

pub use handler::{SessionEnd, handle_session};
pub use protocol::Input;
pub use registry::{RegistryFull, SessionId, SessionRegistry, SessionWriter, SharedWriter};
