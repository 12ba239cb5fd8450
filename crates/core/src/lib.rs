pub mod access;
pub mod error;
pub mod event;
pub mod protocol;
mod registry;
pub mod server;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

pub use access::{AccessData, AccessHandler, AccessKind, AccessRequest, ConnectionInfo, MediaInfo};
pub use error::{Result, RtspError};
pub use event::{ServerEvent, Subscription};
pub use server::{Server, ServerConfig};
pub use session::{MediaRole, MediaSession};
