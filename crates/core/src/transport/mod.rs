//! Network transport layer for RTSP signaling and media relay.
//!
//! - **TCP** ([`tcp`]): one control connection per client, read on its own
//!   thread. Publishers may also push interleaved media on it and TCP-mode
//!   viewers receive interleaved frames on it.
//! - **Interleave** ([`interleave`]): `$`-framed binary data on the control
//!   connection (RFC 2326 §10.12).
//! - **UDP** ([`udp`]): per-media transport channels. Publishers send to a
//!   port from the [`ports`] pool; viewers receive from an ephemeral socket.

pub mod interleave;
pub mod ports;
pub mod tcp;
pub mod udp;

pub use interleave::{FrameEvent, InterleaveFramer};
pub use ports::PortPool;
pub use tcp::{Connection, ConnectionState};
pub use udp::TransportChannel;
