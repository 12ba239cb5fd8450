//! RTSP protocol implementation (RFC 2326).
//!
//! This module handles the text side of a relay connection: classifying
//! inbound chunks, parsing requests, building responses, driving the
//! per-connection command state machine and reading/writing SDP.
//!
//! ## RTSP message format (RFC 2326 §4)
//!
//! ```text
//! ANNOUNCE rtsp://server:5544/cam1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Content-Type: application/sdp\r\n
//! Content-Length: 460\r\n
//! \r\n
//! v=0\r\n...
//! ```
//!
//! ## Supported methods
//!
//! | Method | Side | Purpose |
//! |--------|------|---------|
//! | OPTIONS | both | Authorization and capability discovery |
//! | ANNOUNCE | publisher | Create a publish session, optionally with its SDP |
//! | DESCRIBE | viewer | Create a view session and return the mirrored SDP |
//! | SETUP | both | Negotiate one media entry (UDP ports or interleaved channels) |
//! | RECORD | publisher | Go live |
//! | PLAY | viewer | Go live, start relaying |
//! | TEARDOWN | both | Destroy the connection and its media |
//! | GET_PARAMETER / SET_PARAMETER | both | Keepalive |
//! | ECHO | both | Raw echo of the received chunk |
//!
//! Anything else known (PAUSE, REDIRECT, ...) is answered `501`.

pub mod command;
pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use command::Command;
pub use handler::CommandHandler;
pub use request::{RequestTarget, RtspRequest};
pub use response::RtspResponse;
pub use sdp::SessionDescription;
