use std::sync::Arc;

use crate::access::AccessRequest;
use crate::error::{Result, RtspError};
use crate::protocol::command::Command;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::{PUBLIC_METHODS, RtspResponse};
use crate::session::{Client, MediaRole, MediaSession};
use crate::transport::interleave::{FrameEvent, InterleaveFramer};
use crate::transport::tcp::{Connection, ConnectionState};

/// Drives the control protocol for a single TCP connection.
///
/// Owned by the connection's reader thread. Every inbound chunk is either a
/// text command (dispatched here) or interleaved binary media, which goes
/// through the connection's [`InterleaveFramer`] into the attached publish
/// session.
pub struct CommandHandler {
    connection: Arc<Connection>,
    framer: InterleaveFramer,
}

impl CommandHandler {
    pub fn new(connection: Arc<Connection>) -> Self {
        CommandHandler {
            connection,
            framer: InterleaveFramer::new(),
        }
    }

    /// Handle one chunk as read from the socket.
    ///
    /// While the framer holds a partial frame the chunk continues it, whatever
    /// its first bytes look like.
    pub fn handle_chunk(&mut self, chunk: &[u8]) {
        if self.framer.pending_len() > 0 && self.connection.media().is_some() {
            self.handle_raw(chunk);
            return;
        }
        match Command::classify(chunk) {
            Command::Raw => self.handle_raw(chunk),
            command => self.dispatch(command, chunk),
        }
    }

    fn handle_raw(&mut self, chunk: &[u8]) {
        let Some(media) = self.connection.media() else {
            tracing::trace!(
                connection_id = %self.connection.id(),
                len = chunk.len(),
                "binary data without media, dropped"
            );
            return;
        };

        for event in self.framer.feed(chunk) {
            match event {
                FrameEvent::Data(frame) => media.push_interleaved(frame),
                FrameEvent::Skip { reason, bytes } => match Command::classify(&bytes) {
                    Command::Raw => tracing::trace!(
                        connection_id = %self.connection.id(),
                        ?reason,
                        len = bytes.len(),
                        "skipped non-frame bytes"
                    ),
                    command => self.dispatch(command, &bytes),
                },
            }
        }
    }

    fn dispatch(&mut self, command: Command, chunk: &[u8]) {
        let text = String::from_utf8_lossy(chunk);

        if command != Command::Options && !self.connection.is_authorized() {
            let cseq = RtspRequest::parse(&text)
                .ok()
                .and_then(|request| request.cseq().map(str::to_string));
            tracing::warn!(
                connection_id = %self.connection.id(),
                command = %command,
                "command before authorization"
            );
            self.connection
                .send(RtspResponse::unauthorized().cseq(cseq.as_deref()));
            return;
        }

        match command {
            Command::Sdp => self.handle_sdp(&text),
            Command::Echo => {
                self.connection.write(chunk);
            }
            _ => {
                let request = match RtspRequest::parse(&text) {
                    Ok(request) => request,
                    Err(e) => {
                        tracing::warn!(
                            connection_id = %self.connection.id(),
                            error = %e,
                            "malformed request"
                        );
                        self.connection.send(RtspResponse::bad_request());
                        return;
                    }
                };
                tracing::debug!(
                    connection_id = %self.connection.id(),
                    method = %request.method,
                    uri = %request.uri,
                    cseq = request.cseq().unwrap_or(""),
                    "request"
                );
                if let Some(response) = self.handle_request(command, &request) {
                    self.connection.send(response.cseq(request.cseq()));
                }
            }
        }
    }

    /// Returns the response to send, or `None` when the handler already
    /// wrote one.
    fn handle_request(&mut self, command: Command, request: &RtspRequest) -> Option<RtspResponse> {
        match command {
            Command::Options => self.handle_options(request),
            Command::Announce => Some(self.handle_announce(request)),
            Command::Setup => Some(self.handle_setup(request)),
            Command::Teardown => Some(self.handle_teardown()),
            Command::Describe => Some(self.handle_describe(request)),
            Command::Record | Command::Play => Some(self.handle_live()),
            Command::GetParameter | Command::SetParameter => Some(RtspResponse::ok()),
            _ => {
                tracing::warn!(method = %request.method, "unsupported RTSP method");
                Some(RtspResponse::new(501, "Not Implemented"))
            }
        }
    }

    fn handle_options(&mut self, request: &RtspRequest) -> Option<RtspResponse> {
        if self.connection.is_authorized() {
            return Some(match self.connection.media() {
                Some(_) => RtspResponse::ok().add_header("Public", PUBLIC_METHODS),
                None => RtspResponse::unauthorized(),
            });
        }

        self.connection.set_target(request.target());
        self.connection.set_state(ConnectionState::Authorizing);
        let access = &self.connection.context().access;
        match access.check(&AccessRequest::Auth {
            connection: self.connection.info(),
        }) {
            Ok(data) => {
                self.connection.authorize(data);
                Some(RtspResponse::ok().add_header("Public", PUBLIC_METHODS))
            }
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    reason = e.reason(),
                    "authorization denied"
                );
                self.connection.send(
                    RtspResponse::new(401, e.reason()).cseq(request.cseq()),
                );
                self.connection.destroy(e.reason());
                None
            }
        }
    }

    fn handle_announce(&mut self, request: &RtspRequest) -> RtspResponse {
        self.connection.set_target(request.target());
        let media = match self.create_media(MediaRole::Publish) {
            Ok(media) => media,
            Err(e) => return RtspResponse::new(403, e.reason()),
        };
        if !request.body.trim().is_empty()
            && let Err(e) = media.set_sdp(&request.body)
        {
            return RtspResponse::new(500, e.reason());
        }
        RtspResponse::ok()
    }

    fn handle_sdp(&mut self, text: &str) {
        let result = match self.connection.media() {
            Some(media) if media.is_publish() => media.set_sdp(text),
            _ => {
                self.connection.send(RtspResponse::new(500, "UnknownMedia"));
                return;
            }
        };
        if let Err(e) = result {
            tracing::warn!(connection_id = %self.connection.id(), error = %e, "rejected SDP");
            self.connection.send(RtspResponse::new(500, e.reason()));
        }
    }

    fn handle_setup(&mut self, request: &RtspRequest) -> RtspResponse {
        let Some(media) = self.connection.media() else {
            return RtspResponse::new(500, RtspError::InvalidMedia.reason());
        };
        let transport = request.get_header("Transport").unwrap_or("");
        match media.negotiate(transport) {
            Ok(negotiated) => RtspResponse::ok()
                .add_header("Transport", &negotiated)
                .add_header("Session", self.connection.id()),
            Err(e) => {
                tracing::warn!(
                    connection_id = %self.connection.id(),
                    transport,
                    reason = e.reason(),
                    "SETUP failed"
                );
                RtspResponse::new(500, e.reason())
            }
        }
    }

    fn handle_teardown(&mut self) -> RtspResponse {
        self.connection.destroy("stop");
        RtspResponse::ok()
    }

    fn handle_describe(&mut self, request: &RtspRequest) -> RtspResponse {
        self.connection.set_target(request.target());
        let media = match self.create_media(MediaRole::View) {
            Ok(media) => media,
            Err(e) => return RtspResponse::new(403, e.reason()),
        };
        match media.generate_sdp() {
            Ok(sdp) => RtspResponse::ok()
                .add_header("Content-Type", "application/sdp")
                .with_body(sdp),
            Err(e) => RtspResponse::new(500, e.reason()),
        }
    }

    fn handle_live(&mut self) -> RtspResponse {
        let Some(media) = self.connection.media() else {
            return RtspResponse::new(404, "MediaNotFound");
        };
        match media.go_live() {
            Ok(()) => RtspResponse::ok(),
            Err(e) => RtspResponse::new(500, e.reason()),
        }
    }

    /// Create, register and attach a media session named after the current
    /// request target. A registration failure destroys only the media
    /// session; the connection stays usable.
    fn create_media(&self, role: MediaRole) -> Result<Arc<MediaSession>> {
        if self.connection.media().is_some() {
            return Err(RtspError::InvalidMedia);
        }
        let ctx = self.connection.context().clone();
        let target = self.connection.target();
        let media = MediaSession::new(ctx.clone(), &target.name, role);
        let client: Arc<dyn Client> = self.connection.clone();
        media.set_client(&client);

        if let Err(e) = ctx.registry.register(&media, &client, &ctx.access) {
            media.detach_client();
            media.destroy(e.reason());
            return Err(e);
        }
        if !self.connection.attach_media(media.clone()) {
            media.destroy("close");
            return Err(RtspError::InvalidClient);
        }
        Ok(media)
    }
}
