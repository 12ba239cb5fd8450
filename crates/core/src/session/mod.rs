//! Media sessions: one published or viewed stream.
//!
//! A publish session receives media from its connection (TCP-interleaved
//! frames, or UDP through its transport channels) and re-emits it on two
//! hubs:
//!
//! - `tcp_frames`: complete interleaved frames (`$`, channel, length,
//!   payload), consumed by TCP-mode viewers.
//! - `payloads`: bare payloads tagged with their media type, consumed by
//!   UDP-mode view channels.
//!
//! A view session mirrors exactly one publisher (its *target*). It never
//! owns the publisher; it subscribes to the publisher's hubs and is torn
//! down when the publisher's `destroyed` hub fires.
//!
//! ## Lifecycle
//!
//! ```text
//! ANNOUNCE / DESCRIBE -> Negotiating  (registered in the registry)
//! SETUP (xN)          -> Negotiating  (transport mode fixed by the first)
//! RECORD / PLAY       -> Live
//! destroy()           -> (terminal)
//! ```

mod describe;
mod negotiate;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::access::{AccessData, ConnectionInfo, MediaInfo};
use crate::error::{Result, RtspError};
use crate::event::{EventHub, ServerEvent, Subscription};
use crate::protocol::SessionDescription;
use crate::server::ServerContext;
use crate::transport::interleave::split_frame;
use crate::transport::udp::TransportChannel;

pub use transport::{TransportHeader, TransportMode};

/// The side of the relay a media session sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaRole {
    /// Supplies media (ANNOUNCE / RECORD).
    Publish,
    /// Mirrors a publisher (DESCRIBE / PLAY).
    View,
}

impl MediaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::View => "view",
        }
    }
}

impl std::fmt::Display for MediaRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaState {
    Negotiating,
    Live,
}

/// A payload tagged with the media type it belongs to.
#[derive(Debug, Clone)]
pub struct MediaPayload {
    pub media_type: String,
    pub payload: Bytes,
}

/// The connection side of a media session.
///
/// Media sessions only hold a weak handle to their client: losing the
/// connection destroys the session, never the other way round at creation.
pub trait Client: Send + Sync {
    fn id(&self) -> &str;
    fn peer_addr(&self) -> SocketAddr;
    fn is_destroyed(&self) -> bool;
    /// Best-effort raw write. Returns the number of bytes written, 0 on any
    /// failure or after destruction.
    fn write(&self, data: &[u8]) -> usize;
    /// Returns `false` if the client was already destroyed.
    fn destroy(&self, reason: &str) -> bool;
    /// Snapshot presented to access handlers.
    fn info(&self) -> ConnectionInfo;
}

pub struct MediaSession {
    id: String,
    role: MediaRole,
    name: String,
    ctx: Arc<ServerContext>,
    destroyed: AtomicBool,
    reason: Mutex<Option<String>>,
    client: RwLock<Option<Weak<dyn Client>>>,
    target: RwLock<Option<Arc<MediaSession>>>,
    inner: Mutex<MediaInner>,
    tcp_frames: EventHub<Bytes>,
    payloads: EventHub<MediaPayload>,
    destroyed_hub: EventHub<String>,
}

#[derive(Default)]
struct MediaInner {
    sdp: String,
    description: Option<SessionDescription>,
    mode: Option<TransportMode>,
    /// Transport header of every successful SETUP, in order.
    setups: Vec<String>,
    /// Interleaved channel number -> media type (publish only).
    interleaved: HashMap<u8, String>,
    channels: HashMap<String, Arc<TransportChannel>>,
    live: bool,
    access: AccessData,
    subscriptions: Vec<Subscription>,
}

impl MediaSession {
    pub(crate) fn new(ctx: Arc<ServerContext>, name: &str, role: MediaRole) -> Arc<Self> {
        let id = format!("{:032x}", rand::random::<u128>());
        tracing::debug!(media_id = %id, name, %role, "media session created");
        Arc::new(MediaSession {
            id,
            role,
            name: name.to_string(),
            ctx,
            destroyed: AtomicBool::new(false),
            reason: Mutex::new(None),
            client: RwLock::new(None),
            target: RwLock::new(None),
            inner: Mutex::new(MediaInner::default()),
            tcp_frames: EventHub::new(),
            payloads: EventHub::new(),
            destroyed_hub: EventHub::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> MediaRole {
        self.role
    }

    pub fn is_publish(&self) -> bool {
        self.role == MediaRole::Publish
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Why the session was destroyed, once it has been.
    pub fn destroy_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    pub fn state(&self) -> MediaState {
        if self.inner.lock().live {
            MediaState::Live
        } else {
            MediaState::Negotiating
        }
    }

    pub fn is_live(&self) -> bool {
        !self.is_destroyed() && self.inner.lock().live
    }

    /// Transport mode fixed by the first successful SETUP.
    pub fn mode(&self) -> Option<TransportMode> {
        self.inner.lock().mode
    }

    pub fn sdp(&self) -> String {
        self.inner.lock().sdp.clone()
    }

    pub fn description(&self) -> Option<SessionDescription> {
        self.inner.lock().description.clone()
    }

    /// Number of SETUPs completed so far.
    pub fn setup_count(&self) -> usize {
        self.inner.lock().setups.len()
    }

    /// Data granted by the `media` access check.
    pub fn access_data(&self) -> AccessData {
        self.inner.lock().access.clone()
    }

    pub(crate) fn set_access_data(&self, data: AccessData) {
        self.inner.lock().access = data;
    }

    pub fn channel(&self, media_type: &str) -> Option<Arc<TransportChannel>> {
        self.inner.lock().channels.get(media_type).cloned()
    }

    pub fn client(&self) -> Option<Arc<dyn Client>> {
        self.client.read().as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn set_client(&self, client: &Arc<dyn Client>) {
        *self.client.write() = Some(Arc::downgrade(client));
    }

    /// Forget the owning connection so destruction does not cascade to it.
    pub(crate) fn detach_client(&self) {
        *self.client.write() = None;
    }

    /// The publisher a view session mirrors.
    pub fn target(&self) -> Option<Arc<MediaSession>> {
        self.target.read().clone()
    }

    pub(crate) fn set_target(&self, target: Arc<MediaSession>) {
        *self.target.write() = Some(target);
    }

    pub fn info(&self) -> MediaInfo {
        MediaInfo {
            id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        }
    }

    /// Observe complete interleaved frames produced by this session.
    pub fn on_tcp_frame<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Bytes) + Send + Sync + 'static,
    {
        self.tcp_frames.subscribe(listener)
    }

    /// Observe type-tagged payloads produced by this session.
    pub fn on_payload<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&MediaPayload) + Send + Sync + 'static,
    {
        self.payloads.subscribe(listener)
    }

    /// Observe destruction. The listener receives the reason.
    pub fn on_destroy<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&String) + Send + Sync + 'static,
    {
        self.destroyed_hub.subscribe(listener)
    }

    /// Store and parse the publisher's session description.
    pub fn set_sdp(&self, sdp: &str) -> Result<()> {
        if self.is_destroyed() {
            return Err(RtspError::MediaDestroyed(self.reason_or_default()));
        }
        let description = SessionDescription::parse(sdp)?;
        tracing::debug!(
            media_id = %self.id,
            media = ?description.media_types(),
            "session description stored"
        );
        let mut inner = self.inner.lock();
        inner.sdp = sdp.to_string();
        inner.description = Some(description);
        Ok(())
    }

    /// RECORD / PLAY.
    ///
    /// A publisher only flips to live; its media already flows through the
    /// connection and its channels. A viewer subscribes to its target:
    /// TCP-mode viewers get every interleaved frame written to their
    /// connection, and every viewer is destroyed when the target goes away.
    pub fn go_live(self: &Arc<Self>) -> Result<()> {
        if self.is_destroyed() {
            return Err(RtspError::MediaDestroyed(self.reason_or_default()));
        }
        let client = self
            .client()
            .filter(|client| !client.is_destroyed())
            .ok_or(RtspError::InvalidClient)?;

        if self.inner.lock().live {
            tracing::debug!(media_id = %self.id, "already live");
            return Ok(());
        }

        if self.role == MediaRole::View {
            let target = self
                .target()
                .filter(|target| !target.is_destroyed())
                .ok_or(RtspError::InvalidTargetMedia)?;

            let mut subscriptions = Vec::with_capacity(2);
            if self.mode() == Some(TransportMode::Tcp) {
                let view = Arc::downgrade(self);
                let client = Arc::downgrade(&client);
                subscriptions.push(target.on_tcp_frame(move |frame| {
                    let Some(view) = view.upgrade() else {
                        return;
                    };
                    if view.is_destroyed() {
                        return;
                    }
                    if let Some(client) = client.upgrade() {
                        client.write(frame);
                    }
                }));
            }

            let view = Arc::downgrade(self);
            subscriptions.push(target.on_destroy(move |_| {
                if let Some(view) = view.upgrade() {
                    view.destroy("end");
                }
            }));

            self.inner.lock().subscriptions.extend(subscriptions);

            // A target destroyed before we subscribed never notifies us.
            if target.is_destroyed() {
                self.destroy("end");
                return Err(RtspError::InvalidTargetMedia);
            }
        }

        self.inner.lock().live = true;
        tracing::info!(media_id = %self.id, name = %self.name, role = %self.role, "media live");
        self.ctx.events.emit(&ServerEvent::MediaLive {
            media_id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
        });
        Ok(())
    }

    /// Route one complete interleaved frame received on the connection.
    ///
    /// Publishers re-emit the frame to TCP viewers and, in TCP mode,
    /// demultiplex it by channel number to UDP-side consumers. Frames on
    /// unmapped channels reach TCP viewers only.
    pub fn push_interleaved(&self, frame: Bytes) {
        if self.role != MediaRole::Publish || self.is_destroyed() {
            return;
        }
        self.tcp_frames.emit(&frame);

        let Some((channel, payload)) = split_frame(&frame) else {
            return;
        };
        let media_type = {
            let inner = self.inner.lock();
            if inner.mode != Some(TransportMode::Tcp) {
                return;
            }
            match inner.interleaved.get(&channel) {
                Some(media_type) => media_type.clone(),
                None => {
                    tracing::trace!(media_id = %self.id, channel, "unmapped interleaved channel");
                    return;
                }
            }
        };

        if !payload.is_empty() {
            self.payloads.emit(&MediaPayload {
                media_type,
                payload,
            });
        }
    }

    /// Tear the session down. Idempotent: returns `false` if it was already
    /// destroyed.
    ///
    /// A live client is sent a courtesy TEARDOWN and then destroyed. Every
    /// transport channel is closed, the registry entry removed and all
    /// listeners released.
    pub fn destroy(&self, reason: &str) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.reason.lock() = Some(reason.to_string());
        tracing::info!(media_id = %self.id, name = %self.name, role = %self.role, reason, "media destroyed");

        if let Some(client) = self.client().filter(|client| !client.is_destroyed()) {
            let teardown = format!(
                "TEARDOWN rtsp://{}:{}/{} RTSP/1.0\r\nCSeq: 1000\r\nSession: {}\r\n\r\n",
                self.ctx.config.host,
                self.ctx.advertised_port(),
                self.name,
                client.id()
            );
            client.write(teardown.as_bytes());
            client.destroy(reason);
        }

        let (channels, subscriptions) = {
            let mut inner = self.inner.lock();
            let channels: Vec<_> = inner.channels.drain().map(|(_, channel)| channel).collect();
            (channels, std::mem::take(&mut inner.subscriptions))
        };
        for channel in channels {
            channel.destroy(reason);
        }
        drop(subscriptions);

        self.ctx.registry.unregister(self);

        self.destroyed_hub.emit(&reason.to_string());
        self.destroyed_hub.close();
        self.tcp_frames.close();
        self.payloads.close();

        self.ctx.events.emit(&ServerEvent::MediaDestroyed {
            media_id: self.id.clone(),
            name: self.name.clone(),
            role: self.role,
            reason: reason.to_string(),
        });
        true
    }

    fn reason_or_default(&self) -> String {
        self.destroy_reason().unwrap_or_else(|| "destroy".to_string())
    }
}

impl std::fmt::Debug for MediaSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSession")
            .field("id", &self.id)
            .field("role", &self.role)
            .field("name", &self.name)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
