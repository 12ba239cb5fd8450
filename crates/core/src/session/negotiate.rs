//! SETUP negotiation.
//!
//! The n-th successful SETUP of a session binds to the n-th `m=` entry of
//! its session description, whatever the media type or control URL the
//! client asked for. Failed SETUPs do not advance the ordinal.

use std::net::SocketAddr;
use std::sync::Arc;

use super::{MediaInner, MediaRole, MediaSession, TransportHeader, TransportMode};
use crate::error::{Result, RtspError};
use crate::transport::udp::{ChannelSetup, TransportChannel};

/// Interleave range used by TCP viewers when the entry declares none.
const DEFAULT_INTERLEAVED: &str = "0-1";

impl MediaSession {
    /// Negotiate one media entry from a SETUP `Transport` header value.
    ///
    /// Returns the transport string for the reply:
    ///
    /// | Role | Mode | Effect | Reply |
    /// |------|------|--------|-------|
    /// | view | TCP | none, frames ride the connection | canned interleaved transport |
    /// | view | UDP | channel sending to the client's `client_port` | the request unchanged |
    /// | publish | TCP | channel-number mapping, inert channel | the request unchanged |
    /// | publish | UDP | channel bound to a pool port | client and server ports |
    pub fn negotiate(&self, transport: &str) -> Result<String> {
        if self.is_destroyed() {
            return Err(RtspError::MediaDestroyed(self.reason_or_default()));
        }
        let header = TransportHeader::parse(transport).ok_or(RtspError::InvalidTransport)?;

        let (index, description, existing) = {
            let inner = self.inner.lock();
            if let Some(mode) = inner.mode
                && mode != header.mode
            {
                tracing::debug!(media_id = %self.id, fixed = %mode, requested = %header.mode, "transport mode mismatch");
                return Err(RtspError::InvalidMediaType);
            }
            let index = inner.setups.len();
            let description = inner
                .description
                .clone()
                .filter(|description| index < description.media.len())
                .ok_or(RtspError::InvalidTypeData)?;
            let existing = inner
                .channels
                .get(&description.media[index].media_type)
                .cloned();
            (index, description, existing)
        };
        let entry = &description.media[index];
        let media_type = entry.media_type.clone();

        // Channels are opened without the session lock: opening binds
        // sockets and emits server events.
        let open = |setup: ChannelSetup| -> Result<Arc<TransportChannel>> {
            match &existing {
                Some(channel) => Ok(channel.clone()),
                None => TransportChannel::open(&description, &media_type, setup, &self.ctx.events),
            }
        };

        let (reply, channel, interleaved) = match (self.role, header.mode) {
            (MediaRole::View, TransportMode::Tcp) => {
                let reply = format!(
                    "RTP/AVP/TCP;unicast;mode=record;interleaved={}",
                    entry.interleaved.as_deref().unwrap_or(DEFAULT_INTERLEAVED)
                );
                (reply, None, None)
            }
            (MediaRole::View, TransportMode::Udp) => {
                let client = self.client().ok_or(RtspError::InvalidClient)?;
                let port = header
                    .client_port
                    .as_ref()
                    .ok_or(RtspError::InvalidTransport)?
                    .first;
                let target = self.target().ok_or(RtspError::InvalidTargetMedia)?;
                let dest = SocketAddr::new(client.peer_addr().ip(), port);
                let channel = open(ChannelSetup::View {
                    payloads: target.payloads.clone(),
                    dest,
                })?;
                (transport.to_string(), Some(channel), None)
            }
            (MediaRole::Publish, mode) => {
                if !self.client().is_some_and(|client| !client.is_destroyed()) {
                    return Err(RtspError::InvalidClient);
                }
                match mode {
                    TransportMode::Tcp => {
                        let interleaved = header
                            .interleaved
                            .as_ref()
                            .ok_or(RtspError::InterleavedError)?;
                        let channel = open(ChannelSetup::PublishTcp)?;
                        let mapping = (interleaved.first, interleaved.text.clone());
                        (transport.to_string(), Some(channel), Some(mapping))
                    }
                    TransportMode::Udp => {
                        let (range, first) = if index == 0 { ("0-1", 0) } else { ("2-3", 2) };
                        let channel = open(ChannelSetup::PublishUdp {
                            ports: self.ctx.ports.clone(),
                            interleave_channel: first,
                            tcp_frames: self.tcp_frames.clone(),
                            payloads: self.payloads.clone(),
                            poll_interval: self.ctx.config.udp_poll_interval,
                        })?;
                        let port = channel.port();
                        let reply = format!(
                            "RTP/AVP/UDP;unicast;mode=record;client_port={};server_port={}-{}",
                            header.client_port_text(),
                            port,
                            port.saturating_add(1)
                        );
                        (reply, Some(channel), Some((first, range.to_string())))
                    }
                }
            }
        };

        let mut inner = self.inner.lock();
        let stale = if self.is_destroyed() {
            Some(RtspError::MediaDestroyed(self.reason_or_default()))
        } else if inner.mode.is_some_and(|mode| mode != header.mode) {
            Some(RtspError::InvalidMediaType)
        } else if inner.setups.len() != index {
            Some(RtspError::InvalidTypeData)
        } else {
            None
        };
        if let Some(e) = stale {
            drop(inner);
            if existing.is_none()
                && let Some(channel) = channel
            {
                channel.destroy("negotiate");
            }
            return Err(e);
        }

        if let Some(channel) = &channel {
            inner
                .channels
                .entry(media_type.clone())
                .or_insert_with(|| channel.clone());
        }
        if let Some((first, range)) = interleaved {
            inner.interleaved.insert(first, media_type.clone());
            let port = channel.as_ref().map_or(0, |channel| channel.port());
            record_entry(&mut inner, index, &range, port);
        }
        inner.mode.get_or_insert(header.mode);
        inner.setups.push(transport.to_string());
        drop(inner);

        tracing::debug!(
            media_id = %self.id,
            index,
            %media_type,
            mode = %header.mode,
            %reply,
            "SETUP negotiated"
        );
        Ok(reply)
    }
}

fn record_entry(inner: &mut MediaInner, index: usize, interleaved: &str, port: u16) {
    if let Some(entry) = inner
        .description
        .as_mut()
        .and_then(|description| description.media.get_mut(index))
    {
        entry.interleaved = Some(interleaved.to_string());
        entry.port = port;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ServerEvent;
    use crate::session::Client;
    use crate::testing::{context, context_with_ports, publish_with_sdp, view_of};
    use parking_lot::Mutex;

    const TWO_TRACKS: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=cam\r\nt=0 0\r\n\
        m=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\na=control:streamid=0\r\n\
        m=audio 0 RTP/AVP 97\r\na=rtpmap:97 MPEG4-GENERIC/44100/2\r\na=control:streamid=1\r\n";

    #[test]
    fn empty_transport_is_rejected() {
        let ctx = context();
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);
        assert!(matches!(publisher.negotiate(""), Err(RtspError::InvalidTransport)));
        assert_eq!(publisher.setup_count(), 0);
    }

    #[test]
    fn setups_bind_to_entries_by_position() {
        let ctx = context();
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);

        // Control URLs are ignored: order alone decides the entry.
        publisher
            .negotiate("RTP/AVP/TCP;unicast;interleaved=4-5;mode=record")
            .unwrap();
        publisher
            .negotiate("RTP/AVP/TCP;unicast;interleaved=6-7;mode=record")
            .unwrap();

        let description = publisher.description().unwrap();
        assert_eq!(description.media[0].media_type, "video");
        assert_eq!(description.media[0].interleaved.as_deref(), Some("4-5"));
        assert_eq!(description.media[1].media_type, "audio");
        assert_eq!(description.media[1].interleaved.as_deref(), Some("6-7"));
        assert!(publisher.channel("video").is_some());
        assert!(publisher.channel("audio").is_some());
        assert_eq!(publisher.channel("video").unwrap().port(), 0);

        assert!(matches!(
            publisher.negotiate("RTP/AVP/TCP;unicast;interleaved=8-9"),
            Err(RtspError::InvalidTypeData)
        ));
        assert_eq!(publisher.setup_count(), 2);
    }

    #[test]
    fn mode_is_fixed_by_first_success() {
        let ctx = context();
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);

        // A failed TCP attempt does not fix the mode.
        assert!(matches!(
            publisher.negotiate("RTP/AVP/TCP;unicast"),
            Err(RtspError::InterleavedError)
        ));
        assert_eq!(publisher.mode(), None);

        publisher
            .negotiate("RTP/AVP/TCP;unicast;interleaved=0-1")
            .unwrap();
        assert_eq!(publisher.mode(), Some(TransportMode::Tcp));
        assert!(matches!(
            publisher.negotiate("RTP/AVP;unicast;client_port=6000-6001"),
            Err(RtspError::InvalidMediaType)
        ));
        assert_eq!(publisher.setup_count(), 1);
    }

    #[test]
    fn setup_without_description_fails() {
        let ctx = context();
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", "");
        assert!(matches!(
            publisher.negotiate("RTP/AVP/TCP;unicast;interleaved=0-1"),
            Err(RtspError::InvalidTypeData)
        ));
    }

    #[test]
    fn publish_requires_live_client() {
        let ctx = context();
        let (publisher, client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);
        client.destroy("close");
        assert!(matches!(
            publisher.negotiate("RTP/AVP/TCP;unicast;interleaved=0-1"),
            Err(RtspError::InvalidClient)
        ));
    }

    #[test]
    fn publish_udp_allocates_server_ports() {
        let ctx = context_with_ports(47100..=47109);
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);

        let reply = publisher
            .negotiate("RTP/AVP/UDP;unicast;client_port=6000-6001;mode=record")
            .unwrap();
        assert_eq!(
            reply,
            "RTP/AVP/UDP;unicast;mode=record;client_port=6000-6001;server_port=47100-47101"
        );
        let reply = publisher
            .negotiate("RTP/AVP/UDP;unicast;client_port=6002-6003;mode=record")
            .unwrap();
        assert_eq!(
            reply,
            "RTP/AVP/UDP;unicast;mode=record;client_port=6002-6003;server_port=47102-47103"
        );

        let description = publisher.description().unwrap();
        assert_eq!(description.media[0].interleaved.as_deref(), Some("0-1"));
        assert_eq!(description.media[0].port, 47100);
        assert_eq!(description.media[1].interleaved.as_deref(), Some("2-3"));
        assert_eq!(description.media[1].port, 47102);
        assert_eq!(ctx.ports.available(), 6);
        for port in 47100..=47103 {
            assert!(!ctx.ports.contains(port));
        }

        publisher.destroy("stop");
        assert_eq!(ctx.ports.available(), 10);
        for port in 47100..=47103 {
            assert!(ctx.ports.contains(port));
        }
    }

    #[test]
    fn port_events_may_call_back_into_the_session() {
        let ctx = context_with_ports(47120..=47129);
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let session = Arc::downgrade(&publisher);
        let sink = seen.clone();
        let _events = ctx.events.subscribe(move |event| {
            if let ServerEvent::PortLocked(port) = event
                && let Some(session) = session.upgrade()
            {
                let channel = session.channel("video").map(|channel| channel.port());
                sink.lock()
                    .push((*port, session.setup_count(), session.description().is_some(), channel));
            }
        });

        publisher
            .negotiate("RTP/AVP/UDP;unicast;client_port=6000-6001;mode=record")
            .unwrap();
        assert_eq!(
            *seen.lock(),
            vec![(47120, 0, true, None), (47121, 0, true, None)]
        );
        assert_eq!(publisher.setup_count(), 1);
        assert_eq!(publisher.channel("video").unwrap().port(), 47120);
    }

    #[test]
    fn destroy_from_port_event_discards_the_setup() {
        let ctx = context_with_ports(47130..=47139);
        let (publisher, _client) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);

        let session = Arc::downgrade(&publisher);
        let _events = ctx.events.subscribe(move |event| {
            if let ServerEvent::PortLocked(_) = event
                && let Some(session) = session.upgrade()
            {
                session.destroy("stop");
            }
        });

        assert!(matches!(
            publisher.negotiate("RTP/AVP/UDP;unicast;client_port=6000-6001;mode=record"),
            Err(RtspError::MediaDestroyed(_))
        ));
        assert!(publisher.channel("video").is_none());
        assert_eq!(ctx.ports.available(), 10);
    }

    #[test]
    fn view_tcp_uses_publisher_interleave_range() {
        let ctx = context();
        let (publisher, _pc) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);
        publisher
            .negotiate("RTP/AVP/TCP;unicast;interleaved=0-1")
            .unwrap();

        let (view, _vc) = view_of(&ctx, "cam1");
        view.generate_sdp().unwrap();
        assert_eq!(
            view.negotiate("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap(),
            "RTP/AVP/TCP;unicast;mode=record;interleaved=0-1"
        );
        // The audio entry was never negotiated by the publisher.
        assert_eq!(
            view.negotiate("RTP/AVP/TCP;unicast;interleaved=2-3").unwrap(),
            "RTP/AVP/TCP;unicast;mode=record;interleaved=0-1"
        );
        assert!(view.channel("video").is_none());
    }

    #[test]
    fn view_udp_creates_outbound_channel() {
        let ctx = context();
        let (_publisher, _pc) = publish_with_sdp(&ctx, "cam1", TWO_TRACKS);
        let (view, _vc) = view_of(&ctx, "cam1");
        view.generate_sdp().unwrap();

        assert!(matches!(
            view.negotiate("RTP/AVP;unicast"),
            Err(RtspError::InvalidTransport)
        ));
        let request = "RTP/AVP;unicast;client_port=6000-6001";
        assert_eq!(view.negotiate(request).unwrap(), request);
        let channel = view.channel("video").unwrap();
        assert_eq!(channel.role(), MediaRole::View);
        assert_eq!(channel.port(), 6000);
    }
}
