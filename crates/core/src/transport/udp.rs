use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, RtspError};
use crate::event::{EventHub, ServerEvent, Subscription};
use crate::protocol::SessionDescription;
use crate::session::{MediaPayload, MediaRole};
use crate::transport::PortPool;
use crate::transport::interleave::{HEADER_LEN, encode_frame};

/// Largest UDP datagram the publish worker accepts.
const MAX_DATAGRAM: usize = 65_536;

/// What a new channel should do, decided by the owning session's role and
/// negotiated mode.
pub(crate) enum ChannelSetup {
    /// Forward the target publisher's payloads of this media type to `dest`.
    View {
        payloads: EventHub<MediaPayload>,
        dest: SocketAddr,
    },
    /// Receive on a pool port and re-emit every accepted packet, both as an
    /// interleaved frame on `interleave_channel` and as a bare payload.
    PublishUdp {
        ports: PortPool,
        interleave_channel: u8,
        tcp_frames: EventHub<Bytes>,
        payloads: EventHub<MediaPayload>,
        poll_interval: Duration,
    },
    /// Frames arrive on the control connection; nothing to own.
    PublishTcp,
}

/// Transport for one media type of one media session.
///
/// ## Relay directions
///
/// ```text
/// publish/UDP:  encoder --UDP--> [pool port] --> tcp_frames + payloads
/// view/UDP:     publisher payloads --> [ephemeral socket] --UDP--> player
/// publish/TCP:  inert; the session demultiplexes connection frames
/// ```
///
/// A publish/UDP channel holds two consecutive pool ports: it receives on
/// the first and advertises both, the second stays reserved and unbound.
/// Destruction is idempotent; it stops the receive worker and returns the
/// pair to the pool exactly once.
pub struct TransportChannel {
    media_type: String,
    role: MediaRole,
    port: u16,
    destroyed: Arc<AtomicBool>,
    pool: Option<PortPool>,
    events: EventHub<ServerEvent>,
    subscription: Mutex<Option<Subscription>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TransportChannel {
    /// Open a channel for `media_type`, which must be present in
    /// `description`.
    pub(crate) fn open(
        description: &SessionDescription,
        media_type: &str,
        setup: ChannelSetup,
        events: &EventHub<ServerEvent>,
    ) -> Result<Arc<Self>> {
        if description.media(media_type).is_none() {
            return Err(RtspError::InvalidTypeData);
        }

        let destroyed = Arc::new(AtomicBool::new(false));
        let channel = match setup {
            ChannelSetup::View { payloads, dest } => {
                let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
                let subscription = {
                    let destroyed = destroyed.clone();
                    let media_type = media_type.to_string();
                    payloads.subscribe(move |payload: &MediaPayload| {
                        if destroyed.load(Ordering::Acquire) || payload.media_type != media_type {
                            return;
                        }
                        if let Err(e) = socket.send_to(&payload.payload, dest) {
                            tracing::trace!(%dest, error = %e, "UDP relay send failed");
                        }
                    })
                };
                tracing::debug!(media_type, %dest, "view channel opened");
                TransportChannel {
                    media_type: media_type.to_string(),
                    role: MediaRole::View,
                    port: dest.port(),
                    destroyed,
                    pool: None,
                    events: events.clone(),
                    subscription: Mutex::new(Some(subscription)),
                    worker: Mutex::new(None),
                }
            }
            ChannelSetup::PublishUdp {
                ports,
                interleave_channel,
                tcp_frames,
                payloads,
                poll_interval,
            } => {
                let port = ports.lock_pair()?;
                events.emit(&ServerEvent::PortLocked(port));
                events.emit(&ServerEvent::PortLocked(port + 1));

                let worker = bind_socket(port, poll_interval).and_then(|socket| {
                    let worker = PublishWorker {
                        socket,
                        media_type: media_type.to_string(),
                        interleave_channel,
                        tcp_frames,
                        payloads,
                        destroyed: destroyed.clone(),
                    };
                    thread::Builder::new()
                        .name(format!("udp-recv-{port}"))
                        .spawn(move || worker.run())
                        .map_err(RtspError::from)
                });
                let worker = match worker {
                    Ok(worker) => worker,
                    Err(e) => {
                        tracing::error!(port, error = %e, "UDP bind failed");
                        release_pair(&ports, port, events);
                        return Err(e);
                    }
                };

                tracing::debug!(media_type, port, interleave_channel, "publish channel bound");
                TransportChannel {
                    media_type: media_type.to_string(),
                    role: MediaRole::Publish,
                    port,
                    destroyed,
                    pool: Some(ports),
                    events: events.clone(),
                    subscription: Mutex::new(None),
                    worker: Mutex::new(Some(worker)),
                }
            }
            ChannelSetup::PublishTcp => TransportChannel {
                media_type: media_type.to_string(),
                role: MediaRole::Publish,
                port: 0,
                destroyed,
                pool: None,
                events: events.clone(),
                subscription: Mutex::new(None),
                worker: Mutex::new(None),
            },
        };

        Ok(Arc::new(channel))
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn role(&self) -> MediaRole {
        self.role
    }

    /// Bound pool port (publish/UDP), destination port (view/UDP), or 0.
    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Stop relaying. Returns `false` if already destroyed.
    pub fn destroy(&self, reason: &str) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        drop(self.subscription.lock().take());

        // The worker owns the socket; the port goes back to the pool only
        // once the socket is closed.
        let worker = self.worker.lock().take();
        if let Some(worker) = worker
            && worker.thread().id() != thread::current().id()
            && worker.join().is_err()
        {
            tracing::warn!(port = self.port, "UDP worker panicked");
        }
        if let Some(pool) = &self.pool {
            release_pair(pool, self.port, &self.events);
        }

        tracing::debug!(media_type = %self.media_type, port = self.port, reason, "channel destroyed");
        true
    }
}

impl Drop for TransportChannel {
    fn drop(&mut self) {
        self.destroy("drop");
    }
}

fn release_pair(pool: &PortPool, port: u16, events: &EventHub<ServerEvent>) {
    for port in [port, port + 1] {
        if pool.unlock(port) {
            events.emit(&ServerEvent::PortUnlocked(port));
        }
    }
}

fn bind_socket(port: u16, poll_interval: Duration) -> Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    socket.set_read_timeout(Some(poll_interval))?;
    Ok(socket)
}

struct PublishWorker {
    socket: UdpSocket,
    media_type: String,
    interleave_channel: u8,
    tcp_frames: EventHub<Bytes>,
    payloads: EventHub<MediaPayload>,
    destroyed: Arc<AtomicBool>,
}

impl PublishWorker {
    fn run(self) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while !self.destroyed.load(Ordering::Acquire) {
            let (n, from) = match self.socket.recv_from(&mut buf) {
                Ok(received) => received,
                Err(ref e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(e) => {
                    tracing::warn!(media_type = %self.media_type, error = %e, "UDP receive failed");
                    break;
                }
            };

            let packet = &buf[..n];
            if packet.is_empty() || is_rtcp_report(packet) {
                continue;
            }
            let Some(frame) = encode_frame(self.interleave_channel, packet) else {
                continue;
            };
            tracing::trace!(%from, len = n, media_type = %self.media_type, "UDP packet");

            if self.destroyed.load(Ordering::Acquire) {
                break;
            }
            self.tcp_frames.emit(&frame);
            self.payloads.emit(&MediaPayload {
                media_type: self.media_type.clone(),
                payload: frame.slice(HEADER_LEN..),
            });
        }
        tracing::trace!(media_type = %self.media_type, "UDP worker exited");
    }
}

/// RTCP sender/receiver report (and SDES/BYE/APP) detection.
///
/// RTP version 2 with a packet type byte in 200..=204 is RTCP, which is not
/// relayed.
pub fn is_rtcp_report(packet: &[u8]) -> bool {
    packet.len() >= 2 && (packet[0] >> 6) == 2 && (200..=204).contains(&packet[1])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SessionDescription;

    fn description() -> SessionDescription {
        SessionDescription::parse(
            "v=0\r\nm=video 0 RTP/AVP 96\r\na=rtpmap:96 H264/90000\r\n\
             m=audio 0 RTP/AVP 97\r\na=rtpmap:97 PCMA/8000\r\n",
        )
        .unwrap()
    }

    #[test]
    fn rtcp_reports_are_detected() {
        assert!(is_rtcp_report(&[0x80, 200, 0, 6]));
        assert!(is_rtcp_report(&[0x81, 201, 0, 7]));
        assert!(is_rtcp_report(&[0x80, 204]));
        assert!(!is_rtcp_report(&[0x80, 96, 0, 1]));
        assert!(!is_rtcp_report(&[0x80, 205]));
        assert!(!is_rtcp_report(&[0x40, 200]));
        assert!(!is_rtcp_report(&[0x80]));
    }

    #[test]
    fn unknown_media_type_is_rejected() {
        let events = EventHub::new();
        assert!(matches!(
            TransportChannel::open(&description(), "text", ChannelSetup::PublishTcp, &events),
            Err(RtspError::InvalidTypeData)
        ));
    }

    #[test]
    fn tcp_publish_channel_is_inert() {
        let events = EventHub::new();
        let channel =
            TransportChannel::open(&description(), "video", ChannelSetup::PublishTcp, &events)
                .unwrap();
        assert_eq!(channel.port(), 0);
        assert_eq!(channel.role(), MediaRole::Publish);
        assert!(channel.destroy("stop"));
        assert!(!channel.destroy("stop"));
    }

    #[test]
    fn view_channel_forwards_matching_payloads() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let dest = receiver.local_addr().unwrap();

        let payloads: EventHub<MediaPayload> = EventHub::new();
        let events = EventHub::new();
        let channel = TransportChannel::open(
            &description(),
            "video",
            ChannelSetup::View {
                payloads: payloads.clone(),
                dest,
            },
            &events,
        )
        .unwrap();

        payloads.emit(&MediaPayload {
            media_type: "audio".to_string(),
            payload: Bytes::from_static(b"skip"),
        });
        payloads.emit(&MediaPayload {
            media_type: "video".to_string(),
            payload: Bytes::from_static(b"frame"),
        });

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"frame");

        channel.destroy("stop");
        assert_eq!(payloads.listener_count(), 0);
    }

    #[test]
    fn publish_channel_relays_and_releases_port() {
        let pool = PortPool::new(47200..=47204).unwrap();
        let tcp_frames: EventHub<Bytes> = EventHub::new();
        let payloads: EventHub<MediaPayload> = EventHub::new();
        let events: EventHub<ServerEvent> = EventHub::new();
        let seen_events = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen_events.clone();
        let _events = events.subscribe(move |e| recorder.lock().push(e.clone()));

        let (tx, rx) = std::sync::mpsc::channel();
        let tx_frames = tx.clone();
        let _frames = tcp_frames.subscribe(move |f: &Bytes| {
            let _ = tx_frames.send(("tcp", f.to_vec()));
        });
        let _payloads = payloads.subscribe(move |p: &MediaPayload| {
            let _ = tx.send(("udp", p.payload.to_vec()));
        });

        let channel = TransportChannel::open(
            &description(),
            "audio",
            ChannelSetup::PublishUdp {
                ports: pool.clone(),
                interleave_channel: 2,
                tcp_frames,
                payloads,
                poll_interval: Duration::from_millis(20),
            },
            &events,
        )
        .unwrap();
        assert_eq!(channel.port(), 47200);
        assert!(!pool.contains(47200));
        assert!(!pool.contains(47201));

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender.send_to(&[0x80, 200, 0, 0], ("127.0.0.1", 47200)).unwrap();
        sender.send_to(&[0x80, 97, 0, 1], ("127.0.0.1", 47200)).unwrap();

        let timeout = Duration::from_secs(2);
        assert_eq!(
            rx.recv_timeout(timeout).unwrap(),
            ("tcp", vec![0x24, 2, 0, 4, 0x80, 97, 0, 1])
        );
        assert_eq!(rx.recv_timeout(timeout).unwrap(), ("udp", vec![0x80, 97, 0, 1]));

        assert!(channel.destroy("stop"));
        assert!(pool.contains(47200));
        assert!(pool.contains(47201));
        assert!(!channel.destroy("stop"));
        assert_eq!(
            *seen_events.lock(),
            vec![
                ServerEvent::PortLocked(47200),
                ServerEvent::PortLocked(47201),
                ServerEvent::PortUnlocked(47200),
                ServerEvent::PortUnlocked(47201),
            ]
        );
    }
}
