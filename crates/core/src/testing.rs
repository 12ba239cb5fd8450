//! Shared fixtures for unit tests.

use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use crate::access::ConnectionInfo;
use crate::protocol::RequestTarget;
use crate::server::{ServerConfig, ServerContext};
use crate::session::{Client, MediaRole, MediaSession};

/// In-memory [`Client`] that records every write.
pub(crate) struct RecordingClient {
    id: String,
    destroyed: AtomicBool,
    reason: Mutex<Option<String>>,
    writes: Mutex<Vec<Vec<u8>>>,
}

impl RecordingClient {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(RecordingClient {
            id: format!("{:032x}", rand::random::<u128>()),
            destroyed: AtomicBool::new(false),
            reason: Mutex::new(None),
            writes: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn as_client(self: &Arc<Self>) -> Arc<dyn Client> {
        self.clone()
    }

    pub(crate) fn writes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().clone()
    }

    pub(crate) fn destroy_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }
}

impl Client for RecordingClient {
    fn id(&self) -> &str {
        &self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], 40000))
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        self.writes.lock().push(data.to_vec());
        data.len()
    }

    fn destroy(&self, reason: &str) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.reason.lock() = Some(reason.to_string());
        true
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            peer_addr: self.peer_addr(),
            target: RequestTarget::default(),
        }
    }
}

pub(crate) fn context() -> Arc<ServerContext> {
    ServerContext::new(ServerConfig::default()).unwrap()
}

pub(crate) fn context_with_ports(range: RangeInclusive<u16>) -> Arc<ServerContext> {
    ServerContext::new(ServerConfig {
        port_range: range,
        ..ServerConfig::default()
    })
    .unwrap()
}

/// A registered publisher named `name`. An empty `sdp` leaves the session
/// without a description.
pub(crate) fn publish_with_sdp(
    ctx: &Arc<ServerContext>,
    name: &str,
    sdp: &str,
) -> (Arc<MediaSession>, Arc<RecordingClient>) {
    let client = RecordingClient::new();
    let media = MediaSession::new(ctx.clone(), name, MediaRole::Publish);
    let handle = client.as_client();
    media.set_client(&handle);
    ctx.registry.register(&media, &handle, &ctx.access).unwrap();
    if !sdp.is_empty() {
        media.set_sdp(sdp).unwrap();
    }
    (media, client)
}

/// A registered view bound to the current publisher of `name`.
pub(crate) fn view_of(ctx: &Arc<ServerContext>, name: &str) -> (Arc<MediaSession>, Arc<RecordingClient>) {
    let client = RecordingClient::new();
    let media = MediaSession::new(ctx.clone(), name, MediaRole::View);
    let handle = client.as_client();
    media.set_client(&handle);
    ctx.registry.register(&media, &handle, &ctx.access).unwrap();
    (media, client)
}

/// Connected loopback pair: `(accepted, connecting)`. The connecting side
/// has a read timeout so a missing reply fails the test instead of hanging.
pub(crate) fn socket_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let remote = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    remote
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    let (local, _) = listener.accept().unwrap();
    (local, remote)
}

/// Read one RTSP message, honoring `Content-Length`.
pub(crate) fn read_message(stream: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        if let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&data[..end]);
            let body_len = head
                .lines()
                .find_map(|line| line.strip_prefix("Content-Length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if data.len() >= end + 4 + body_len {
                break;
            }
        }
        let n = stream.read(&mut buf).unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);
    }
    String::from_utf8_lossy(&data).into_owned()
}
