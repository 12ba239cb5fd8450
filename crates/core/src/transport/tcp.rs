use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TrySendError, sync_channel};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};

use crate::access::{AccessData, ConnectionInfo};
use crate::error::Result;
use crate::event::ServerEvent;
use crate::protocol::{CommandHandler, RequestTarget, RtspResponse};
use crate::server::ServerContext;
use crate::session::{Client, MediaSession};

/// Size of a single socket read.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Non-blocking TCP accept loop.
///
/// Checks the `running` flag between accepts with a 50ms poll interval
/// so that [`crate::server::Server::stop`] can terminate it promptly.
pub(crate) fn accept_loop(listener: TcpListener, ctx: Arc<ServerContext>, running: Arc<AtomicBool>) {
    while running.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => match Connection::open(stream, ctx.clone()) {
                Ok((connection, reader)) => {
                    if let Err(e) = Connection::start(&connection, reader) {
                        tracing::warn!(error = %e, "failed to spawn connection thread");
                        connection.destroy(&e.to_string());
                    }
                }
                Err(e) => tracing::warn!(error = %e, "failed to set up accepted socket"),
            },
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(e) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(error = %e, "TCP accept error");
                }
            }
        }
    }
    tracing::debug!("accept loop exited");
}

/// Where a connection is in the control protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connected,
    Authorizing,
    Authorized,
    Destroyed,
}

/// One client control connection.
///
/// Owns the socket and at most one media session. Inbound chunks are read
/// on a dedicated thread and fed to a [`CommandHandler`]. Outbound writes
/// may come from any thread (responses from the reader thread, relayed
/// media from publisher threads); they are queued and written by the
/// connection's writer thread, so a peer that stops reading never stalls
/// the thread that relays to it. A full queue destroys the connection with
/// reason `overflow`, a failed socket write with reason `write`.
///
/// Destruction is idempotent and terminal: it closes the read side,
/// destroys the attached media session and removes the connection from the
/// server. The writer thread flushes what was queued before the
/// destruction, then shuts the socket down.
pub struct Connection {
    id: String,
    peer_addr: SocketAddr,
    ctx: Arc<ServerContext>,
    /// Sending half of the outbound queue, dropped on destruction.
    outbound: Mutex<Option<SyncSender<Bytes>>>,
    /// Handle used only to close the read side.
    control: TcpStream,
    destroyed: AtomicBool,
    reason: Mutex<Option<String>>,
    state: RwLock<ConnectionState>,
    auth: RwLock<Option<AccessData>>,
    target: RwLock<RequestTarget>,
    media: Mutex<Option<Arc<MediaSession>>>,
}

impl Connection {
    /// Configure an accepted socket, spawn its writer thread and register
    /// the connection.
    ///
    /// Returns the connection and the read half for [`start`](Self::start).
    pub(crate) fn open(stream: TcpStream, ctx: Arc<ServerContext>) -> Result<(Arc<Self>, TcpStream)> {
        let peer_addr = stream.peer_addr()?;
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        stream.set_write_timeout(Some(ctx.config.write_timeout))?;
        let reader = stream.try_clone()?;
        let control = stream.try_clone()?;

        let id = format!("{:032x}", rand::random::<u128>());
        let (outbound, queue) = sync_channel(ctx.config.write_queue.max(1));
        let connection = Arc::new(Connection {
            id: id.clone(),
            peer_addr,
            ctx: ctx.clone(),
            outbound: Mutex::new(Some(outbound)),
            control,
            destroyed: AtomicBool::new(false),
            reason: Mutex::new(None),
            state: RwLock::new(ConnectionState::Connected),
            auth: RwLock::new(None),
            target: RwLock::new(RequestTarget::default()),
            media: Mutex::new(None),
        });

        let writer = Arc::downgrade(&connection);
        thread::Builder::new()
            .name(format!("rtsp-write-{}", &id[..8]))
            .spawn(move || write_loop(stream, queue, writer))?;

        ctx.connections.lock().insert(id.clone(), connection.clone());
        tracing::info!(connection_id = %id, %peer_addr, "client connected");
        ctx.events.emit(&ServerEvent::Connected {
            connection_id: id,
            peer_addr,
        });
        Ok((connection, reader))
    }

    /// Spawn the reader thread.
    pub(crate) fn start(connection: &Arc<Self>, reader: TcpStream) -> Result<()> {
        let worker = connection.clone();
        thread::Builder::new()
            .name(format!("rtsp-conn-{}", &connection.id[..8]))
            .spawn(move || worker.run(reader))?;
        Ok(())
    }

    /// Read loop. Every chunk is handed to the command handler as read.
    fn run(self: Arc<Self>, mut reader: TcpStream) {
        let mut handler = CommandHandler::new(self.clone());
        let mut buf = vec![0u8; READ_BUFFER_SIZE];

        let reason = loop {
            if self.is_destroyed() {
                break None;
            }
            match reader.read(&mut buf) {
                Ok(0) => break Some("close".to_string()),
                Ok(n) => handler.handle_chunk(&buf[..n]),
                Err(ref e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => break Some(e.to_string()),
            }
        };
        if let Some(reason) = reason {
            self.destroy(&reason);
        }

        tracing::info!(
            connection_id = %self.id,
            peer_addr = %self.peer_addr,
            reason = self.destroy_reason().as_deref().unwrap_or(""),
            "client disconnected"
        );
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        if !self.is_destroyed() {
            *self.state.write() = state;
        }
    }

    pub fn is_authorized(&self) -> bool {
        self.auth.read().is_some()
    }

    /// Data granted by the `auth` access check.
    pub fn auth_data(&self) -> Option<AccessData> {
        self.auth.read().clone()
    }

    pub(crate) fn authorize(&self, data: AccessData) {
        *self.auth.write() = Some(data);
        self.set_state(ConnectionState::Authorized);
        tracing::info!(connection_id = %self.id, "client authorized");
        self.ctx.events.emit(&ServerEvent::Authorized {
            connection_id: self.id.clone(),
        });
    }

    pub fn target(&self) -> RequestTarget {
        self.target.read().clone()
    }

    pub(crate) fn set_target(&self, target: RequestTarget) {
        *self.target.write() = target;
    }

    pub fn media(&self) -> Option<Arc<MediaSession>> {
        self.media.lock().clone()
    }

    /// Attach `media`. Fails once the connection is destroyed, in which case
    /// the caller owns the media session's cleanup.
    pub(crate) fn attach_media(&self, media: Arc<MediaSession>) -> bool {
        let mut slot = self.media.lock();
        if self.is_destroyed() {
            return false;
        }
        *slot = Some(media);
        true
    }

    pub(crate) fn context(&self) -> &Arc<ServerContext> {
        &self.ctx
    }

    pub fn destroy_reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Write a structured response with the configured server identity.
    pub fn send(&self, response: RtspResponse) -> usize {
        let response = response.server(&self.ctx.config.server_name);
        tracing::debug!(
            connection_id = %self.id,
            status = response.status_code,
            reason = %response.status_text,
            "response"
        );
        self.write(response.serialize().as_bytes())
    }
}

impl Client for Connection {
    fn id(&self) -> &str {
        &self.id
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    fn write(&self, data: &[u8]) -> usize {
        if self.is_destroyed() {
            return 0;
        }
        let queued = match self.outbound.lock().as_ref() {
            Some(outbound) => outbound.try_send(Bytes::copy_from_slice(data)),
            None => return 0,
        };
        match queued {
            Ok(()) => data.len(),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(connection_id = %self.id, "outbound queue full");
                self.destroy("overflow");
                0
            }
            Err(TrySendError::Disconnected(_)) => 0,
        }
    }

    fn destroy(&self, reason: &str) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        *self.reason.lock() = Some(reason.to_string());
        *self.state.write() = ConnectionState::Destroyed;

        if let Err(e) = self.control.shutdown(Shutdown::Read) {
            tracing::trace!(connection_id = %self.id, error = %e, "socket shutdown failed");
        }
        self.ctx.connections.lock().remove(&self.id);

        let media = self.media.lock().take();
        if let Some(media) = media {
            media.destroy(reason);
        }
        // Closing the queue lets the writer flush and shut the socket down.
        drop(self.outbound.lock().take());

        tracing::debug!(connection_id = %self.id, reason, "connection destroyed");
        self.ctx.events.emit(&ServerEvent::ConnectionClosed {
            connection_id: self.id.clone(),
            reason: reason.to_string(),
        });
        true
    }

    fn info(&self) -> ConnectionInfo {
        ConnectionInfo {
            id: self.id.clone(),
            peer_addr: self.peer_addr,
            target: self.target(),
        }
    }
}

/// Writer thread: drains the outbound queue until the connection drops its
/// sender, then shuts the socket down.
fn write_loop(mut stream: TcpStream, queue: Receiver<Bytes>, connection: Weak<Connection>) {
    for data in queue.iter() {
        if let Err(e) = stream.write_all(&data) {
            tracing::debug!(error = %e, "write failed");
            if let Some(connection) = connection.upgrade() {
                connection.destroy("write");
            }
            break;
        }
    }
    if let Err(e) = stream.shutdown(Shutdown::Both) {
        tracing::trace!(error = %e, "socket shutdown failed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("state", &self.state())
            .finish()
    }
}
