use std::collections::HashMap;
use std::net::{SocketAddr, TcpListener};
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::access::{AccessControl, AccessData, AccessHandler, AccessKind, AccessRequest};
use crate::error::{Result, RtspError};
use crate::event::{EventHub, ServerEvent, Subscription};
use crate::protocol::response::DEFAULT_SERVER_NAME;
use crate::registry::SessionRegistry;
use crate::session::Client;
use crate::transport::PortPool;
use crate::transport::tcp::{self, Connection};

/// Server-level configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen host. Also advertised in generated SDP origin lines and in
    /// the TEARDOWN sent to clients of destroyed media.
    pub host: String,
    /// Listen port. `0` binds an ephemeral port.
    pub port: u16,
    /// Value of the `Server` header and the SDP `a=tool:` attribute.
    pub server_name: String,
    /// UDP ports handed out to publishers negotiating UDP transport.
    pub port_range: RangeInclusive<u16>,
    /// Access kinds (`auth`, `media`) denied when no handler is registered.
    pub access: Vec<String>,
    /// Write timeout applied to every accepted control socket. A write that
    /// times out destroys the connection.
    pub write_timeout: Duration,
    /// Outbound messages (responses, relayed frames) queued per connection
    /// before a peer that does not keep up is disconnected.
    pub write_queue: usize,
    /// Receive timeout of publisher UDP workers.
    pub udp_poll_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5544,
            server_name: DEFAULT_SERVER_NAME.to_string(),
            port_range: 56000..=57000,
            access: Vec::new(),
            write_timeout: Duration::from_secs(5),
            write_queue: 512,
            udp_poll_interval: Duration::from_millis(100),
        }
    }
}

/// State shared by every connection, media session and channel of one
/// server.
pub(crate) struct ServerContext {
    pub(crate) config: ServerConfig,
    pub(crate) ports: PortPool,
    pub(crate) registry: SessionRegistry,
    pub(crate) access: AccessControl,
    pub(crate) events: EventHub<ServerEvent>,
    pub(crate) connections: Mutex<HashMap<String, Arc<Connection>>>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl ServerContext {
    pub(crate) fn new(config: ServerConfig) -> Result<Arc<Self>> {
        let ports = PortPool::new(config.port_range.clone())?;
        let events = EventHub::new();
        Ok(Arc::new(Self {
            ports,
            registry: SessionRegistry::new(events.clone()),
            access: AccessControl::new(config.access.clone()),
            events,
            connections: Mutex::new(HashMap::new()),
            local_addr: RwLock::new(None),
            config,
        }))
    }

    /// The port clients reach us on: the bound one once listening.
    pub(crate) fn advertised_port(&self) -> u16 {
        self.local_addr
            .read()
            .map(|addr| addr.port())
            .unwrap_or(self.config.port)
    }
}

/// Relay RTSP server.
///
/// Publishers ANNOUNCE a stream name and push media over UDP or interleaved
/// TCP; viewers DESCRIBE the same name and receive a mirrored copy. Each
/// control connection runs on its own thread (see [`crate::transport::tcp`]).
///
/// ```no_run
/// use rtsp_relay::{Server, ServerConfig};
///
/// let mut server = Server::new(ServerConfig::default())?;
/// let _events = server.subscribe(|event| println!("{event:?}"));
/// let addr = server.start()?;
/// println!("listening on {addr}");
/// # Ok::<(), rtsp_relay::RtspError>(())
/// ```
pub struct Server {
    ctx: Arc<ServerContext>,
    running: Arc<AtomicBool>,
    accept_thread: Option<JoinHandle<()>>,
}

impl Server {
    /// Validate `config` and seed the UDP port pool.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Ok(Self {
            ctx: ServerContext::new(config)?,
            running: Arc::new(AtomicBool::new(false)),
            accept_thread: None,
        })
    }

    /// Register the decision callback for one access kind.
    ///
    /// The callback returns data attached to the connection (`auth`) or
    /// media session (`media`), or a reason that becomes the failure
    /// response's reason phrase.
    pub fn access<F>(&self, kind: AccessKind, handler: F) -> Result<()>
    where
        F: Fn(&AccessRequest) -> std::result::Result<AccessData, String> + Send + Sync + 'static,
    {
        self.ctx.access.register(kind, Arc::new(handler))
    }

    pub fn access_handler(&self, kind: AccessKind, handler: Arc<dyn AccessHandler>) -> Result<()> {
        self.ctx.access.register(kind, handler)
    }

    /// Observe server events. Dropping the handle unsubscribes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.ctx.events.subscribe(listener)
    }

    /// Bind the listener and start accepting connections.
    pub fn start(&mut self) -> Result<SocketAddr> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RtspError::AlreadyRunning);
        }

        let listener = TcpListener::bind((self.ctx.config.host.as_str(), self.ctx.config.port))?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        *self.ctx.local_addr.write() = Some(addr);

        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let ctx = self.ctx.clone();
        let handle = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, ctx, running));
        match handle {
            Ok(handle) => self.accept_thread = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(e.into());
            }
        }

        tracing::info!(%addr, "RTSP server listening");
        self.ctx.events.emit(&ServerEvent::Listening { addr });
        Ok(addr)
    }

    /// Stop accepting and destroy every connection, which cascades to their
    /// media sessions and channels.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.accept_thread.take()
            && handle.join().is_err()
        {
            tracing::warn!("accept thread panicked");
        }

        let connections: Vec<Arc<Connection>> =
            self.ctx.connections.lock().values().cloned().collect();
        for connection in connections {
            connection.destroy("stop");
        }
        tracing::info!("server stopping");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bound address, once started.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.ctx.local_addr.read()
    }

    /// Stream names that currently have a publisher.
    pub fn publishers(&self) -> Vec<String> {
        self.ctx.registry.publishers()
    }

    /// Registered media sessions, publishers and views.
    pub fn media_count(&self) -> usize {
        self.ctx.registry.media_count()
    }

    pub fn connection_count(&self) -> usize {
        self.ctx.connections.lock().len()
    }

    /// UDP ports not currently held by a publisher channel.
    pub fn free_ports(&self) -> usize {
        self.ctx.ports.available()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.ctx.config
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if self.is_running() || !self.ctx.connections.lock().is_empty() {
            self.stop();
        }
    }
}
