//! Authorization hook points.
//!
//! The relay never decides on its own whether a client may connect or
//! publish. It asks an [`AccessHandler`] registered for the request kind:
//!
//! | Kind | Asked when | Argument |
//! |------|------------|----------|
//! | [`AccessKind::Auth`] | first OPTIONS on a connection | the connection |
//! | [`AccessKind::Media`] | ANNOUNCE / DESCRIBE creates a media session | the media session and its connection |
//!
//! A handler grants by returning [`AccessData`] (kept on the connection or
//! media session) and denies by returning a reason string. Kinds with no
//! handler fall back to the static list in
//! [`ServerConfig::access`](crate::ServerConfig::access): listed kinds are
//! denied, everything else is allowed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Result, RtspError};
use crate::protocol::RequestTarget;
use crate::session::MediaRole;

/// Data a handler attaches to a granted request.
pub type AccessData = HashMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessKind {
    Auth,
    Media,
}

impl AccessKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Media => "media",
        }
    }
}

impl std::fmt::Display for AccessKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a connection presented to access handlers.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub peer_addr: SocketAddr,
    pub target: RequestTarget,
}

/// Snapshot of a candidate media session presented to access handlers.
#[derive(Debug, Clone)]
pub struct MediaInfo {
    pub id: String,
    pub name: String,
    pub role: MediaRole,
}

#[derive(Debug, Clone)]
pub enum AccessRequest {
    Auth {
        connection: ConnectionInfo,
    },
    Media {
        media: MediaInfo,
        connection: ConnectionInfo,
    },
}

impl AccessRequest {
    pub fn kind(&self) -> AccessKind {
        match self {
            Self::Auth { .. } => AccessKind::Auth,
            Self::Media { .. } => AccessKind::Media,
        }
    }

    pub fn connection(&self) -> &ConnectionInfo {
        match self {
            Self::Auth { connection } | Self::Media { connection, .. } => connection,
        }
    }
}

/// Decides one kind of access request.
///
/// Runs on the requesting connection's thread; nothing else happens on that
/// connection until it returns.
pub trait AccessHandler: Send + Sync {
    fn check(&self, request: &AccessRequest) -> std::result::Result<AccessData, String>;
}

impl<F> AccessHandler for F
where
    F: Fn(&AccessRequest) -> std::result::Result<AccessData, String> + Send + Sync,
{
    fn check(&self, request: &AccessRequest) -> std::result::Result<AccessData, String> {
        self(request)
    }
}

/// Registered handlers plus the static fallback list.
pub struct AccessControl {
    handlers: RwLock<HashMap<AccessKind, Arc<dyn AccessHandler>>>,
    required: Vec<String>,
}

impl AccessControl {
    /// `required` names the kinds denied when no handler is registered.
    pub fn new(required: Vec<String>) -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            required,
        }
    }

    pub fn register(&self, kind: AccessKind, handler: Arc<dyn AccessHandler>) -> Result<()> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&kind) {
            return Err(RtspError::AccessAlreadyRegistered(kind.to_string()));
        }
        handlers.insert(kind, handler);
        tracing::debug!(%kind, "access handler registered");
        Ok(())
    }

    /// Decide `request`. The handler is called without any lock held.
    pub fn check(&self, request: &AccessRequest) -> Result<AccessData> {
        let kind = request.kind();
        let handler = self.handlers.read().get(&kind).cloned();

        match handler {
            Some(handler) => handler.check(request).map_err(|reason| {
                let reason = if reason.is_empty() {
                    "PermissionDenied".to_string()
                } else {
                    reason
                };
                tracing::debug!(%kind, connection_id = %request.connection().id, %reason, "access denied");
                RtspError::PermissionDenied(reason)
            }),
            None if self.required.iter().any(|name| name == kind.as_str()) => {
                tracing::debug!(%kind, "access denied by static list");
                Err(RtspError::PermissionDenied("PermissionDenied".to_string()))
            }
            None => Ok(AccessData::new()),
        }
    }
}
