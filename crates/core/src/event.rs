//! Observer registration used for every fan-out in the relay.
//!
//! Publishers never hold references to their viewers. Instead each
//! [`MediaSession`](crate::session::MediaSession) owns a few [`EventHub`]s
//! ("interleaved frame produced", "media payload produced", "destroyed"),
//! and every consumer keeps the [`Subscription`] handle it got back.
//! Dropping the handle unregisters the listener.
//!
//! ```text
//!   publisher UDP worker ──emit──► EventHub<MediaPayload>
//!                                     │
//!                    ┌────────────────┼────────────────┐
//!                    ▼                ▼                ▼
//!            view channel A    view channel B    view channel C
//!            (Subscription)    (Subscription)    (Subscription)
//! ```
//!
//! Listeners are invoked outside the hub's lock, so a listener may
//! unsubscribe itself or destroy the session that emitted the event.

use std::net::SocketAddr;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::session::MediaRole;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct HubInner<T> {
    next_id: u64,
    listeners: Vec<(u64, Listener<T>)>,
    closed: bool,
}

/// A list of listeners for one kind of notification.
///
/// Cloning the hub yields another handle to the same listener list.
pub struct EventHub<T> {
    inner: Arc<Mutex<HubInner<T>>>,
}

impl<T> Clone for EventHub<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: 'static> EventHub<T> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(HubInner {
                next_id: 0,
                listeners: Vec::new(),
                closed: false,
            })),
        }
    }

    /// Register a listener. The returned handle unregisters it when dropped.
    ///
    /// Subscribing to a closed hub returns an inert handle; the listener is
    /// never called.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Subscription::inert();
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.listeners.push((id, Arc::new(listener)));
        drop(inner);

        let hub: Weak<Mutex<HubInner<T>>> = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(hub) = hub.upgrade() {
                    hub.lock().listeners.retain(|(lid, _)| *lid != id);
                }
            })),
        }
    }

    /// Deliver `value` to every listener registered at the time of the call.
    /// Returns the number of listeners invoked.
    pub fn emit(&self, value: &T) -> usize {
        let listeners: Vec<Listener<T>> = {
            let inner = self.inner.lock();
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in &listeners {
            listener(value);
        }
        listeners.len()
    }

    /// Drop every listener and refuse new ones.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.listeners.clear();
    }

    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl<T: 'static> Default for EventHub<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle for a registered listener. Dropping it (or calling
/// [`cancel`](Self::cancel)) removes the listener from its hub.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    fn inert() -> Self {
        Self { cancel: None }
    }

    /// Unregister now instead of on drop.
    pub fn cancel(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Server-level notifications, delivered to
/// [`Server::subscribe`](crate::Server::subscribe) listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Listening {
        addr: SocketAddr,
    },
    Connected {
        connection_id: String,
        peer_addr: SocketAddr,
    },
    Authorized {
        connection_id: String,
    },
    MediaCreated {
        media_id: String,
        name: String,
        role: MediaRole,
        connection_id: String,
    },
    MediaPublished {
        media_id: String,
        name: String,
    },
    MediaLive {
        media_id: String,
        name: String,
        role: MediaRole,
    },
    MediaDestroyed {
        media_id: String,
        name: String,
        role: MediaRole,
        reason: String,
    },
    ConnectionClosed {
        connection_id: String,
        reason: String,
    },
    PortLocked(u16),
    PortUnlocked(u16),
}
