use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::access::{AccessControl, AccessData, AccessRequest};
use crate::error::{Result, RtspError};
use crate::event::{EventHub, ServerEvent};
use crate::session::{Client, MediaRole, MediaSession};

/// Server-wide map of live media sessions.
///
/// Holds one publisher per stream name and every registered session by id.
/// All membership changes go through one mutex; the `media` access check
/// runs outside it, so registration validates twice: once before asking
/// the access handler and once right before inserting.
pub(crate) struct SessionRegistry {
    inner: Mutex<RegistryInner>,
    events: EventHub<ServerEvent>,
}

#[derive(Default)]
struct RegistryInner {
    publishers: HashMap<String, Arc<MediaSession>>,
    media: HashMap<String, Arc<MediaSession>>,
}

impl SessionRegistry {
    pub(crate) fn new(events: EventHub<ServerEvent>) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            events,
        }
    }

    /// Register `media` for `client`.
    ///
    /// A view is bound to the current publisher of its name before the
    /// access check. On success the access data is stored on the session
    /// and returned.
    pub(crate) fn register(
        &self,
        media: &Arc<MediaSession>,
        client: &Arc<dyn Client>,
        access: &AccessControl,
    ) -> Result<AccessData> {
        let publisher = {
            let inner = self.inner.lock();
            check(&inner, media, client)?;
            inner.publishers.get(media.name()).cloned()
        };
        if media.role() == MediaRole::View
            && let Some(publisher) = publisher
        {
            media.set_target(publisher);
        }

        let data = access.check(&AccessRequest::Media {
            media: media.info(),
            connection: client.info(),
        })?;

        {
            let mut inner = self.inner.lock();
            check(&inner, media, client)?;
            inner.media.insert(media.id().to_string(), media.clone());
            if media.role() == MediaRole::Publish {
                inner
                    .publishers
                    .insert(media.name().to_string(), media.clone());
            }
        }
        media.set_access_data(data.clone());

        tracing::info!(
            media_id = %media.id(),
            name = %media.name(),
            role = %media.role(),
            connection_id = %client.id(),
            "media registered"
        );
        self.events.emit(&ServerEvent::MediaCreated {
            media_id: media.id().to_string(),
            name: media.name().to_string(),
            role: media.role(),
            connection_id: client.id().to_string(),
        });
        if media.role() == MediaRole::Publish {
            self.events.emit(&ServerEvent::MediaPublished {
                media_id: media.id().to_string(),
                name: media.name().to_string(),
            });
        }
        Ok(data)
    }

    /// Remove `media`. A publisher entry is removed only if it is this very
    /// session. Returns whether anything was removed.
    pub(crate) fn unregister(&self, media: &MediaSession) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.media.remove(media.id()).is_some();
        let is_current = inner
            .publishers
            .get(media.name())
            .is_some_and(|publisher| std::ptr::eq(Arc::as_ptr(publisher), media));
        if is_current {
            inner.publishers.remove(media.name());
        }
        removed || is_current
    }

    #[cfg(test)]
    pub(crate) fn publisher(&self, name: &str) -> Option<Arc<MediaSession>> {
        self.inner.lock().publishers.get(name).cloned()
    }

    /// Names with a registered publisher, sorted.
    pub(crate) fn publishers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.lock().publishers.keys().cloned().collect();
        names.sort();
        names
    }

    pub(crate) fn media_count(&self) -> usize {
        self.inner.lock().media.len()
    }
}

fn check(inner: &RegistryInner, media: &MediaSession, client: &Arc<dyn Client>) -> Result<()> {
    if media.is_destroyed() {
        return Err(RtspError::MediaDestroyed(
            media.destroy_reason().unwrap_or_default(),
        ));
    }
    if inner.media.contains_key(media.id()) {
        tracing::warn!(media_id = %media.id(), "repeated media id");
        return Err(RtspError::InvalidMedia);
    }
    if media.client().is_none() || client.is_destroyed() {
        return Err(RtspError::InvalidClient);
    }

    let publisher = inner.publishers.get(media.name());
    match media.role() {
        MediaRole::Publish if publisher.is_some() => {
            Err(RtspError::MediaAlready(media.name().to_string()))
        }
        MediaRole::View if !publisher.is_some_and(|p| !p.is_destroyed()) => {
            Err(RtspError::MediaNotFound(media.name().to_string()))
        }
        _ => Ok(()),
    }
}
