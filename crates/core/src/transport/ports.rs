use std::collections::{HashSet, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Result, RtspError};

/// Pool of UDP ports available to publish-side transport channels.
///
/// Seeded once from the configured inclusive range. [`lock`](Self::lock)
/// hands out the oldest free port; [`unlock`](Self::unlock) returns a port
/// to the back of the queue. A port is never present twice, so a second
/// unlock of the same port is a no-op.
///
/// Cloning yields another handle to the same pool. All membership changes
/// go through a single mutex.
#[derive(Clone)]
pub struct PortPool {
    inner: Arc<Mutex<PoolInner>>,
}

struct PoolInner {
    free: VecDeque<u16>,
    members: HashSet<u16>,
}

impl PortPool {
    /// Create a pool holding every port in `range`.
    ///
    /// Fails with [`RtspError::InvalidPortRange`] when the range starts at
    /// zero or does not contain at least two ports.
    pub fn new(range: RangeInclusive<u16>) -> Result<Self> {
        let (start, end) = (*range.start(), *range.end());
        if start == 0 || end <= start {
            return Err(RtspError::InvalidPortRange { start, end });
        }

        let pool = Self::empty();
        for port in range {
            pool.unlock(port);
        }
        tracing::debug!(start, end, "port pool seeded");
        Ok(pool)
    }

    fn empty() -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                free: VecDeque::new(),
                members: HashSet::new(),
            })),
        }
    }

    /// Remove and return a free port.
    pub fn lock(&self) -> Result<u16> {
        let mut inner = self.inner.lock();
        let port = inner.free.pop_front().ok_or(RtspError::PortPoolExhausted)?;
        inner.members.remove(&port);
        tracing::trace!(port, remaining = inner.free.len(), "port locked");
        Ok(port)
    }

    /// Remove and return the oldest free port `p` whose successor `p + 1` is
    /// also free, holding both: the RTP/RTCP pair advertised to publishers.
    pub fn lock_pair(&self) -> Result<u16> {
        let mut inner = self.inner.lock();
        let index = inner
            .free
            .iter()
            .position(|&port| port < u16::MAX && inner.members.contains(&(port + 1)))
            .ok_or(RtspError::PortPoolExhausted)?;
        let port = inner.free.remove(index).ok_or(RtspError::PortPoolExhausted)?;
        inner.free.retain(|&free| free != port + 1);
        inner.members.remove(&port);
        inner.members.remove(&(port + 1));
        tracing::trace!(port, remaining = inner.free.len(), "port pair locked");
        Ok(port)
    }

    /// Return `port` to the pool. Returns `false` when the port was already
    /// free (double unlock) or is zero.
    pub fn unlock(&self, port: u16) -> bool {
        if port == 0 {
            return false;
        }
        let mut inner = self.inner.lock();
        if !inner.members.insert(port) {
            return false;
        }
        inner.free.push_back(port);
        true
    }

    /// Number of ports currently free.
    pub fn available(&self) -> usize {
        self.inner.lock().free.len()
    }

    pub fn contains(&self, port: u16) -> bool {
        self.inner.lock().members.contains(&port)
    }
}
