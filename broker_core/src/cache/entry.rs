use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::debug;
use tokio::time::Instant;

use crate::selector::Fingerprint;
use crate::service::DatabaseService;
use crate::transport::SshTransport;
use crate::tunnel::Tunnel;

/// The network hop a service was built over.
pub enum Hop {
    Direct,
    /// SSH session whose channels the service dials through.
    Channel(Arc<dyn SshTransport>),
    /// Local forwarding tunnel the service connects to.
    Tunnel(Tunnel),
}

/// A service together with the hop it depends on, released as one unit:
/// service first, then the hop (reverse construction order).
pub struct ManagedResource {
    service: Arc<dyn DatabaseService>,
    hop: Hop,
}

impl ManagedResource {
    pub fn direct(service: Arc<dyn DatabaseService>) -> Self {
        Self {
            service,
            hop: Hop::Direct,
        }
    }

    pub fn over_channel(service: Arc<dyn DatabaseService>, transport: Arc<dyn SshTransport>) -> Self {
        Self {
            service,
            hop: Hop::Channel(transport),
        }
    }

    pub fn tunnelled(service: Arc<dyn DatabaseService>, tunnel: Tunnel) -> Self {
        Self {
            service,
            hop: Hop::Tunnel(tunnel),
        }
    }

    pub fn service(&self) -> Arc<dyn DatabaseService> {
        self.service.clone()
    }

    pub fn hop(&self) -> &Hop {
        &self.hop
    }

    pub fn is_alive(&self) -> bool {
        match &self.hop {
            Hop::Direct => true,
            Hop::Channel(transport) => transport.is_alive(),
            Hop::Tunnel(tunnel) => tunnel.is_alive(),
        }
    }

    pub async fn release(&self) {
        self.service.close().await;
        match &self.hop {
            Hop::Direct => {}
            Hop::Channel(transport) => transport.close(),
            Hop::Tunnel(tunnel) => tunnel.close(),
        }
    }
}

struct EntryState {
    last_use: Instant,
    closed: bool,
}

/// What happened when a caller tried to use an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Access {
    Touched,
    /// Someone else already claimed the teardown.
    Closed,
    /// Idle past its TTL or its tunnel died; the caller now owns the teardown.
    Expired,
}

pub struct CacheEntry {
    key: Fingerprint,
    resource: ManagedResource,
    created_at: Instant,
    ttl: Duration,
    state: Mutex<EntryState>,
}

impl CacheEntry {
    pub(crate) fn new(key: Fingerprint, resource: ManagedResource, ttl: Duration) -> Self {
        let now = Instant::now();
        Self {
            key,
            resource,
            created_at: now,
            ttl,
            state: Mutex::new(EntryState {
                last_use: now,
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, EntryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stale(&self, state: &EntryState, now: Instant) -> bool {
        now.saturating_duration_since(state.last_use) >= self.ttl || !self.resource.is_alive()
    }

    /// Touches the entry unless it is closed or stale. Check and touch happen
    /// under one lock so a sweep can never tear down a just-touched entry.
    pub(crate) fn access(&self, now: Instant) -> Access {
        let mut state = self.lock();
        if state.closed {
            return Access::Closed;
        }
        if self.is_stale(&state, now) {
            state.closed = true;
            return Access::Expired;
        }
        state.last_use = now;
        Access::Touched
    }

    /// Claims the teardown if the entry is stale.
    pub(crate) fn try_expire(&self, now: Instant) -> bool {
        let mut state = self.lock();
        if state.closed || !self.is_stale(&state, now) {
            return false;
        }
        state.closed = true;
        true
    }

    /// Claims the teardown unconditionally. Only the first caller gets `true`.
    pub(crate) fn mark_closed(&self) -> bool {
        let mut state = self.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        true
    }

    /// Must only be called by whoever claimed the teardown.
    pub(crate) async fn release(&self) {
        debug!(
            "Releasing service {} (age {:?})",
            self.key.short(),
            self.created_at.elapsed()
        );
        self.resource.release().await;
    }

    pub fn key(&self) -> &Fingerprint {
        &self.key
    }

    pub fn service(&self) -> Arc<dyn DatabaseService> {
        self.resource.service()
    }

    pub fn resource(&self) -> &ManagedResource {
        &self.resource
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_use(&self) -> Instant {
        self.lock().last_use
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}
