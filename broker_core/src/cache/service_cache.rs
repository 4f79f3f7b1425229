use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::entry::{Access, CacheEntry, ManagedResource};
use crate::config::settings::DEFAULT_IDLE_TTL_MS;
use crate::errors::{BrokerError, Result};
use crate::selector::Fingerprint;
use crate::service::DatabaseService;

type Built = std::result::Result<Arc<CacheEntry>, BrokerError>;

/// Rounds one call spends on entries that were already gone or went stale
/// before it gives up on the key.
const MAX_STALE_ROUNDS: usize = 3;

/// One key's construction guard. Racing callers wait on the same cell and all
/// observe the leader's outcome.
type Slot = OnceCell<Built>;

struct CacheInner {
    ttl: Duration,
    /// Held only for map operations, never across an await.
    slots: Mutex<HashMap<Fingerprint, Arc<Slot>>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

/// Keyed, single-flight, idle-evicting cache of live services.
///
/// Cloning is cheap: clones share the same map.
#[derive(Clone)]
pub struct ServiceCache {
    inner: Arc<CacheInner>,
}

impl Default for ServiceCache {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_IDLE_TTL_MS))
    }
}

impl ServiceCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                ttl,
                slots: Mutex::new(HashMap::new()),
                sweeper: Mutex::new(None),
            }),
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<Fingerprint, Arc<Slot>>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Returns the cached service for `key`, building it with `factory` when
    /// there is none.
    ///
    /// At most one factory call runs per key at a time; everyone racing on
    /// that construction gets its service or its error. A failed construction
    /// leaves the key empty. An entry that is dead the moment it is built
    /// fails the builder with `TunnelDead`; other callers give up the same way
    /// after `MAX_STALE_ROUNDS` stale or closed entries.
    pub async fn get_or_create<F, Fut>(
        &self,
        key: &Fingerprint,
        factory: F,
    ) -> Result<Arc<dyn DatabaseService>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<ManagedResource>>,
    {
        let mut stale_rounds = 0;
        loop {
            self.sweep().await;

            let slot = self.slot_for(key);
            let built_here = AtomicBool::new(false);
            let built = slot
                .get_or_init(|| async {
                    built_here.store(true, Ordering::Relaxed);
                    debug!("Constructing service for {}", key.short());
                    factory()
                        .await
                        .map(|resource| Arc::new(CacheEntry::new(key.clone(), resource, self.ttl())))
                })
                .await
                .clone();

            let entry = match built {
                Ok(entry) => entry,
                Err(e) => {
                    self.forget(key, &slot);
                    warn!("Service construction for {} failed: {}", key.short(), e);
                    return Err(e);
                }
            };

            if !self.is_current(key, &slot) {
                // closed while it was being built
                if entry.mark_closed() {
                    entry.release().await;
                }
                continue;
            }

            match entry.access(Instant::now()) {
                Access::Touched => return Ok(entry.service()),
                Access::Closed => self.forget(key, &slot),
                Access::Expired => {
                    self.forget(key, &slot);
                    entry.release().await;
                    if built_here.load(Ordering::Relaxed) {
                        // dead on arrival, rebuilding would spin
                        return Err(BrokerError::TunnelDead(key.short().to_string()));
                    }
                    info!("Service {} went stale, rebuilding", key.short());
                }
            }

            stale_rounds += 1;
            if stale_rounds >= MAX_STALE_ROUNDS {
                warn!(
                    "Service {} kept dying after {} rebuilds, giving up",
                    key.short(),
                    stale_rounds
                );
                return Err(BrokerError::TunnelDead(key.short().to_string()));
            }
        }
    }

    fn slot_for(&self, key: &Fingerprint) -> Arc<Slot> {
        self.slots()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone()
    }

    fn is_current(&self, key: &Fingerprint, slot: &Arc<Slot>) -> bool {
        self.slots()
            .get(key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Removes `slot` from the map unless it was already replaced.
    fn forget(&self, key: &Fingerprint, slot: &Arc<Slot>) {
        let mut slots = self.slots();
        if slots.get(key).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(key);
        }
    }

    fn ready_entry(slot: &Slot) -> Option<Arc<CacheEntry>> {
        match slot.get() {
            Some(Ok(entry)) => Some(entry.clone()),
            _ => None,
        }
    }

    /// Resets the idle clock of `key`. Returns `false` when there is no live
    /// entry; a stale entry found here is evicted.
    pub async fn touch(&self, key: &Fingerprint) -> bool {
        let Some(slot) = self.slots().get(key).cloned() else {
            return false;
        };
        let Some(entry) = Self::ready_entry(&slot) else {
            return false;
        };
        match entry.access(Instant::now()) {
            Access::Touched => true,
            Access::Closed => false,
            Access::Expired => {
                self.forget(key, &slot);
                entry.release().await;
                false
            }
        }
    }

    /// Evicts every entry idle past its TTL (or whose tunnel died).
    /// Returns how many were released.
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<Arc<CacheEntry>> = {
            let mut slots = self.slots();
            let mut expired = Vec::new();
            slots.retain(|_, slot| match Self::ready_entry(slot) {
                Some(entry) if entry.try_expire(now) => {
                    expired.push(entry);
                    false
                }
                _ => true,
            });
            expired
        };

        for entry in &expired {
            info!("Evicting idle service {}", entry.key().short());
            entry.release().await;
        }
        expired.len()
    }

    /// Explicitly closes `key`. Returns whether this call released something.
    pub async fn close(&self, key: &Fingerprint) -> bool {
        let removed = self.slots().remove(key);
        let Some(entry) = removed.as_deref().and_then(Self::ready_entry) else {
            return false;
        };
        if entry.mark_closed() {
            entry.release().await;
            true
        } else {
            false
        }
    }

    pub async fn close_all(&self) -> usize {
        let drained: Vec<Arc<Slot>> = self.slots().drain().map(|(_, slot)| slot).collect();
        let mut released = 0;
        for entry in drained.iter().filter_map(|slot| Self::ready_entry(slot)) {
            if entry.mark_closed() {
                entry.release().await;
                released += 1;
            }
        }
        released
    }

    /// Runs [`ServiceCache::sweep`] every `interval` until [`ServiceCache::shutdown_all`]
    /// or until the last clone of the cache is dropped.
    pub fn spawn_sweeper(&self, interval: Duration) {
        let weak: Weak<CacheInner> = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let evicted = ServiceCache { inner }.sweep().await;
                if evicted > 0 {
                    debug!("Sweeper evicted {} service(s)", evicted);
                }
            }
        });

        let previous = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the sweeper and releases every cached service.
    pub async fn shutdown_all(&self) -> usize {
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(sweeper) = sweeper {
            sweeper.abort();
        }
        let released = self.close_all().await;
        info!("Service cache shut down, released {} service(s)", released);
        released
    }

    /// Number of built, not yet closed entries.
    pub fn len(&self) -> usize {
        self.slots()
            .values()
            .filter_map(|slot| Self::ready_entry(slot))
            .filter(|entry| !entry.is_closed())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The built, not yet closed entry for `key`, without touching it.
    pub fn entry(&self, key: &Fingerprint) -> Option<Arc<CacheEntry>> {
        self.slots()
            .get(key)
            .and_then(|slot| Self::ready_entry(slot))
            .filter(|entry| !entry.is_closed())
    }

    pub fn contains(&self, key: &Fingerprint) -> bool {
        self.entry(key).is_some()
    }
}
