//! Connection cache for remote controllers
//!
//! Keeps at most one physical connection per key. Callers receive
//! [`CachedConn`] handles that count references on the shared connection;
//! closing a handle only releases the reference, while evicting it tears the
//! connection down for everyone and removes it from the cache.
//!
//! Concurrent [`ConnectionCache::open_api`] calls for a key that is not yet
//! connected share one dial. A failed dial is reported to every waiter and is
//! not remembered, so the next open dials again.

use crate::error::ConnectError;
use async_trait::async_trait;
use corral_core_interface::ControllerApi;
use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// A physical connection the cache can ping and tear down.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    async fn ping(&self) -> Result<(), ConnectError>;

    async fn close(&self) -> Result<(), ConnectError>;
}

#[async_trait]
impl Connection for Arc<dyn ControllerApi> {
    async fn ping(&self) -> Result<(), ConnectError> {
        ControllerApi::ping(self.as_ref()).await.map_err(Into::into)
    }

    async fn close(&self) -> Result<(), ConnectError> {
        ControllerApi::close(self.as_ref()).await.map_err(Into::into)
    }
}

pub type ControllerCache = ConnectionCache<Arc<dyn ControllerApi>>;
pub type ControllerConn = CachedConn<Arc<dyn ControllerApi>>;

struct Entry<C> {
    key: String,
    conn: C,
    refs: AtomicUsize,
    evicted: AtomicBool,
}

impl<C: Connection> Entry<C> {
    fn new(key: &str, conn: C) -> Self {
        Self {
            key: key.to_string(),
            conn,
            refs: AtomicUsize::new(0),
            evicted: AtomicBool::new(false),
        }
    }

    /// Closes the physical connection once, however many handles evict it.
    async fn teardown(&self) {
        if self.evicted.swap(true, Ordering::SeqCst) {
            return;
        }
        match self.conn.close().await {
            Ok(()) => debug!(key = %self.key, "Closed controller connection"),
            Err(e) => warn!(key = %self.key, error = %e, "Error closing controller connection"),
        }
    }
}

type DialOutcome<C> = Option<Result<Arc<Entry<C>>, ConnectError>>;

enum Slot<C> {
    Dialing {
        episode: u64,
        outcome: watch::Receiver<DialOutcome<C>>,
    },
    Open(Arc<Entry<C>>),
}

/// What an opener must do after inspecting the cache.
enum Claim<C> {
    Ready(Arc<Entry<C>>),
    Wait(watch::Receiver<DialOutcome<C>>),
    Dial(u64, watch::Sender<DialOutcome<C>>),
}

struct CacheInner<C> {
    slots: Mutex<HashMap<String, Slot<C>>>,
    episodes: AtomicU64,
    closed: AtomicBool,
}

impl<C> CacheInner<C> {
    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot<C>>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes `entry` if it is still the cached connection for its key.
    fn detach(&self, entry: &Arc<Entry<C>>) -> bool {
        let mut slots = self.slots();
        match slots.get(&entry.key) {
            Some(Slot::Open(current)) if Arc::ptr_eq(current, entry) => {
                slots.remove(&entry.key);
                true
            }
            _ => false,
        }
    }

    /// Removes the dialing slot for `key` if it belongs to `episode`.
    fn abandon(&self, key: &str, episode: u64) {
        let mut slots = self.slots();
        if matches!(slots.get(key), Some(Slot::Dialing { episode: e, .. }) if *e == episode) {
            slots.remove(key);
        }
    }
}

/// Settles a dial episode. If the dialing future is dropped before the
/// episode settles, waiters are told the dial was abandoned.
struct DialGuard<'a, C> {
    inner: &'a CacheInner<C>,
    key: &'a str,
    episode: u64,
    sender: Option<watch::Sender<DialOutcome<C>>>,
}

impl<C> DialGuard<'_, C> {
    fn settle(&mut self, outcome: Result<Arc<Entry<C>>, ConnectError>) {
        if let Some(sender) = self.sender.take() {
            sender.send_replace(Some(outcome));
        }
    }
}

impl<C> Drop for DialGuard<'_, C> {
    fn drop(&mut self) {
        if let Some(sender) = self.sender.take() {
            self.inner.abandon(self.key, self.episode);
            sender.send_replace(Some(Err(ConnectError::DialAbandoned(self.key.to_string()))));
        }
    }
}

/// Shares one connection per key among any number of callers.
pub struct ConnectionCache<C> {
    inner: Arc<CacheInner<C>>,
}

impl<C> Clone for ConnectionCache<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C: Connection> Default for ConnectionCache<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> ConnectionCache<C> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(CacheInner {
                slots: Mutex::new(HashMap::new()),
                episodes: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns a handle to the connection cached under `key`, calling `dial`
    /// only if there is no connection and no dial already in flight.
    pub async fn open_api<F, Fut>(&self, key: &str, dial: F) -> Result<CachedConn<C>, ConnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, ConnectError>>,
    {
        let claim = {
            let mut slots = self.inner.slots();
            if self.inner.closed.load(Ordering::SeqCst) {
                return Err(ConnectError::CacheClosed);
            }
            match slots.get(key) {
                Some(Slot::Open(entry)) => Claim::Ready(Arc::clone(entry)),
                Some(Slot::Dialing { outcome, .. }) => Claim::Wait(outcome.clone()),
                None => {
                    let episode = self.inner.episodes.fetch_add(1, Ordering::Relaxed);
                    let (sender, outcome) = watch::channel(None);
                    slots.insert(key.to_string(), Slot::Dialing { episode, outcome });
                    Claim::Dial(episode, sender)
                }
            }
        };

        match claim {
            Claim::Ready(entry) => {
                debug!(key, "Reusing cached connection");
                Ok(self.issue(entry))
            }
            Claim::Wait(outcome) => self.await_dial(key, outcome).await,
            Claim::Dial(episode, sender) => self.dial(key, episode, sender, dial).await,
        }
    }

    async fn dial<F, Fut>(
        &self,
        key: &str,
        episode: u64,
        sender: watch::Sender<DialOutcome<C>>,
        dial: F,
    ) -> Result<CachedConn<C>, ConnectError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<C, ConnectError>>,
    {
        let mut guard = DialGuard {
            inner: &self.inner,
            key,
            episode,
            sender: Some(sender),
        };

        info!(key, "Dialing controller");
        let outcome = match dial().await {
            Ok(conn) => {
                let entry = Arc::new(Entry::new(key, conn));
                let accepted = {
                    let mut slots = self.inner.slots();
                    if self.inner.closed.load(Ordering::SeqCst) {
                        slots.remove(key);
                        false
                    } else {
                        slots.insert(key.to_string(), Slot::Open(Arc::clone(&entry)));
                        true
                    }
                };
                if accepted {
                    info!(key, "Connected to controller");
                    Ok(entry)
                } else {
                    entry.teardown().await;
                    Err(ConnectError::CacheClosed)
                }
            }
            Err(e) => {
                warn!(key, error = %e, "Dial failed");
                self.inner.abandon(key, episode);
                Err(e)
            }
        };

        guard.settle(outcome.clone());
        outcome.map(|entry| self.issue(entry))
    }

    async fn await_dial(
        &self,
        key: &str,
        mut outcome: watch::Receiver<DialOutcome<C>>,
    ) -> Result<CachedConn<C>, ConnectError> {
        debug!(key, "Waiting for in-flight dial");
        let settled = outcome
            .wait_for(Option::is_some)
            .await
            .map(|o| (*o).clone())
            .map_err(|_| ConnectError::DialAbandoned(key.to_string()))?;

        match settled {
            Some(Ok(entry)) => Ok(self.issue(entry)),
            Some(Err(e)) => Err(e),
            None => Err(ConnectError::DialAbandoned(key.to_string())),
        }
    }

    fn issue(&self, entry: Arc<Entry<C>>) -> CachedConn<C> {
        entry.refs.fetch_add(1, Ordering::SeqCst);
        CachedConn {
            entry,
            cache: Arc::downgrade(&self.inner),
            released: AtomicBool::new(false),
        }
    }

    /// Closes every cached connection and empties the cache. Dials in flight
    /// are left to complete.
    pub async fn evict_all(&self) -> usize {
        let evicted: Vec<Arc<Entry<C>>> = {
            let mut slots = self.inner.slots();
            let mut evicted = Vec::new();
            for (key, slot) in std::mem::take(&mut *slots) {
                match slot {
                    Slot::Open(entry) => evicted.push(entry),
                    dialing @ Slot::Dialing { .. } => {
                        slots.insert(key, dialing);
                    }
                }
            }
            evicted
        };

        for entry in &evicted {
            entry.teardown().await;
        }
        info!(count = evicted.len(), "Evicted all cached connections");
        evicted.len()
    }

    /// Evicts everything and refuses further opens.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.evict_all().await;
    }

    /// Number of open cached connections.
    pub fn len(&self) -> usize {
        self.inner
            .slots()
            .values()
            .filter(|s| matches!(s, Slot::Open(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding handle count for the connection cached under `key`.
    pub fn ref_count(&self, key: &str) -> Option<usize> {
        match self.inner.slots().get(key) {
            Some(Slot::Open(entry)) => Some(entry.refs.load(Ordering::SeqCst)),
            _ => None,
        }
    }
}

/// A counted reference to a cached connection.
///
/// Dereferences to the connection. Dropping the handle closes it.
pub struct CachedConn<C: Connection> {
    entry: Arc<Entry<C>>,
    cache: Weak<CacheInner<C>>,
    released: AtomicBool,
}

impl<C: Connection> CachedConn<C> {
    pub fn key(&self) -> &str {
        &self.entry.key
    }

    pub fn is_evicted(&self) -> bool {
        self.entry.evicted.load(Ordering::SeqCst)
    }

    /// Pings the connection. Fails without I/O once the connection is evicted.
    pub async fn ping(&self) -> Result<(), ConnectError> {
        if self.is_evicted() {
            return Err(ConnectError::Evicted(self.entry.key.clone()));
        }
        self.entry.conn.ping().await
    }

    /// Releases this handle's reference. Idempotent; never tears down the
    /// shared connection.
    pub fn close(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            self.entry.refs.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Removes the connection from the cache and closes it for every holder.
    pub async fn evict(&self) {
        if let Some(cache) = self.cache.upgrade() {
            if cache.detach(&self.entry) {
                info!(key = %self.entry.key, "Evicted controller connection");
            }
        }
        self.entry.teardown().await;
        self.close();
    }
}

impl<C: Connection> Deref for CachedConn<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.entry.conn
    }
}

impl<C: Connection> Drop for CachedConn<C> {
    fn drop(&mut self) {
        self.close();
    }
}
