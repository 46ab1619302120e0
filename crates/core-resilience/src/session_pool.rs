//! Round-robin pool of store sessions that replaces dead ones on acquisition.

use super::error::PoolError;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// A session that can be pooled.
///
/// Implementations connect lazily: `renew` must not perform I/O, it only
/// produces an unconnected session with the same settings.
pub trait PooledSession: Send + Sync + 'static {
    /// Creates an independent session with the same settings.
    fn renew(&self) -> Self
    where
        Self: Sized;

    /// Reports whether an operation on this session hit a broken connection.
    fn is_dead(&self) -> bool;

    /// Releases the session's resources. Called when the pool closes.
    fn close(&self) {}
}

struct PoolState<S> {
    slots: Vec<Arc<S>>,
    next: usize,
    closed: bool,
}

struct PoolInner<S> {
    template: S,
    state: Mutex<PoolState<S>>,
    renewals: AtomicU64,
}

impl<S> PoolInner<S> {
    fn state(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Fixed-size pool of sessions handed out round-robin.
///
/// Cloning the pool is cheap; clones share the same slots.
pub struct SessionPool<S> {
    inner: Arc<PoolInner<S>>,
}

impl<S> Clone for SessionPool<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: PooledSession> SessionPool<S> {
    /// Creates a pool of `size` slots, each renewed from `template`.
    pub fn new(template: S, size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::EmptyPool);
        }

        let slots = (0..size).map(|_| Arc::new(template.renew())).collect();
        info!(size, "Created session pool");

        Ok(Self {
            inner: Arc::new(PoolInner {
                template,
                state: Mutex::new(PoolState {
                    slots,
                    next: 0,
                    closed: false,
                }),
                renewals: AtomicU64::new(0),
            }),
        })
    }

    /// Leases the next slot's session, renewing it first if it has died.
    pub fn session(&self) -> Result<Lease<S>, PoolError> {
        let mut state = self.inner.state();
        if state.closed {
            return Err(PoolError::Closed);
        }

        let slot = state.next;
        state.next = (slot + 1) % state.slots.len();

        if state.slots[slot].is_dead() {
            debug!(slot, "Replacing dead session");
            state.slots[slot] = Arc::new(self.inner.template.renew());
            self.inner.renewals.fetch_add(1, Ordering::Relaxed);
        }

        Ok(Lease {
            session: Arc::clone(&state.slots[slot]),
            slot,
        })
    }

    /// Closes every backing session. Later acquisitions fail with [`PoolError::Closed`].
    pub fn close(&self) {
        let mut state = self.inner.state();
        if state.closed {
            return;
        }
        state.closed = true;
        for session in &state.slots {
            session.close();
        }
        self.inner.template.close();
        info!("Closed session pool");
    }

    pub fn size(&self) -> usize {
        self.inner.state().slots.len()
    }

    /// Number of dead sessions replaced since the pool was created.
    pub fn renewals(&self) -> u64 {
        self.inner.renewals.load(Ordering::Relaxed)
    }
}

/// A leased session. Dereferences to the slot's shared session.
pub struct Lease<S> {
    session: Arc<S>,
    slot: usize,
}

impl<S> Lease<S> {
    /// Index of the pool slot this lease came from.
    pub fn slot(&self) -> usize {
        self.slot
    }
}

impl<S> Clone for Lease<S> {
    fn clone(&self) -> Self {
        Self {
            session: Arc::clone(&self.session),
            slot: self.slot,
        }
    }
}

impl<S> Deref for Lease<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::OnceLock;

    /// Session bound lazily to the network generation current at first use.
    struct TestSession {
        network: Arc<AtomicU64>,
        bound: OnceLock<u64>,
        dead: AtomicBool,
        closed: Arc<AtomicU64>,
    }

    impl TestSession {
        fn template(network: Arc<AtomicU64>, closed: Arc<AtomicU64>) -> Self {
            Self {
                network,
                bound: OnceLock::new(),
                dead: AtomicBool::new(false),
                closed,
            }
        }

        fn query(&self) -> Result<(), &'static str> {
            let generation = *self.bound.get_or_init(|| self.network.load(Ordering::SeqCst));
            if self.dead.load(Ordering::SeqCst) || generation != self.network.load(Ordering::SeqCst)
            {
                self.dead.store(true, Ordering::SeqCst);
                return Err("EOF");
            }
            Ok(())
        }
    }

    impl PooledSession for TestSession {
        fn renew(&self) -> Self {
            Self::template(Arc::clone(&self.network), Arc::clone(&self.closed))
        }

        fn is_dead(&self) -> bool {
            self.dead.load(Ordering::SeqCst)
        }

        fn close(&self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn pool(size: usize) -> (SessionPool<TestSession>, Arc<AtomicU64>) {
        let network = Arc::new(AtomicU64::new(0));
        let template = TestSession::template(Arc::clone(&network), Arc::new(AtomicU64::new(0)));
        (SessionPool::new(template, size).unwrap(), network)
    }

    #[test]
    fn test_round_robin_slots() {
        let (pool, _) = pool(3);
        let slots: Vec<usize> = (0..5).map(|_| pool.session().unwrap().slot()).collect();
        assert_eq!(slots, vec![0, 1, 2, 0, 1]);
    }

    #[test]
    fn test_zero_size_rejected() {
        let network = Arc::new(AtomicU64::new(0));
        let template = TestSession::template(network, Arc::new(AtomicU64::new(0)));
        assert_eq!(SessionPool::new(template, 0).err(), Some(PoolError::EmptyPool));
    }

    #[test]
    fn test_dead_slot_renewed_on_next_acquisition() {
        let (pool, network) = pool(2);

        let first = pool.session().unwrap();
        assert_eq!(first.slot(), 0);
        first.query().unwrap();

        // Drop every established connection.
        network.fetch_add(1, Ordering::SeqCst);
        assert_eq!(first.query(), Err("EOF"));
        assert!(first.is_dead());

        // Slot 1 never connected, so it binds to the new network and works.
        let second = pool.session().unwrap();
        assert_eq!(second.slot(), 1);
        second.query().unwrap();

        // Slot 0 comes round again and is replaced.
        let third = pool.session().unwrap();
        assert_eq!(third.slot(), 0);
        third.query().unwrap();
        assert_eq!(pool.renewals(), 1);

        // The lease taken before the break keeps failing.
        assert_eq!(first.query(), Err("EOF"));
    }

    #[test]
    fn test_leases_share_slot_session() {
        let (pool, network) = pool(1);
        let a = pool.session().unwrap();
        let b = a.clone();
        a.query().unwrap();
        network.fetch_add(1, Ordering::SeqCst);
        assert!(b.query().is_err());
        assert!(a.is_dead());
    }

    #[test]
    fn test_close_rejects_new_leases() {
        let network = Arc::new(AtomicU64::new(0));
        let closed = Arc::new(AtomicU64::new(0));
        let template = TestSession::template(network, Arc::clone(&closed));
        let pool = SessionPool::new(template, 3).unwrap();

        pool.close();
        pool.close();

        assert_eq!(pool.session().err(), Some(PoolError::Closed));
        // Three slots plus the template, once each.
        assert_eq!(closed.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_concurrent_acquisition() {
        let (pool, _) = pool(4);
        let mut handles = Vec::new();
        for _ in 0..16 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                let lease = pool.session().unwrap();
                lease.query().map(|_| lease.slot())
            }));
        }

        let mut counts = [0usize; 4];
        for handle in handles {
            counts[handle.await.unwrap().unwrap()] += 1;
        }
        assert_eq!(counts, [4, 4, 4, 4]);
    }
}
