//! In-memory backend
//!
//! Documents live in per-collection ordered maps shared by every session of
//! a [`MemoryStore`]. The store keeps a network generation counter; a session
//! binds to the current generation when it first connects, and
//! [`MemoryStore::break_connections`] bumps the counter so every connected
//! session fails on its next operation.

use crate::{Collection, Document, Result, StoreError, StoreSession};
use async_trait::async_trait;
use corral_core_resilience::PooledSession;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use tracing::debug;

type Collections = HashMap<Collection, BTreeMap<String, Document>>;

#[derive(Default)]
struct MemoryInner {
    collections: RwLock<Collections>,
    network: AtomicU64,
    connects: AtomicU64,
    failing_writes: RwLock<Option<Collection>>,
}

/// Process-local document store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an unconnected session.
    pub fn session(&self) -> MemorySession {
        MemorySession {
            store: self.clone(),
            bound: OnceLock::new(),
            dead: AtomicBool::new(false),
        }
    }

    /// Drops every established connection. Sessions that have not yet
    /// connected are unaffected.
    pub fn break_connections(&self) {
        let generation = self.inner.network.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(generation, "Broke all memory store connections");
    }

    /// Makes inserts and updates on `collection` fail with a backend error
    /// until cleared with `None`.
    pub fn fail_writes(&self, collection: Option<Collection>) {
        *self
            .inner
            .failing_writes
            .write()
            .unwrap_or_else(PoisonError::into_inner) = collection;
    }

    fn check_writable(&self, collection: Collection) -> Result<()> {
        let failing = *self
            .inner
            .failing_writes
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing == Some(collection) {
            return Err(StoreError::Backend(format!(
                "injected write failure on {collection}"
            )));
        }
        Ok(())
    }

    /// Number of connections established so far.
    pub fn connects(&self) -> u64 {
        self.inner.connects.load(Ordering::SeqCst)
    }

    fn read<T>(&self, f: impl FnOnce(&Collections) -> T) -> T {
        let guard = self
            .inner
            .collections
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut Collections) -> T) -> T {
        let mut guard = self
            .inner
            .collections
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

/// A session on a [`MemoryStore`].
pub struct MemorySession {
    store: MemoryStore,
    bound: OnceLock<u64>,
    dead: AtomicBool,
}

impl MemorySession {
    fn connection(&self) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(StoreError::Disconnected("session is dead".into()));
        }
        let inner = &self.store.inner;
        let generation = *self.bound.get_or_init(|| {
            inner.connects.fetch_add(1, Ordering::SeqCst);
            inner.network.load(Ordering::SeqCst)
        });
        if generation != inner.network.load(Ordering::SeqCst) {
            self.dead.store(true, Ordering::SeqCst);
            return Err(StoreError::Disconnected("EOF".into()));
        }
        Ok(())
    }
}

impl PooledSession for MemorySession {
    fn renew(&self) -> Self {
        self.store.session()
    }

    fn is_dead(&self) -> bool {
        self.dead.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn get(&self, collection: Collection, id: &str) -> Result<Document> {
        self.connection()?;
        self.store
            .read(|c| c.get(&collection).and_then(|docs| docs.get(id)).cloned())
            .ok_or_else(|| StoreError::NotFound {
                collection: collection.as_str(),
                id: id.to_string(),
            })
    }

    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: serde_json::Value,
    ) -> Result<Document> {
        self.connection()?;
        self.store.check_writable(collection)?;
        self.store.write(|c| {
            let docs = c.entry(collection).or_default();
            if docs.contains_key(id) {
                return Err(StoreError::AlreadyExists {
                    collection: collection.as_str(),
                    id: id.to_string(),
                });
            }
            let doc = Document {
                id: id.to_string(),
                version: 1,
                body,
            };
            docs.insert(id.to_string(), doc.clone());
            Ok(doc)
        })
    }

    async fn update(
        &self,
        collection: Collection,
        id: &str,
        expected_version: u64,
        body: serde_json::Value,
    ) -> Result<Document> {
        self.connection()?;
        self.store.check_writable(collection)?;
        self.store.write(|c| {
            let existing = c
                .get_mut(&collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.as_str(),
                    id: id.to_string(),
                })?;
            if existing.version != expected_version {
                return Err(StoreError::Conflict {
                    collection: collection.as_str(),
                    id: id.to_string(),
                    expected: expected_version,
                });
            }
            existing.version += 1;
            existing.body = body;
            Ok(existing.clone())
        })
    }

    async fn remove(&self, collection: Collection, id: &str) -> Result<()> {
        self.connection()?;
        self.store.write(|c| {
            c.get_mut(&collection)
                .and_then(|docs| docs.remove(id))
                .map(|_| ())
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.as_str(),
                    id: id.to_string(),
                })
        })
    }

    async fn scan(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>> {
        self.connection()?;
        Ok(self.store.read(|c| {
            c.get(&collection)
                .map(|docs| {
                    docs.range(prefix.to_string()..)
                        .take_while(|(id, _)| id.starts_with(prefix))
                        .map(|(_, doc)| doc.clone())
                        .collect()
                })
                .unwrap_or_default()
        }))
    }

    async fn ping(&self) -> Result<()> {
        self.connection()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_break_connections_kills_connected_sessions_only() {
        let store = MemoryStore::new();
        let connected = store.session();
        let idle = store.session();
        connected.ping().await.unwrap();

        store.break_connections();

        assert!(connected.ping().await.unwrap_err().is_disconnected());
        assert!(connected.is_dead());
        idle.ping().await.unwrap();
        assert_eq!(store.connects(), 2);
    }

    #[tokio::test]
    async fn test_renewed_session_reconnects() {
        let store = MemoryStore::new();
        let session = store.session();
        session
            .insert(Collection::Models, "a", json!({"n": 1}))
            .await
            .unwrap();
        store.break_connections();
        assert!(session.get(Collection::Models, "a").await.is_err());

        let fresh = session.renew();
        let doc = fresh.get(Collection::Models, "a").await.unwrap();
        assert_eq!(doc.body, json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_scan_is_prefix_bounded() {
        let store = MemoryStore::new();
        let s = store.session();
        for id in ["c1 m1 0", "c1 m1 1", "c1 m2 0", "c2 m1 0"] {
            s.insert(Collection::Machines, id, json!({})).await.unwrap();
        }
        let ids: Vec<String> = s
            .scan(Collection::Machines, "c1 m1 ")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["c1 m1 0", "c1 m1 1"]);
    }
}
