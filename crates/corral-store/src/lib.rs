//! Corral Store: versioned document sessions
//!
//! The fleet manager keeps its records in five collections of JSON documents.
//! Every document carries a version that increments on each write, and
//! [`StoreSession::update`] only succeeds when the caller names the version it
//! read. Two writers racing on the same document cannot both win.
//!
//! Sessions connect lazily on first use and report themselves dead once an
//! operation hits a broken connection, which is what lets
//! [`corral_core_resilience::SessionPool`] replace them.
//!
//! # Backends
//!
//! - [`MemoryStore`]: process-local, with [`MemoryStore::break_connections`]
//!   to simulate network loss
//! - `SqliteStore`: durable, one SQLite connection per session (requires the
//!   `sqlite` feature, on by default)

use async_trait::async_trait;
use corral_core_resilience::PooledSession;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod backends;
pub mod error;

pub use backends::memory::{MemorySession, MemoryStore};
#[cfg(feature = "sqlite")]
pub use backends::sqlite::{SqliteSession, SqliteStore};
pub use error::{Result, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    Controllers,
    Models,
    Credentials,
    Machines,
    Applications,
    /// Model UUID to model path.
    ModelUuids,
}

impl Collection {
    pub const ALL: [Collection; 6] = [
        Collection::Controllers,
        Collection::Models,
        Collection::Credentials,
        Collection::Machines,
        Collection::Applications,
        Collection::ModelUuids,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Controllers => "controllers",
            Collection::Models => "models",
            Collection::Credentials => "credentials",
            Collection::Machines => "machines",
            Collection::Applications => "applications",
            Collection::ModelUuids => "model_uuids",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: its id, current version and JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub version: u64,
    pub body: serde_json::Value,
}

impl Document {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.body.clone()).map_err(|e| StoreError::Malformed {
            id: self.id.clone(),
            reason: e.to_string(),
        })
    }
}

/// Encodes a value as a document body.
pub fn encode<T: Serialize>(id: &str, value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| StoreError::Malformed {
        id: id.to_string(),
        reason: e.to_string(),
    })
}

/// Operations on one store session.
///
/// Errors other than [`StoreError::Disconnected`] leave the session usable.
#[async_trait]
pub trait StoreSession: PooledSession {
    async fn get(&self, collection: Collection, id: &str) -> Result<Document>;

    /// Creates a document at version 1. Fails if the id is taken.
    async fn insert(
        &self,
        collection: Collection,
        id: &str,
        body: serde_json::Value,
    ) -> Result<Document>;

    /// Replaces a document's body if its version is still `expected_version`.
    async fn update(
        &self,
        collection: Collection,
        id: &str,
        expected_version: u64,
        body: serde_json::Value,
    ) -> Result<Document>;

    async fn remove(&self, collection: Collection, id: &str) -> Result<()>;

    /// Lists documents whose ids start with `prefix`, ordered by id.
    async fn scan(&self, collection: Collection, prefix: &str) -> Result<Vec<Document>>;

    async fn ping(&self) -> Result<()>;
}
