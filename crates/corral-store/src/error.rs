use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{collection} document {id:?} not found")]
    NotFound { collection: &'static str, id: String },

    #[error("{collection} document {id:?} already exists")]
    AlreadyExists { collection: &'static str, id: String },

    #[error("{collection} document {id:?} was modified concurrently (expected version {expected})")]
    Conflict {
        collection: &'static str,
        id: String,
        expected: u64,
    },

    /// The session's connection is broken; take a new session from the pool.
    #[error("store connection lost: {0}")]
    Disconnected(String),

    #[error("malformed document {id:?}: {reason}")]
    Malformed { id: String, reason: String },

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    pub fn is_disconnected(&self) -> bool {
        matches!(self, StoreError::Disconnected(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
