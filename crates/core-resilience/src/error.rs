use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("session pool size must be at least 1")]
    EmptyPool,

    #[error("session pool is closed")]
    Closed,
}
