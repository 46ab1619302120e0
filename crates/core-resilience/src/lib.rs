//! Corral Core Resilience: a self-healing session pool
//!
//! # Overview
//!
//! Document-store sessions break when the network drops. A broken session
//! stays broken, so anything that holds on to one keeps failing. The
//! [`SessionPool`] hides that: it keeps a fixed ring of backing sessions,
//! hands them out round-robin, and swaps a dead slot for a fresh session the
//! next time that slot comes up.
//!
//! ```text
//!        session()            session()            session()
//!            │                    │                    │
//!            ▼                    ▼                    ▼
//!   ┌──────────────┐     ┌──────────────┐     ┌──────────────┐
//!   │   slot 0     │     │   slot 1     │     │   slot 2     │
//!   │  (healthy)   │     │   (dead) ────┼──►  │  (healthy)   │
//!   └──────────────┘     │  renewed on  │     └──────────────┘
//!                        │  acquisition │
//!                        └──────────────┘
//! ```
//!
//! Leases share their slot's session. A lease taken before a break keeps
//! failing after it; callers that want a working session take a new lease.
//!
//! # Usage Example
//!
//! ```no_run
//! use corral_core_resilience::{PooledSession, SessionPool};
//!
//! struct Session;
//!
//! impl PooledSession for Session {
//!     fn renew(&self) -> Self {
//!         Session
//!     }
//!
//!     fn is_dead(&self) -> bool {
//!         false
//!     }
//! }
//!
//! # fn example() -> Result<(), corral_core_resilience::PoolError> {
//! let pool = SessionPool::new(Session, 4)?;
//! let lease = pool.session()?;
//! // Use the session through the lease...
//! drop(lease);
//! pool.close();
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod session_pool;

pub use error::PoolError;
pub use session_pool::{Lease, PooledSession, SessionPool};

/// Prelude module for convenient imports
pub mod prelude {
    pub use super::error::PoolError;
    pub use super::session_pool::{Lease, PooledSession, SessionPool};
}
