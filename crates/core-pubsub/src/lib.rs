//! # Latest-value publish/subscribe hub.
//!
//! Provides [`Hub`], which delivers values published on a topic to every
//! handler subscribed to that topic, without ever blocking the publisher.
//!
//! ## Architecture
//! ```text
//! publish(topic, v)
//!     │
//!     ├──► [slot 1] ──► worker 1 ──► permit ──► handler1(topic, v)
//!     │   (1 value)
//!     └──► [slot N] ──► worker N ──► permit ──► handlerN(topic, v)
//!         (1 value)          ▲
//!                            └── at most `max_concurrency` handlers run at once
//! ```
//!
//! ## Rules
//! - **Latest wins**: each subscriber holds one pending value; a newer publish
//!   overwrites an undelivered one
//! - **Non-blocking**: `publish()` only swaps slot contents
//! - **Isolation**: a slow or panicking handler delays nobody else's slot
//! - **Bounded dispatch**: handlers across the hub share a semaphore of
//!   `max_concurrency` permits
//!
//! Handlers run on Tokio's blocking pool. A handler that blocks holds its
//! permit for as long as it blocks, but never stalls a runtime worker.

mod hub;

pub use hub::{Hub, Subscription, DEFAULT_MAX_CONCURRENCY};
