//! Backend implementations for StoreSession
//!
//! - `memory`: process-local maps, always available
//! - `sqlite`: SQLite-based backend (default, requires `sqlite` feature)

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;
