/*!
 * Corral - fleet manager for remote model controllers
 *
 * Manages controllers, models and cloud credentials on behalf of many
 * tenants:
 * - One shared, reference-counted connection per controller
 * - A self-healing pool of store sessions
 * - Model and credential lifecycle under ownership and ACL checks
 * - Live model summaries fanned out to subscribers
 *
 * Transports (HTTP, websocket, the controller RPC wire format) live outside
 * this crate and drive it through [`FleetManager`].
 */

pub mod auth;
pub mod config;
pub(crate) mod db;
pub mod docs;
pub mod error;
pub mod fleet;
pub mod logging;

// Re-export commonly used types
pub use auth::{AclAuthorizer, Action, Authorizer, Resource, ResourceKind};
pub use config::{DatabaseConfig, FleetConfig, LogLevel};
pub use db::Stored;
pub use docs::{ApplicationDoc, Controller, Credential, MachineDoc, Model};
pub use error::{ControllerFailure, ErrorKind, FleetError, Result};
pub use fleet::{
    AclTarget, AddControllerParams, CreateModelParams, CredentialParams, FleetManager,
    FleetParams, RevokeMode, SummaryWatch, UpdateMode,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert_eq!(VERSION, env!("CARGO_PKG_VERSION"));
    }
}
