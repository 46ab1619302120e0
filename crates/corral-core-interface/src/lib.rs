//! Corral Core Interface: shared vocabulary for the fleet manager
//!
//! This crate defines the types every other Corral crate speaks:
//!
//! 1. **Paths**: [`EntityPath`] (`owner/name`) and [`CredentialPath`] (`cloud/owner/name`)
//! 2. **Access control**: [`Acl`] and [`Identity`], including group membership
//! 3. **Versions**: [`Version`], a totally ordered `major.minor.patch` triple
//! 4. **The controller seam**: the [`ControllerApi`] trait through which the fleet
//!    manager drives a remote controller, plus the wire shapes it exchanges
//!
//! # Example
//!
//! ```rust,no_run
//! use corral_core_interface::{ControllerApi, Version};
//!
//! async fn report(api: &dyn ControllerApi) -> Result<Version, corral_core_interface::ApiError> {
//!     api.ping().await?;
//!     api.server_version().await
//! }
//! ```
//!
//! The controller trait is object safe; the fleet manager holds connections as
//! `Arc<dyn ControllerApi>` so that test doubles and real transports are
//! interchangeable.

pub mod access;
pub mod controller;
pub mod paths;
pub mod version;

pub use access::{Acl, Identity, EVERYONE};
pub use controller::{
    ApiError, ApplicationInfo, ControllerApi, CreateModelArgs, CredentialUpdate, Life,
    MachineInfo, ModelInfo, ModelSize, ModelSummary, SummaryStream,
};
pub use paths::{CredentialPath, EntityPath, PathError};
pub use version::{Version, VersionError};
