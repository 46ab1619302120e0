//! The RPC seam between the fleet manager and a remote controller.
//!
//! A controller owns models, machines and applications. The fleet manager
//! never talks to one directly; it goes through [`ControllerApi`], which a
//! transport implements for real controllers and tests implement in memory.

use crate::{CredentialPath, Version};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("connection is shut down")]
    ConnectionClosed,

    #[error("controller error {code}: {message}")]
    Remote { code: String, message: String },
}

impl ApiError {
    pub fn remote(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Remote {
            code: code.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;

/// Stream of model-summary batches pushed by a controller.
///
/// The stream ends when the controller stops sending; dropping it stops the
/// watcher on the controller side.
pub type SummaryStream = BoxStream<'static, Result<Vec<ModelSummary>>>;

/// Life-cycle state reported for models, machines and applications.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn is_dead(self) -> bool {
        self == Life::Dead
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateModelArgs {
    pub name: String,
    pub owner: String,
    pub cloud: String,
    pub region: Option<String>,
    pub credential: Option<CredentialPath>,
    #[serde(default)]
    pub config: BTreeMap<String, serde_json::Value>,
}

/// What a controller reports back for a model it hosts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    pub cloud: String,
    pub region: Option<String>,
    pub credential: Option<CredentialPath>,
    #[serde(default)]
    pub life: Life,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSize {
    pub machines: u64,
    pub containers: u64,
    pub applications: u64,
    pub units: u64,
    pub relations: u64,
}

/// One element of a model-summary push.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    pub uuid: String,
    pub name: String,
    pub owner: String,
    #[serde(default)]
    pub admins: Vec<String>,
    pub cloud: String,
    pub region: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub size: ModelSize,
    #[serde(default)]
    pub removed: bool,
}

/// Machine state delta published by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MachineInfo {
    pub model_uuid: String,
    pub id: String,
    #[serde(default)]
    pub life: Life,
    pub series: Option<String>,
    pub instance_id: Option<String>,
    pub hardware: Option<String>,
    pub agent_status: Option<String>,
}

/// Application state delta published by a controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationInfo {
    pub model_uuid: String,
    pub name: String,
    #[serde(default)]
    pub life: Life,
    pub charm_url: Option<String>,
    pub status: Option<String>,
    #[serde(default)]
    pub exposed: bool,
}

/// A credential pushed to a controller.
///
/// `attributes` holds only keys whose values changed; `unchanged` names the
/// keys the controller should keep as it already has them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialUpdate {
    pub path: CredentialPath,
    pub auth_type: String,
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub unchanged: BTreeSet<String>,
}

/// Operations the fleet manager needs from a single controller connection.
#[async_trait]
pub trait ControllerApi: Send + Sync + 'static {
    /// Round-trips to the controller to prove the connection is alive.
    async fn ping(&self) -> Result<()>;

    /// Tears down the underlying transport.
    async fn close(&self) -> Result<()>;

    async fn server_version(&self) -> Result<Version>;

    async fn create_model(&self, args: &CreateModelArgs) -> Result<ModelInfo>;

    async fn destroy_model(&self, uuid: &str) -> Result<()>;

    async fn update_credential(&self, update: &CredentialUpdate) -> Result<()>;

    async fn revoke_credential(&self, path: &CredentialPath) -> Result<()>;

    /// Opens a server-push stream of summaries for every model on the controller.
    async fn watch_all_model_summaries(&self) -> Result<SummaryStream>;
}
