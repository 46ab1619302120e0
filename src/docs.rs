/*!
 * Persistent document shapes
 *
 * Documents refer to each other by path or UUID only. A model names its
 * controller and credential; neither of those holds the model.
 */

use crate::auth::{Resource, ResourceKind};
use chrono::{DateTime, Utc};
use corral_connect::DialTarget;
use corral_core_interface::{
    Acl, ApplicationInfo, CredentialPath, EntityPath, Life, MachineInfo, Version,
};
use corral_store::Collection;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A registered controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Controller {
    pub path: EntityPath,
    pub host_ports: Vec<String>,
    pub ca_cert: Option<String>,
    pub admin_user: String,
    pub admin_password: String,
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub deprecated: bool,
    /// Agent version reported when the controller was added.
    pub version: Option<Version>,
    #[serde(default)]
    pub acl: Acl,
    /// Set when a dial fails; cleared by the next successful dial.
    pub unavailable_since: Option<DateTime<Utc>>,
}

impl Controller {
    pub fn dial_target(&self) -> DialTarget {
        DialTarget {
            controller: self.path.clone(),
            addresses: self.host_ports.clone(),
            ca_cert: self.ca_cert.clone(),
            user: self.admin_user.clone(),
            password: self.admin_password.clone(),
        }
    }

    pub fn resource(&self) -> Resource<'_> {
        Resource {
            kind: ResourceKind::Controller,
            path: self.path.to_string(),
            owner: &self.path.owner,
            acl: &self.acl,
        }
    }
}

/// A model hosted on one controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    pub path: EntityPath,
    pub uuid: String,
    pub controller: EntityPath,
    pub credential: Option<CredentialPath>,
    pub cloud: String,
    pub region: Option<String>,
    #[serde(default)]
    pub acl: Acl,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub life: Life,
}

impl Model {
    pub fn resource(&self) -> Resource<'_> {
        Resource {
            kind: ResourceKind::Model,
            path: self.path.to_string(),
            owner: &self.path.owner,
            acl: &self.acl,
        }
    }
}

/// Points from a model UUID to the model, for delta lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelIndex {
    pub path: EntityPath,
    pub controller: EntityPath,
}

/// A cloud credential.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub path: CredentialPath,
    pub auth_type: String,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
    #[serde(default)]
    pub revoked: bool,
    /// Controllers the credential has been delivered to.
    #[serde(default)]
    pub controllers: BTreeSet<EntityPath>,
    /// Models being created with this credential that are not recorded yet.
    /// A revoke counts them as users.
    #[serde(default)]
    pub provisioning: BTreeSet<EntityPath>,
    #[serde(default)]
    pub acl: Acl,
}

impl Credential {
    pub fn resource(&self) -> Resource<'_> {
        Resource {
            kind: ResourceKind::Credential,
            path: self.path.to_string(),
            owner: &self.path.owner,
            acl: &self.acl,
        }
    }
}

/// State a controller reports for an entity inside one of its models.
pub trait EntityInfo: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const COLLECTION: Collection;

    fn model_uuid(&self) -> &str;

    fn entity_id(&self) -> &str;

    fn life(&self) -> Life;

    /// Folds a newer report into this one. Fields the report leaves unset
    /// keep their current value.
    fn absorb(&mut self, newer: Self);
}

fn keep<T>(current: &mut Option<T>, newer: Option<T>) {
    if newer.is_some() {
        *current = newer;
    }
}

impl EntityInfo for MachineInfo {
    const COLLECTION: Collection = Collection::Machines;

    fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    fn entity_id(&self) -> &str {
        &self.id
    }

    fn life(&self) -> Life {
        self.life
    }

    fn absorb(&mut self, newer: Self) {
        self.life = newer.life;
        keep(&mut self.series, newer.series);
        keep(&mut self.instance_id, newer.instance_id);
        keep(&mut self.hardware, newer.hardware);
        keep(&mut self.agent_status, newer.agent_status);
    }
}

impl EntityInfo for ApplicationInfo {
    const COLLECTION: Collection = Collection::Applications;

    fn model_uuid(&self) -> &str {
        &self.model_uuid
    }

    fn entity_id(&self) -> &str {
        &self.name
    }

    fn life(&self) -> Life {
        self.life
    }

    fn absorb(&mut self, newer: Self) {
        self.life = newer.life;
        self.exposed = newer.exposed;
        keep(&mut self.charm_url, newer.charm_url);
        keep(&mut self.status, newer.status);
    }
}

/// A machine or application, keyed by controller, model UUID and entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "I: DeserializeOwned"))]
pub struct EntityDoc<I> {
    pub id: String,
    pub controller: EntityPath,
    pub cloud: String,
    pub region: Option<String>,
    pub info: I,
}

pub type MachineDoc = EntityDoc<MachineInfo>;
pub type ApplicationDoc = EntityDoc<ApplicationInfo>;

/// Composite key for machine and application documents.
pub fn entity_id(controller: &EntityPath, model_uuid: &str, entity: &str) -> String {
    format!("{} {} {}", controller, model_uuid, entity)
}

/// Key prefix shared by every entity of one model.
pub fn model_entity_prefix(controller: &EntityPath, model_uuid: &str) -> String {
    format!("{} {} ", controller, model_uuid)
}
