use super::FleetManager;
use crate::auth::Action;
use crate::db::{Database, Stored};
use crate::docs::{Controller, Credential, Model};
use crate::error::{FleetError, Result};
use chrono::Utc;
use corral_core_interface::{
    Acl, ApiError, ApplicationInfo, CreateModelArgs, CredentialPath, CredentialUpdate, EntityPath,
    Identity, MachineInfo,
};
use corral_store::StoreSession;
use std::collections::BTreeMap;
use tracing::{error, info, instrument, warn};

/// Everything needed to provision a model.
#[derive(Debug, Clone)]
pub struct CreateModelParams {
    pub path: EntityPath,
    pub controller: EntityPath,
    pub credential: CredentialPath,
    pub cloud: String,
    pub region: Option<String>,
    pub config: BTreeMap<String, serde_json::Value>,
}

impl<S: StoreSession> FleetManager<S> {
    /// Provisions a model on a controller and records it.
    ///
    /// A controller-side failure leaves nothing behind. If the controller
    /// succeeds but the record cannot be written, the result is
    /// [`FleetError::Inconsistent`] and the remote model is left in place.
    #[instrument(skip(self, actor, params), fields(actor = %actor.name(), model = %params.path))]
    pub async fn create_model(&self, actor: &Identity, params: CreateModelParams) -> Result<Model> {
        if !actor.is_member(&params.path.owner) && !self.is_admin(actor) {
            return Err(FleetError::Unauthorized);
        }

        let db = self.db()?;
        let controller = self
            .readable_controller(&db, actor, &params.controller)
            .await?
            .doc;
        if controller.deprecated {
            return Err(FleetError::ControllerDeprecated(controller.path));
        }

        let mut credential = self
            .readable_credential(&db, actor, &params.credential)
            .await?;
        if credential.doc.revoked {
            return Err(FleetError::CredentialRevoked(credential.doc.path));
        }
        if credential.doc.path.cloud != params.cloud {
            return Err(FleetError::BadRequest(format!(
                "credential {} is not for cloud {}",
                credential.doc.path, params.cloud
            )));
        }

        match db.model(&params.path).await {
            Ok(_) => return Err(FleetError::AlreadyExists(format!("model {}", params.path))),
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        // Claim the credential at the version checked above. A revoke that
        // read the same version now conflicts; a later one sees the claim.
        let model_path = params.path.clone();
        credential.doc.provisioning.insert(model_path.clone());
        db.update_credential(&credential).await?;
        let credential = credential.doc;

        let result = self.provision(&db, &controller, &credential, params).await;
        if !matches!(result, Err(FleetError::Inconsistent { .. })) {
            self.release_claim(&db, &credential.path, &model_path).await;
        }
        result
    }

    /// The remote half of [`create_model`](Self::create_model), plus the
    /// record. An unrecorded remote model keeps its credential claim.
    async fn provision(
        &self,
        db: &Database<S>,
        controller: &Controller,
        credential: &Credential,
        params: CreateModelParams,
    ) -> Result<Model> {
        let conn = self.connect(db, controller).await?;

        if !credential.controllers.contains(&controller.path) {
            let pushed = conn.update_credential(&full_update(credential)).await;
            self.checked(&conn, &controller.path, pushed).await?;
            self.record_delivery(db, &credential.path, &controller.path)
                .await?;
        }

        let args = CreateModelArgs {
            name: params.path.name.clone(),
            owner: params.path.owner.clone(),
            cloud: params.cloud.clone(),
            region: params.region.clone(),
            credential: Some(credential.path.clone()),
            config: params.config,
        };
        let created = conn.create_model(&args).await;
        let info = self.checked(&conn, &controller.path, created).await?;

        let model = Model {
            path: params.path,
            uuid: info.uuid,
            controller: controller.path.clone(),
            credential: Some(credential.path.clone()),
            cloud: info.cloud,
            region: info.region,
            acl: Acl::default(),
            created_at: Utc::now(),
            life: info.life,
        };

        if let Err(source) = db.insert_model(&model).await {
            error!(
                model = %model.path,
                uuid = %model.uuid,
                controller = %model.controller,
                error = %source,
                "Model exists on controller but was not recorded; reconciliation required"
            );
            return Err(FleetError::Inconsistent {
                model: model.path,
                uuid: model.uuid,
                source,
            });
        }

        info!(uuid = %model.uuid, controller = %model.controller, "Created model");
        Ok(model)
    }

    pub async fn get_model(&self, actor: &Identity, path: &EntityPath) -> Result<Model> {
        let db = self.db()?;
        Ok(self.readable_model(&db, actor, path).await?.doc)
    }

    /// Models the actor may read, ordered by path.
    pub async fn list_models(&self, actor: &Identity) -> Result<Vec<Model>> {
        let db = self.db()?;
        Ok(db
            .models()
            .await?
            .into_iter()
            .map(|s| s.doc)
            .filter(|m| {
                self.authorizer
                    .is_authorized(actor, &m.resource(), Action::Read)
            })
            .collect())
    }

    /// Destroys a model on its controller and forgets it locally, along
    /// with its machines and applications.
    #[instrument(skip(self, actor), fields(actor = %actor.name()))]
    pub async fn delete_model(&self, actor: &Identity, path: &EntityPath) -> Result<()> {
        let db = self.db()?;
        let model = self.readable_model(&db, actor, path).await?.doc;
        self.check(actor, &model.resource(), Action::Write)?;

        match db.controller(&model.controller).await {
            Ok(controller) => {
                let conn = self.connect(&db, &controller.doc).await?;
                match conn.destroy_model(&model.uuid).await {
                    Ok(()) => {}
                    Err(ApiError::NotFound(_)) => {
                        warn!(uuid = %model.uuid, "Model already gone from controller")
                    }
                    Err(e) => {
                        self.checked(&conn, &model.controller, Err::<(), _>(e))
                            .await?
                    }
                }
            }
            Err(e) if e.is_not_found() => {
                warn!(controller = %model.controller, "Controller of model no longer registered")
            }
            Err(e) => return Err(e.into()),
        }

        match db.remove_model(&model).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }
        let machines = db
            .remove_model_entities::<MachineInfo>(&model.controller, &model.uuid)
            .await?;
        let applications = db
            .remove_model_entities::<ApplicationInfo>(&model.controller, &model.uuid)
            .await?;

        info!(uuid = %model.uuid, machines, applications, "Deleted model");
        Ok(())
    }

    pub(super) async fn readable_model(
        &self,
        db: &Database<S>,
        actor: &Identity,
        path: &EntityPath,
    ) -> Result<Stored<Model>> {
        let stored = match db.model(path).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                return Err(self.missing(actor, &path.owner, format!("model {path}")))
            }
            Err(e) => return Err(e.into()),
        };
        self.check(actor, &stored.doc.resource(), Action::Read)?;
        Ok(stored)
    }
}

/// A push carrying every attribute, for a controller that has never seen
/// the credential.
fn full_update(credential: &Credential) -> CredentialUpdate {
    CredentialUpdate {
        path: credential.path.clone(),
        auth_type: credential.auth_type.clone(),
        attributes: credential.attributes.clone(),
        unchanged: Default::default(),
    }
}
