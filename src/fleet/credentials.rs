use super::FleetManager;
use crate::auth::Action;
use crate::db::{Database, Stored};
use crate::docs::Credential;
use crate::error::{ControllerFailure, FleetError, Result};
use corral_core_interface::{Acl, CredentialPath, CredentialUpdate, EntityPath, Identity};
use corral_store::StoreSession;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, instrument, warn};

/// New contents for a credential.
#[derive(Debug, Clone, Default)]
pub struct CredentialParams {
    pub auth_type: String,
    pub attributes: BTreeMap<String, String>,
}

/// Whether an update is also sent to controllers that hold the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    LocalOnly,
    PushToControllers,
}

/// How far a revoke goes once the in-use check passes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeMode {
    CheckOnly,
    CheckAndUpdate,
}

impl<S: StoreSession> FleetManager<S> {
    pub async fn get_credential(&self, actor: &Identity, path: &CredentialPath) -> Result<Credential> {
        let db = self.db()?;
        Ok(self.readable_credential(&db, actor, path).await?.doc)
    }

    /// Creates or replaces a credential.
    ///
    /// With [`UpdateMode::PushToControllers`] the change is sent to every
    /// controller in the delivery log. Values that did not change are sent by
    /// key only. Push failures are reported as
    /// [`FleetError::PartialFailure`]; the local change stands.
    #[instrument(skip(self, actor, params), fields(actor = %actor.name(), credential = %path))]
    pub async fn update_credential(
        &self,
        actor: &Identity,
        path: &CredentialPath,
        params: CredentialParams,
        mode: UpdateMode,
    ) -> Result<Credential> {
        let db = self.db()?;

        let (credential, update) = match db.credential(path).await {
            Ok(mut stored) => {
                self.check(actor, &stored.doc.resource(), Action::Write)?;
                let update = diff(&stored.doc, &params);
                stored.doc.auth_type = params.auth_type;
                stored.doc.attributes = params.attributes;
                stored.doc.revoked = false;
                db.update_credential(&stored).await?;
                (stored.doc, update)
            }
            Err(e) if e.is_not_found() => {
                if !actor.is_member(&path.owner) && !self.is_admin(actor) {
                    return Err(FleetError::Unauthorized);
                }
                let credential = Credential {
                    path: path.clone(),
                    auth_type: params.auth_type,
                    attributes: params.attributes,
                    revoked: false,
                    controllers: BTreeSet::new(),
                    provisioning: BTreeSet::new(),
                    acl: Acl::default(),
                };
                db.insert_credential(&credential).await?;
                let update = CredentialUpdate {
                    path: path.clone(),
                    auth_type: credential.auth_type.clone(),
                    attributes: credential.attributes.clone(),
                    unchanged: BTreeSet::new(),
                };
                (credential, update)
            }
            Err(e) => return Err(e.into()),
        };
        info!(keys = credential.attributes.len(), "Updated credential");

        if mode == UpdateMode::PushToControllers && !credential.controllers.is_empty() {
            let failures = self.push_update(&db, &credential.controllers, &update).await;
            if !failures.is_empty() {
                return Err(FleetError::PartialFailure {
                    operation: "credential update",
                    failures,
                });
            }
        }
        Ok(credential)
    }

    /// Revokes a credential that no model uses.
    ///
    /// Both modes fail with [`FleetError::StillInUse`], touching nothing, if
    /// any model still refers to the credential. `CheckAndUpdate` then clears
    /// the attributes, marks the credential revoked and tells every controller
    /// in the delivery log. Controllers that could not be told stay in the
    /// log and are reported through [`FleetError::PartialFailure`].
    #[instrument(skip(self, actor), fields(actor = %actor.name(), credential = %path))]
    pub async fn revoke_credential(
        &self,
        actor: &Identity,
        path: &CredentialPath,
        mode: RevokeMode,
    ) -> Result<()> {
        let db = self.db()?;
        let mut stored = self.readable_credential(&db, actor, path).await?;
        self.check(actor, &stored.doc.resource(), Action::Write)?;

        let mut users: BTreeSet<EntityPath> = db
            .models_using_credential(path)
            .await?
            .into_iter()
            .map(|m| m.path)
            .collect();
        users.extend(stored.doc.provisioning.iter().cloned());
        if !users.is_empty() {
            return Err(FleetError::StillInUse {
                credential: path.clone(),
                models: users.len(),
            });
        }
        if mode == RevokeMode::CheckOnly {
            return Ok(());
        }

        stored.doc.attributes.clear();
        stored.doc.revoked = true;
        db.update_credential(&stored).await?;
        info!("Revoked credential");

        let mut failures = Vec::new();
        let mut delivered = BTreeSet::new();
        for controller in &stored.doc.controllers {
            match self.push_revocation(&db, controller, path).await {
                Ok(()) => {
                    delivered.insert(controller.clone());
                }
                Err(error) => {
                    warn!(controller = %controller, error = %error, "Failed to revoke credential on controller");
                    failures.push(ControllerFailure {
                        controller: controller.clone(),
                        error,
                    });
                }
            }
        }

        if !delivered.is_empty() {
            let pruned = db
                .modify_credential(path, |c| {
                    let before = c.controllers.len();
                    c.controllers.retain(|ctl| !delivered.contains(ctl));
                    c.controllers.len() != before
                })
                .await;
            if let Err(e) = pruned {
                warn!(error = %e, "Failed to prune credential delivery log");
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(FleetError::PartialFailure {
                operation: "credential revoke",
                failures,
            })
        }
    }

    pub(super) async fn readable_credential(
        &self,
        db: &Database<S>,
        actor: &Identity,
        path: &CredentialPath,
    ) -> Result<Stored<Credential>> {
        let stored = match db.credential(path).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                return Err(self.missing(actor, &path.owner, format!("credential {path}")))
            }
            Err(e) => return Err(e.into()),
        };
        self.check(actor, &stored.doc.resource(), Action::Read)?;
        Ok(stored)
    }

    /// Drops a model's provisioning claim on a credential.
    pub(super) async fn release_claim(
        &self,
        db: &Database<S>,
        path: &CredentialPath,
        model: &EntityPath,
    ) {
        if let Err(e) = db.modify_credential(path, |c| c.provisioning.remove(model)).await {
            warn!(credential = %path, %model, error = %e, "Failed to release provisioning claim");
        }
    }

    /// Adds a controller to a credential's delivery log.
    pub(super) async fn record_delivery(
        &self,
        db: &Database<S>,
        path: &CredentialPath,
        controller: &EntityPath,
    ) -> Result<()> {
        db.modify_credential(path, |c| c.controllers.insert(controller.clone()))
            .await?;
        Ok(())
    }

    async fn push_update(
        &self,
        db: &Database<S>,
        controllers: &BTreeSet<EntityPath>,
        update: &CredentialUpdate,
    ) -> Vec<ControllerFailure> {
        let mut failures = Vec::new();
        for controller in controllers {
            let result = async {
                let doc = db.controller(controller).await?.doc;
                let conn = self.connect(db, &doc).await?;
                let pushed = conn.update_credential(update).await;
                self.checked(&conn, controller, pushed).await
            }
            .await;

            if let Err(error) = result {
                warn!(controller = %controller, error = %error, "Failed to push credential");
                failures.push(ControllerFailure {
                    controller: controller.clone(),
                    error,
                });
            }
        }
        failures
    }

    async fn push_revocation(
        &self,
        db: &Database<S>,
        controller: &EntityPath,
        path: &CredentialPath,
    ) -> Result<()> {
        let doc = match db.controller(controller).await {
            Ok(stored) => stored.doc,
            // A controller that is gone no longer holds anything.
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        let conn = self.connect(db, &doc).await?;
        let revoked = conn.revoke_credential(path).await;
        self.checked(&conn, controller, revoked).await
    }
}

/// Builds the push for an update: changed values in full, the rest by key.
fn diff(current: &Credential, params: &CredentialParams) -> CredentialUpdate {
    let mut attributes = BTreeMap::new();
    let mut unchanged = BTreeSet::new();
    for (key, value) in &params.attributes {
        if current.attributes.get(key) == Some(value) && current.auth_type == params.auth_type {
            unchanged.insert(key.clone());
        } else {
            attributes.insert(key.clone(), value.clone());
        }
    }
    CredentialUpdate {
        path: current.path.clone(),
        auth_type: params.auth_type.clone(),
        attributes,
        unchanged,
    }
}
