use super::FleetManager;
use crate::db::Database;
use crate::docs::{entity_id, ApplicationDoc, EntityDoc, EntityInfo, MachineDoc};
use crate::error::Result;
use corral_core_interface::{ApplicationInfo, EntityPath, Identity, MachineInfo};
use corral_store::{StoreError, StoreSession};
use tracing::debug;

impl<S: StoreSession> FleetManager<S> {
    /// Applies a machine delta reported by `controller`.
    pub async fn update_machine_info(
        &self,
        controller: &EntityPath,
        info: MachineInfo,
    ) -> Result<()> {
        self.update_entity_info(controller, info).await
    }

    /// Applies an application delta reported by `controller`.
    pub async fn update_application_info(
        &self,
        controller: &EntityPath,
        info: ApplicationInfo,
    ) -> Result<()> {
        self.update_entity_info(controller, info).await
    }

    pub async fn machines(&self, actor: &Identity, model: &EntityPath) -> Result<Vec<MachineDoc>> {
        self.model_entities(actor, model).await
    }

    pub async fn applications(
        &self,
        actor: &Identity,
        model: &EntityPath,
    ) -> Result<Vec<ApplicationDoc>> {
        self.model_entities(actor, model).await
    }

    async fn model_entities<I: EntityInfo>(
        &self,
        actor: &Identity,
        model: &EntityPath,
    ) -> Result<Vec<EntityDoc<I>>> {
        let db = self.db()?;
        let model = self.readable_model(&db, actor, model).await?.doc;
        Ok(db.entities::<I>(&model.controller, &model.uuid).await?)
    }

    /// Deltas can arrive before the model is recorded, so a model this
    /// controller does not host is skipped without error.
    async fn update_entity_info<I: EntityInfo>(
        &self,
        controller: &EntityPath,
        info: I,
    ) -> Result<()> {
        let db = self.db()?;
        let uuid = info.model_uuid().to_string();
        let Some(model) = db.model_by_uuid(&uuid).await? else {
            debug!(%controller, model = %uuid, "Ignoring delta for unknown model");
            return Ok(());
        };
        if &model.doc.controller != controller {
            debug!(
                %controller,
                model = %uuid,
                host = %model.doc.controller,
                "Ignoring delta from a controller that does not host the model"
            );
            return Ok(());
        }

        let id = entity_id(controller, &uuid, info.entity_id());
        if info.life().is_dead() {
            return match db.remove_entity::<I>(&id).await {
                Ok(()) => {
                    debug!(%id, "Removed dead entity");
                    Ok(())
                }
                Err(e) if e.is_not_found() => Ok(()),
                Err(e) => Err(e.into()),
            };
        }

        let doc = EntityDoc {
            id,
            controller: controller.clone(),
            cloud: model.doc.cloud,
            region: model.doc.region,
            info,
        };
        match upsert(&db, &doc).await {
            // Lost a race with another delta for the same entity.
            Err(StoreError::AlreadyExists { .. }) | Err(StoreError::Conflict { .. }) => {
                upsert(&db, &doc).await?
            }
            other => other?,
        }
        Ok(())
    }
}

/// Replaces the reported state of an existing entity, keeping where it
/// lives, or records a new one.
async fn upsert<S: StoreSession, I: EntityInfo>(
    db: &Database<S>,
    doc: &EntityDoc<I>,
) -> std::result::Result<(), StoreError> {
    match db.entity::<I>(&doc.id).await {
        Ok(mut stored) => {
            stored.doc.info.absorb(doc.info.clone());
            db.update_entity(&stored).await?;
        }
        Err(e) if e.is_not_found() => {
            db.insert_entity(doc).await?;
        }
        Err(e) => return Err(e),
    }
    Ok(())
}
