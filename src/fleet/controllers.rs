use super::FleetManager;
use crate::auth::Action;
use crate::docs::Controller;
use crate::error::{FleetError, Result};
use corral_core_interface::{Acl, CredentialPath, EntityPath, Identity, Version};
use corral_store::StoreSession;
use tracing::{info, instrument};

/// Connection details for a controller being registered.
#[derive(Debug, Clone)]
pub struct AddControllerParams {
    pub path: EntityPath,
    pub host_ports: Vec<String>,
    pub ca_cert: Option<String>,
    pub admin_user: String,
    pub admin_password: String,
    pub public: bool,
}

/// An entity whose ACL can be replaced with [`FleetManager::set_acl`].
#[derive(Debug, Clone)]
pub enum AclTarget {
    Controller(EntityPath),
    Model(EntityPath),
    Credential(CredentialPath),
}

impl<S: StoreSession> FleetManager<S> {
    /// Registers a controller after checking that it answers.
    #[instrument(skip(self, actor, params), fields(actor = %actor.name(), controller = %params.path))]
    pub async fn add_controller(
        &self,
        actor: &Identity,
        params: AddControllerParams,
    ) -> Result<Controller> {
        self.check_admin(actor)?;

        let db = self.db()?;
        match db.controller(&params.path).await {
            Ok(_) => {
                return Err(FleetError::AlreadyExists(format!(
                    "controller {}",
                    params.path
                )))
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e.into()),
        }

        let mut controller = Controller {
            path: params.path,
            host_ports: params.host_ports,
            ca_cert: params.ca_cert,
            admin_user: params.admin_user,
            admin_password: params.admin_password,
            public: params.public,
            deprecated: false,
            version: None,
            acl: Acl::default(),
            unavailable_since: None,
        };

        let conn = self.connect(&db, &controller).await?;
        let pinged = conn.ping().await;
        self.checked(&conn, &controller.path, pinged).await?;
        let reported = conn.server_version().await;
        let version = self.checked(&conn, &controller.path, reported).await?;
        controller.version = Some(version);

        db.insert_controller(&controller).await?;
        info!(%version, public = controller.public, "Added controller");
        Ok(controller)
    }

    pub async fn get_controller(&self, actor: &Identity, path: &EntityPath) -> Result<Controller> {
        let db = self.db()?;
        Ok(self.readable_controller(&db, actor, path).await?.doc)
    }

    /// Controllers the actor may read, ordered by path.
    pub async fn list_controllers(&self, actor: &Identity) -> Result<Vec<Controller>> {
        let db = self.db()?;
        Ok(db
            .controllers()
            .await?
            .into_iter()
            .map(|s| s.doc)
            .filter(|c| {
                self.authorizer
                    .is_authorized(actor, &c.resource(), Action::Read)
            })
            .collect())
    }

    #[instrument(skip(self, actor), fields(actor = %actor.name()))]
    pub async fn set_controller_deprecated(
        &self,
        actor: &Identity,
        path: &EntityPath,
        deprecated: bool,
    ) -> Result<()> {
        self.check_admin(actor)?;
        let db = self.db()?;
        match db
            .modify_controller(path, |c| {
                let changed = c.deprecated != deprecated;
                c.deprecated = deprecated;
                changed
            })
            .await
        {
            Ok(_) => {
                info!("Controller deprecation set");
                Ok(())
            }
            Err(e) if e.is_not_found() => Err(FleetError::NotFound(format!("controller {path}"))),
            Err(e) => Err(e.into()),
        }
    }

    /// The oldest version among public controllers the actor can read.
    ///
    /// Returns the zero version when no controller qualifies.
    pub async fn earliest_controller_version(&self, actor: &Identity) -> Result<Version> {
        let db = self.db()?;
        let earliest = db
            .controllers()
            .await?
            .into_iter()
            .map(|s| s.doc)
            .filter(|c| c.public)
            .filter(|c| {
                self.authorizer
                    .is_authorized(actor, &c.resource(), Action::Read)
            })
            .filter_map(|c| c.version)
            .min();
        Ok(earliest.unwrap_or_default())
    }

    /// Replaces the ACL of a controller, model or credential.
    ///
    /// Only the owner or a controller admin may do this. The owner keeps
    /// access whatever the ACL says.
    #[instrument(skip(self, actor, acl), fields(actor = %actor.name()))]
    pub async fn set_acl(&self, actor: &Identity, target: AclTarget, acl: Acl) -> Result<()> {
        let db = self.db()?;
        match target {
            AclTarget::Controller(path) => {
                let mut stored = self.readable_controller(&db, actor, &path).await?;
                self.check(actor, &stored.doc.resource(), Action::Admin)?;
                stored.doc.acl = acl;
                db.update_controller(&stored).await?;
                info!(controller = %path, "Replaced ACL");
            }
            AclTarget::Model(path) => {
                let mut stored = self.readable_model(&db, actor, &path).await?;
                self.check(actor, &stored.doc.resource(), Action::Admin)?;
                stored.doc.acl = acl;
                db.update_model(&stored).await?;
                info!(model = %path, "Replaced ACL");
            }
            AclTarget::Credential(path) => {
                let mut stored = self.readable_credential(&db, actor, &path).await?;
                self.check(actor, &stored.doc.resource(), Action::Admin)?;
                stored.doc.acl = acl;
                db.update_credential(&stored).await?;
                info!(credential = %path, "Replaced ACL");
            }
        }
        Ok(())
    }
}
