//! FleetManager: the operations the transport layer exposes
//!
//! A [`FleetManager`] ties the pieces together:
//!
//! ```text
//!                 ┌──────────────────────┐
//!   actor ──────► │     FleetManager     │ ──► Authorizer
//!                 └──┬────────┬───────┬──┘
//!                    │        │       │
//!                    ▼        ▼       ▼
//!           SessionPool   Connection   Hub<ModelSummary>
//!           (documents)   Cache        (live summaries)
//!                         (controllers)
//! ```
//!
//! No lock is held across a call into another component. Each operation takes
//! one store lease for its duration and releases it on every exit path.

mod controllers;
mod credentials;
mod entities;
mod models;
mod watch;

pub use controllers::{AclTarget, AddControllerParams};
pub use credentials::{CredentialParams, RevokeMode, UpdateMode};
pub use models::CreateModelParams;
pub use watch::SummaryWatch;

use crate::auth::{AclAuthorizer, Action, Authorizer, Resource, ResourceKind};
use crate::db::{Database, Stored};
use crate::docs::Controller;
use crate::error::{FleetError, Result};
use chrono::Utc;
use corral_connect::{ConnectError, ControllerCache, ControllerConn, Dialer};
use corral_core_interface::{Acl, ApiError, EntityPath, Identity, ModelSummary};
use corral_core_pubsub::Hub;
use corral_core_resilience::SessionPool;
use corral_store::{StoreError, StoreSession};
use std::sync::Arc;
use tracing::{info, warn};

/// Collaborators a [`FleetManager`] is built from.
pub struct FleetParams<S> {
    pub sessions: SessionPool<S>,
    pub dialer: Arc<dyn Dialer>,
    pub hub: Hub<ModelSummary>,
    pub controller_admin: String,
    /// Policy to apply; defaults to [`AclAuthorizer`] over `controller_admin`.
    pub authorizer: Option<Arc<dyn Authorizer>>,
}

pub struct FleetManager<S> {
    sessions: SessionPool<S>,
    cache: ControllerCache,
    dialer: Arc<dyn Dialer>,
    hub: Hub<ModelSummary>,
    authorizer: Arc<dyn Authorizer>,
    controller_admin: String,
}

impl<S: StoreSession> FleetManager<S> {
    pub fn new(params: FleetParams<S>) -> Result<Self> {
        if params.controller_admin.is_empty() {
            return Err(FleetError::Config(
                "no controller admin group specified".to_string(),
            ));
        }
        let authorizer = params
            .authorizer
            .unwrap_or_else(|| Arc::new(AclAuthorizer::new(params.controller_admin.clone())));

        info!(admin = %params.controller_admin, "Fleet manager ready");
        Ok(Self {
            sessions: params.sessions,
            cache: ControllerCache::new(),
            dialer: params.dialer,
            hub: params.hub,
            authorizer,
            controller_admin: params.controller_admin,
        })
    }

    pub fn hub(&self) -> &Hub<ModelSummary> {
        &self.hub
    }

    pub fn cache(&self) -> &ControllerCache {
        &self.cache
    }

    /// Tears down every controller connection and store session.
    pub async fn close(&self) {
        self.cache.close().await;
        self.sessions.close();
        info!("Fleet manager closed");
    }

    fn db(&self) -> Result<Database<S>> {
        Ok(Database::new(self.sessions.session()?))
    }

    fn is_admin(&self, actor: &Identity) -> bool {
        let acl = Acl::default();
        let fleet = Resource {
            kind: ResourceKind::Fleet,
            path: String::new(),
            owner: &self.controller_admin,
            acl: &acl,
        };
        self.authorizer.is_authorized(actor, &fleet, Action::Admin)
    }

    fn check_admin(&self, actor: &Identity) -> Result<()> {
        if self.is_admin(actor) {
            Ok(())
        } else {
            Err(FleetError::Unauthorized)
        }
    }

    fn check(&self, actor: &Identity, resource: &Resource<'_>, action: Action) -> Result<()> {
        if self.authorizer.is_authorized(actor, resource, action) {
            Ok(())
        } else {
            Err(FleetError::Unauthorized)
        }
    }

    /// Error for a lookup that found nothing. Only callers who could have
    /// created the entity learn that it is missing.
    fn missing(&self, actor: &Identity, owner: &str, what: String) -> FleetError {
        if actor.is_member(owner) || self.is_admin(actor) {
            FleetError::NotFound(what)
        } else {
            FleetError::Unauthorized
        }
    }

    /// Fetches a controller the actor may read.
    async fn readable_controller(
        &self,
        db: &Database<S>,
        actor: &Identity,
        path: &EntityPath,
    ) -> Result<Stored<Controller>> {
        let stored = match db.controller(path).await {
            Ok(stored) => stored,
            Err(e) if e.is_not_found() => {
                return Err(self.missing(actor, &path.owner, format!("controller {path}")))
            }
            Err(e) => return Err(e.into()),
        };
        self.check(actor, &stored.doc.resource(), Action::Read)?;
        Ok(stored)
    }

    /// Opens a cached connection, keeping the controller's availability
    /// stamp in step with the outcome.
    async fn connect(&self, db: &Database<S>, controller: &Controller) -> Result<ControllerConn> {
        let target = controller.dial_target();
        let key = controller.path.to_string();

        match self.cache.open_api(&key, || self.dialer.dial(&target)).await {
            Ok(conn) => {
                if controller.unavailable_since.is_some() {
                    self.set_unavailable(db, &controller.path, false).await;
                }
                Ok(conn)
            }
            Err(source) => {
                if matches!(source, ConnectError::DialFailed { .. }) {
                    self.set_unavailable(db, &controller.path, true).await;
                }
                Err(FleetError::DialFailed {
                    controller: controller.path.clone(),
                    source,
                })
            }
        }
    }

    /// Wraps the outcome of a controller call. A connection the controller
    /// has closed is evicted so the next operation redials.
    async fn checked<T, E>(
        &self,
        conn: &ControllerConn,
        controller: &EntityPath,
        result: std::result::Result<T, E>,
    ) -> Result<T>
    where
        E: Into<ConnectError>,
    {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let e = e.into();
                if matches!(e, ConnectError::Api(ApiError::ConnectionClosed)) {
                    warn!(%controller, key = conn.key(), "Controller connection closed; evicting");
                    conn.evict().await;
                }
                Err(FleetError::controller(controller, e))
            }
        }
    }

    /// Best-effort update of `unavailable_since`.
    async fn set_unavailable(&self, db: &Database<S>, path: &EntityPath, unavailable: bool) {
        let result = db
            .modify_controller(path, |c| match (unavailable, c.unavailable_since) {
                (true, None) => {
                    c.unavailable_since = Some(Utc::now());
                    true
                }
                (false, Some(_)) => {
                    c.unavailable_since = None;
                    true
                }
                _ => false,
            })
            .await;

        match result {
            Ok(Some(_)) if unavailable => warn!(controller = %path, "Controller marked unavailable"),
            Ok(Some(_)) => info!(controller = %path, "Controller available again"),
            Ok(None) => {}
            Err(StoreError::NotFound { .. }) => {}
            Err(e) => warn!(controller = %path, error = %e, "Failed to record controller availability"),
        }
    }
}
