use crate::error::ConnectError;
use async_trait::async_trait;
use corral_core_interface::{ControllerApi, EntityPath};
use std::fmt;
use std::sync::Arc;

/// Everything needed to reach a controller's API.
#[derive(Clone)]
pub struct DialTarget {
    pub controller: EntityPath,
    pub addresses: Vec<String>,
    pub ca_cert: Option<String>,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DialTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DialTarget")
            .field("controller", &self.controller)
            .field("addresses", &self.addresses)
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opens new connections to controllers.
#[async_trait]
pub trait Dialer: Send + Sync + 'static {
    async fn dial(&self, target: &DialTarget) -> Result<Arc<dyn ControllerApi>, ConnectError>;
}
