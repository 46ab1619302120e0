/*!
 * Error types for Corral
 */

use corral_connect::ConnectError;
use corral_core_interface::{ApiError, CredentialPath, EntityPath};
use corral_core_resilience::PoolError;
use corral_store::StoreError;
use std::fmt;
use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FleetError>;

/// Coarse classification of a [`FleetError`], for branching without string matching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Unauthorized,
    AlreadyExists,
    StillInUse,
    DialFailed,
    Inconsistent,
    Conflict,
    BadRequest,
    Controller,
    Internal,
}

/// A controller that rejected or never received a best-effort push.
#[derive(Debug)]
pub struct ControllerFailure {
    pub controller: EntityPath,
    pub error: FleetError,
}

impl fmt::Display for ControllerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.controller, self.error)
    }
}

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("{0} not found")]
    NotFound(String),

    /// Deliberately carries nothing about the resource.
    #[error("unauthorized")]
    Unauthorized,

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("credential {credential} is still in use by {models} model(s)")]
    StillInUse {
        credential: CredentialPath,
        models: usize,
    },

    #[error("cannot connect to controller {controller}")]
    DialFailed {
        controller: EntityPath,
        #[source]
        source: ConnectError,
    },

    /// The controller created the model but it could not be recorded locally.
    #[error("model {model} ({uuid}) was created on its controller but could not be recorded")]
    Inconsistent {
        model: EntityPath,
        uuid: String,
        #[source]
        source: StoreError,
    },

    #[error("concurrent modification: {0}")]
    Conflict(String),

    #[error("credential {0} has been revoked")]
    CredentialRevoked(CredentialPath),

    #[error("controller {0} is deprecated")]
    ControllerDeprecated(EntityPath),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("controller {controller} rejected the request")]
    Controller {
        controller: EntityPath,
        #[source]
        source: ConnectError,
    },

    #[error("{operation} failed on {} controller(s): {}", .failures.len(), join(.failures))]
    PartialFailure {
        operation: &'static str,
        failures: Vec<ControllerFailure>,
    },

    #[error("model summary watch on {controller} terminated: {reason}")]
    WatchTerminated { controller: EntityPath, reason: String },

    #[error("store error")]
    Store(#[source] StoreError),

    #[error("session pool error")]
    Pool(#[from] PoolError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error")]
    Io(#[from] io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

fn join(failures: &[ControllerFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<StoreError> for FleetError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { collection, id } => {
                FleetError::NotFound(format!("{collection} {id:?}"))
            }
            StoreError::AlreadyExists { collection, id } => {
                FleetError::AlreadyExists(format!("{collection} {id:?}"))
            }
            conflict @ StoreError::Conflict { .. } => FleetError::Conflict(conflict.to_string()),
            other => FleetError::Store(other),
        }
    }
}

impl FleetError {
    pub fn controller(controller: &EntityPath, source: impl Into<ConnectError>) -> Self {
        FleetError::Controller {
            controller: controller.clone(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            FleetError::NotFound(_) => ErrorKind::NotFound,
            FleetError::Unauthorized => ErrorKind::Unauthorized,
            FleetError::AlreadyExists(_) => ErrorKind::AlreadyExists,
            FleetError::StillInUse { .. } => ErrorKind::StillInUse,
            FleetError::DialFailed { .. } => ErrorKind::DialFailed,
            FleetError::Inconsistent { .. } => ErrorKind::Inconsistent,
            FleetError::Conflict(_) => ErrorKind::Conflict,
            FleetError::CredentialRevoked(_)
            | FleetError::ControllerDeprecated(_)
            | FleetError::BadRequest(_)
            | FleetError::Config(_) => ErrorKind::BadRequest,
            FleetError::Controller { .. }
            | FleetError::PartialFailure { .. }
            | FleetError::WatchTerminated { .. } => ErrorKind::Controller,
            FleetError::Store(_)
            | FleetError::Pool(_)
            | FleetError::Io(_)
            | FleetError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error may clear up on retry
    pub fn is_transient(&self) -> bool {
        match self {
            FleetError::DialFailed { .. } | FleetError::Conflict(_) => true,
            FleetError::Store(e) => e.is_disconnected(),
            FleetError::Controller { source, .. } => {
                matches!(source, ConnectError::Api(ApiError::ConnectionClosed) | ConnectError::Evicted(_))
            }
            FleetError::WatchTerminated { .. } => true,
            // Needs out-of-band reconciliation, never a blind retry.
            FleetError::Inconsistent { .. } => false,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_store_errors_map_to_taxonomy() {
        let not_found: FleetError = StoreError::NotFound {
            collection: "models",
            id: "bob/m".into(),
        }
        .into();
        assert_eq!(not_found.kind(), ErrorKind::NotFound);

        let conflict: FleetError = StoreError::Conflict {
            collection: "models",
            id: "bob/m".into(),
            expected: 3,
        }
        .into();
        assert_eq!(conflict.kind(), ErrorKind::Conflict);
        assert!(conflict.is_transient());

        let lost: FleetError = StoreError::Disconnected("EOF".into()).into();
        assert_eq!(lost.kind(), ErrorKind::Internal);
        assert!(lost.is_transient());
    }

    #[test]
    fn test_root_cause_is_inspectable() {
        let err = FleetError::DialFailed {
            controller: EntityPath::new("bob", "ctl"),
            source: ConnectError::dial_failed("bob/ctl", "connection refused"),
        };
        assert_eq!(err.kind(), ErrorKind::DialFailed);
        assert!(err.is_transient());
        let source = err.source().unwrap();
        assert!(source.to_string().contains("connection refused"));
    }

    #[test]
    fn test_partial_failure_lists_controllers() {
        let err = FleetError::PartialFailure {
            operation: "revoke credential",
            failures: vec![ControllerFailure {
                controller: EntityPath::new("bob", "ctl"),
                error: FleetError::controller(
                    &EntityPath::new("bob", "ctl"),
                    ApiError::remote("denied", "nope"),
                ),
            }],
        };
        let msg = err.to_string();
        assert!(msg.contains("1 controller(s)"));
        assert!(msg.contains("bob/ctl"));
    }

    #[test]
    fn test_unauthorized_reveals_nothing() {
        assert_eq!(FleetError::Unauthorized.to_string(), "unauthorized");
    }
}
