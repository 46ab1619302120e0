//! Error types for the corral-connect crate

use corral_core_interface::ApiError;
use thiserror::Error;

/// Failures opening or using a cached connection.
///
/// Cloneable so that one failed dial can be reported to every caller that
/// was waiting on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    #[error("cannot connect to controller {controller}: {reason}")]
    DialFailed { controller: String, reason: String },

    #[error("dial to {0} was abandoned before it completed")]
    DialAbandoned(String),

    #[error("connection to {0} has been evicted")]
    Evicted(String),

    #[error("connection cache is closed")]
    CacheClosed,

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl ConnectError {
    pub fn dial_failed(controller: impl Into<String>, reason: impl Into<String>) -> Self {
        ConnectError::DialFailed {
            controller: controller.into(),
            reason: reason.into(),
        }
    }
}
