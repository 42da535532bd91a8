use crate::service::ServiceState;
use authz_engine::PolicyError;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("No credentials for identity: {0}")]
    NotFound(String),

    #[error("Credential storage error: {0}")]
    StorageError(String),
}

/// Failure of a remote call to another agent on the bus
#[derive(Error, Debug)]
pub enum RemoteCallError {
    #[error("Peer {0} is not reachable")]
    Unreachable(String),

    #[error("Peer {identity} rejected the call: {message}")]
    Remote { identity: String, message: String },

    #[error("Call to {identity} timed out after {timeout:?}")]
    Timeout { identity: String, timeout: Duration },
}

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Auth service is not running (state: {0})")]
    NotRunning(ServiceState),

    #[error("Auth service has already been started")]
    AlreadyStarted,

    #[error("{caller} is not authorized to call {method}")]
    AccessDenied { caller: String, method: String },

    #[error("Unknown method: {0}")]
    MethodNotFound(String),

    #[error("Invalid request for {method}: {reason}")]
    InvalidRequest { method: String, reason: String },

    /// The peer is connected but did not accept the new protected RPC set.
    /// Its enforcement is stale until it is restarted.
    #[error("Failed to propagate protected RPCs to {identity}: {reason}. Restart the agent to reload its policy")]
    PropagationFailed { identity: String, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
