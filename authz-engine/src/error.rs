use thiserror::Error;

#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Role not found: {0}")]
    RoleNotFound(String),

    #[error("Agent group not found: {0}")]
    GroupNotFound(String),

    #[error("Agent authorization not found: {0}")]
    AgentNotFound(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

impl PolicyError {
    /// True for the lookups that queries treat as "empty" rather than fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::RoleNotFound(_) | Self::GroupNotFound(_) | Self::AgentNotFound(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, PolicyError>;

/// Reject empty identity, role and group names.
pub fn validate_name(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(PolicyError::InvalidArgument(format!("{} must be a non-empty string", kind)));
    }
    Ok(())
}
