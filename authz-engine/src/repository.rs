use crate::{error::PolicyError, store::AuthzMap};
use async_trait::async_trait;
use parking_lot::RwLock;

pub mod file;

pub use file::FilePolicyRepository;

/// Durable storage for the authorization policy
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    /// Load the stored policy; an absent store yields an empty policy
    async fn load(&self) -> Result<AuthzMap, PolicyError>;

    /// Replace the stored policy. Must be atomic: a failed save leaves the
    /// previous policy readable.
    async fn save(&self, policy: &AuthzMap) -> Result<(), PolicyError>;
}

/// In-memory policy repository for testing and deployments without a file
pub struct InMemoryPolicyRepository {
    policy: RwLock<AuthzMap>,
}

impl InMemoryPolicyRepository {
    pub fn new() -> Self {
        Self {
            policy: RwLock::new(AuthzMap::new()),
        }
    }

    pub fn with_policy(policy: AuthzMap) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }
}

impl Default for InMemoryPolicyRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PolicyRepository for InMemoryPolicyRepository {
    async fn load(&self) -> Result<AuthzMap, PolicyError> {
        Ok(self.policy.read().clone())
    }

    async fn save(&self, policy: &AuthzMap) -> Result<(), PolicyError> {
        *self.policy.write() = policy.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RoleUpdate;

    #[tokio::test]
    async fn test_in_memory_repository() {
        let repo = InMemoryPolicyRepository::new();
        assert_eq!(repo.load().await.unwrap(), AuthzMap::new());

        let mut policy = AuthzMap::new();
        policy.create_or_merge_role(RoleUpdate::new("admin")).unwrap();
        repo.save(&policy).await.unwrap();

        let loaded = repo.load().await.unwrap();
        assert!(loaded.roles.contains_key("admin"));
    }
}
