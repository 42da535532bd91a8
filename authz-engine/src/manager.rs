use crate::{
    check::PermissionChecker,
    error::{validate_name, Result},
    models::*,
    pattern::ResourcePattern,
    repository::{InMemoryPolicyRepository, PolicyRepository},
    resolve::CapabilityResolver,
    store::{AuthzMap, PolicyStore},
};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

/// Authorization manager: the mutation and query API over one policy store
pub struct AuthorizationManager {
    store: PolicyStore,
}

impl AuthorizationManager {
    /// Create a manager over the policy persisted in `repository`
    pub async fn new(repository: Arc<dyn PolicyRepository>) -> Result<Self> {
        Ok(Self {
            store: PolicyStore::open(repository).await?,
        })
    }

    /// Manager over an empty, non-persistent policy
    pub async fn in_memory() -> Result<Self> {
        Self::new(Arc::new(InMemoryPolicyRepository::new())).await
    }

    // =============================================================================
    // Policy Mutation
    // =============================================================================

    /// Create the role or union the given capabilities into it
    pub async fn create_or_merge_role(&self, update: RoleUpdate) -> Result<bool> {
        let name = update.name.clone();
        let changed = self
            .store
            .mutate(|policy| policy.create_or_merge_role(update).map(|changed| (changed, changed)))
            .await?;
        info!(role = %name, changed, "Merged role");
        Ok(true)
    }

    pub async fn create_or_merge_agent_group(&self, update: GroupUpdate) -> Result<bool> {
        let name = update.name.clone();
        let changed = self
            .store
            .mutate(|policy| policy.create_or_merge_agent_group(update).map(|changed| (changed, changed)))
            .await?;
        info!(group = %name, changed, "Merged agent group");
        Ok(true)
    }

    /// Merge a per-identity record. The returned change says whether the
    /// identity's protected RPC set grew, for propagation to a live agent.
    pub async fn create_or_merge_agent_authz(&self, update: AgentAuthzUpdate) -> Result<AuthzChange> {
        let change = self.store.mutate(|policy| policy.create_or_merge_agent_authz(update)).await?;
        info!(
            identity = %change.identity,
            protected_rpcs_changed = change.protected_rpcs_changed,
            "Merged agent authorization"
        );
        Ok(change)
    }

    pub async fn add_agents_to_group(&self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        let changed = self
            .store
            .mutate(|policy| policy.add_agents_to_group(name, identities).map(|changed| (changed, changed)))
            .await?;
        info!(group = name, changed, "Added agents to group");
        Ok(true)
    }

    pub async fn remove_agents_from_group(&self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        let changed = self
            .store
            .mutate(|policy| policy.remove_agents_from_group(name, identities).map(|changed| (changed, changed)))
            .await?;
        info!(group = name, changed, "Removed agents from group");
        Ok(true)
    }

    /// Mark topics matching any of `patterns` as protected bus-wide
    pub async fn create_protected_topics(&self, patterns: &[String]) -> Result<bool> {
        let parsed = parse_patterns(patterns)?;
        let changed = self
            .store
            .mutate(|policy| {
                let changed = policy.create_protected_topics(parsed);
                Ok((changed, changed))
            })
            .await?;
        info!(count = patterns.len(), changed, "Created protected topics");
        Ok(true)
    }

    pub async fn remove_protected_topics(&self, patterns: &[String]) -> Result<bool> {
        let parsed = parse_patterns(patterns)?;
        let changed = self
            .store
            .mutate(|policy| {
                let changed = policy.remove_protected_topics(&parsed);
                Ok((changed, changed))
            })
            .await?;
        info!(count = patterns.len(), changed, "Removed protected topics");
        Ok(true)
    }

    /// Remove a role, unassigning it from every agent and group
    pub async fn remove_role(&self, name: &str) -> Result<bool> {
        self.store.mutate(|policy| policy.remove_role(name).map(|_| ((), true))).await?;
        info!(role = name, "Removed role");
        Ok(true)
    }

    pub async fn remove_agent_group(&self, name: &str) -> Result<bool> {
        self.store.mutate(|policy| policy.remove_agent_group(name).map(|_| ((), true))).await?;
        info!(group = name, "Removed agent group");
        Ok(true)
    }

    pub async fn remove_agent_authorization(&self, identity: &str) -> Result<bool> {
        self.store
            .mutate(|policy| policy.remove_agent_authorization(identity).map(|_| ((), true)))
            .await?;
        info!(identity, "Removed agent authorization");
        Ok(true)
    }

    // =============================================================================
    // Queries
    // =============================================================================

    /// Fully resolved capabilities; unknown identities resolve to nothing
    pub async fn get_agent_capabilities(&self, identity: &str) -> Result<EffectiveCapabilities> {
        validate_name("identity", identity)?;
        let policy = self.store.read().await;
        Ok(CapabilityResolver::new(&policy).resolve(identity))
    }

    pub async fn get_protected_rpcs(&self, identity: &str) -> Result<BTreeSet<String>> {
        validate_name("identity", identity)?;
        Ok(self.store.read().await.protected_rpcs(identity))
    }

    pub async fn check_rpc_authorization(
        &self,
        identity: &str,
        method_name: &str,
        method_args: &Map<String, Value>,
    ) -> Result<bool> {
        validate_name("identity", identity)?;
        validate_name("method name", method_name)?;
        let policy = self.store.read().await;
        Ok(PermissionChecker::new(&policy).check_rpc(identity, method_name, method_args))
    }

    pub async fn check_pubsub_authorization(&self, identity: &str, topic: &str, access: TopicAccess) -> Result<bool> {
        validate_name("identity", identity)?;
        validate_name("topic", topic)?;
        let policy = self.store.read().await;
        Ok(PermissionChecker::new(&policy).check_pubsub(identity, topic, access))
    }

    pub async fn is_protected_topic(&self, topic: &str) -> Result<bool> {
        validate_name("topic", topic)?;
        Ok(self.store.read().await.is_protected_topic(topic))
    }

    /// Whether `identity` already has any effective capability
    pub async fn is_provisioned(&self, identity: &str) -> Result<bool> {
        let provisioned = !self.get_agent_capabilities(identity).await?.is_empty();
        debug!(identity, provisioned, "Checked provisioning");
        Ok(provisioned)
    }

    /// Copy of the whole current policy
    pub async fn snapshot(&self) -> AuthzMap {
        self.store.snapshot().await
    }
}

fn parse_patterns(patterns: &[String]) -> Result<Vec<ResourcePattern>> {
    patterns.iter().map(|p| ResourcePattern::parse(p)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PolicyError;
    use serde_json::json;

    #[tokio::test]
    async fn test_manager_round_trip() {
        let manager = AuthorizationManager::in_memory().await.unwrap();
        manager
            .create_or_merge_role(RoleUpdate::new("admin").with_rpc(RpcCapability::new("/.*/").unwrap()))
            .await
            .unwrap();

        let change = manager
            .create_or_merge_agent_authz(
                AgentAuthzUpdate::new("target")
                    .with_protected_rpcs(["secret"])
                    .with_comments("protected target"),
            )
            .await
            .unwrap();
        assert!(change.protected_rpcs_changed);

        let args = Map::new();
        assert!(!manager.check_rpc_authorization("caller", "target.secret", &args).await.unwrap());
        assert!(manager.check_rpc_authorization("caller", "target.open", &args).await.unwrap());

        manager
            .create_or_merge_agent_authz(AgentAuthzUpdate::new("caller").with_role(AgentRole::new("admin")))
            .await
            .unwrap();
        assert!(manager.check_rpc_authorization("caller", "target.secret", &args).await.unwrap());
        assert!(manager.is_provisioned("caller").await.unwrap());
        assert!(!manager.is_provisioned("stranger").await.unwrap());
    }

    #[tokio::test]
    async fn test_protected_topics_are_parsed() {
        let manager = AuthorizationManager::in_memory().await.unwrap();
        manager.create_protected_topics(&["/devices/.*/".to_string()]).await.unwrap();
        assert!(manager.is_protected_topic("devices/b1").await.unwrap());
        assert!(!manager.is_protected_topic("heartbeat/x").await.unwrap());

        let err = manager.create_protected_topics(&["/(/".to_string()]).await.unwrap_err();
        assert!(matches!(err, PolicyError::InvalidPattern { .. }));

        manager.remove_protected_topics(&["/devices/.*/".to_string()]).await.unwrap();
        assert!(!manager.is_protected_topic("devices/b1").await.unwrap());
    }

    #[tokio::test]
    async fn test_queries_reject_empty_identity() {
        let manager = AuthorizationManager::in_memory().await.unwrap();
        assert!(manager.get_protected_rpcs("").await.is_err());
        assert!(manager
            .check_rpc_authorization("", "a.b", json!({}).as_object().unwrap())
            .await
            .is_err());
    }
}
