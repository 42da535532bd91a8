//! Default policy seeded at startup and for newly created agents.
//!
//! Everything here goes through `create_or_merge_*`, so seeding a policy that
//! already holds these entries changes nothing.

use crate::config::AuthServiceConfig;
use crate::identities;
use authz_engine::{
    AgentAuthzUpdate, AgentRole, AuthorizationManager, GroupUpdate, PubsubCapability, Result, RoleUpdate,
    RpcCapability, TopicAccess,
};
use tracing::info;

pub const DEFAULT_ROLE: &str = "default_rpc_capabilities";
pub const SYNC_ROLE: &str = "sync_agent_config";
pub const ADMIN_ROLE: &str = "admin";
pub const ADMIN_GROUP: &str = "admin_users";

pub const BOOTSTRAP_COMMENT: &str = "Automatically added by init of auth service";
pub const NEW_AGENT_COMMENT: &str = "default authorization for new agent";

/// Policy mutation methods of the auth service; callers need a grant
pub const AUTH_PROTECTED_RPCS: [&str; 12] = [
    "create_agent",
    "remove_agent",
    "create_or_merge_role",
    "create_or_merge_agent_group",
    "create_or_merge_agent_authz",
    "create_protected_topics",
    "remove_agents_from_group",
    "add_agents_to_group",
    "remove_protected_topics",
    "remove_agent_authorization",
    "remove_agent_group",
    "remove_role",
];

pub const CONFIG_STORE_PROTECTED_RPCS: [&str; 6] = [
    "set_config",
    "delete_config",
    "delete_store",
    "initialize_configs",
    "config_update",
    "initial_config",
];

const DEFAULT_ROLE_METHODS: [&str; 4] = [
    "initialize_configs",
    "set_config",
    "delete_store",
    "delete_config",
];

const SYNC_ROLE_METHODS: [&str; 2] = ["config_update", "initial_update"];

/// Self-management methods every new agent protects
const NEW_AGENT_PROTECTED_RPCS: [&str; 4] = [
    "config.update",
    "config.initial_update",
    "rpc.add_protected_rpcs",
    "rpc.remove_protected_rpcs",
];

fn config_store_role(name: &str, methods: &[&str]) -> Result<RoleUpdate> {
    methods.iter().try_fold(RoleUpdate::new(name), |role, method| {
        let resource = format!("{}.{}", identities::CONFIG_STORE, method);
        Ok(role.with_rpc(RpcCapability::new(&resource)?))
    })
}

/// Seed default roles, protected RPC baselines and the admin group
pub async fn seed_policy(manager: &AuthorizationManager, config: &AuthServiceConfig) -> Result<()> {
    manager
        .create_or_merge_role(config_store_role(DEFAULT_ROLE, &DEFAULT_ROLE_METHODS)?)
        .await?;
    manager
        .create_or_merge_role(config_store_role(SYNC_ROLE, &SYNC_ROLE_METHODS)?)
        .await?;
    manager
        .create_or_merge_role(
            RoleUpdate::new(ADMIN_ROLE)
                .with_rpc(RpcCapability::new("/.*/")?)
                .with_pubsub(PubsubCapability::new("/.*/", TopicAccess::Pubsub)?),
        )
        .await?;

    for identity in &config.reserved_identities {
        let update = AgentAuthzUpdate::new(identity).with_comments(BOOTSTRAP_COMMENT);
        let update = if *identity == config.auth_identity {
            update.with_protected_rpcs(AUTH_PROTECTED_RPCS)
        } else if identity == identities::CONFIG_STORE {
            update.with_protected_rpcs(CONFIG_STORE_PROTECTED_RPCS)
        } else {
            update
        };
        manager.create_or_merge_agent_authz(update).await?;
    }

    manager
        .create_or_merge_agent_group(
            GroupUpdate::new(ADMIN_GROUP)
                .with_members(config.reserved_identities.iter().cloned())
                .with_role(AgentRole::new(ADMIN_ROLE)),
        )
        .await?;

    info!(
        reserved = config.reserved_identities.len(),
        "Seeded default authorization policy"
    );
    Ok(())
}

/// Authorization for an agent provisioned for the first time: the default
/// role bound to its own identity.
pub fn new_agent_authz(identity: &str) -> Result<AgentAuthzUpdate> {
    Ok(AgentAuthzUpdate::new(identity)
        .with_role(AgentRole::new(DEFAULT_ROLE).with_param("identity", identity)?)
        .with_protected_rpcs(NEW_AGENT_PROTECTED_RPCS)
        .with_comments(NEW_AGENT_COMMENT))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeding_twice_converges() {
        let manager = AuthorizationManager::in_memory().await.unwrap();
        let config = AuthServiceConfig::default();

        seed_policy(&manager, &config).await.unwrap();
        let first = manager.snapshot().await;
        seed_policy(&manager, &config).await.unwrap();

        assert_eq!(manager.snapshot().await, first);
        assert_eq!(first.roles.len(), 3);
        assert_eq!(first.agent_groups[ADMIN_GROUP].identities.len(), 6);
        assert_eq!(first.agents[identities::AUTH].protected_rpcs.len(), 12);
        assert!(first.agents[identities::PLATFORM].protected_rpcs.is_empty());
    }

    #[test]
    fn test_new_agent_role_is_self_scoped() {
        let update = new_agent_authz("agent1").unwrap();
        assert_eq!(update.agent_roles.len(), 1);
        assert_eq!(update.agent_roles[0].param_restrictions.len(), 1);
        assert!(update.protected_rpcs.contains("rpc.add_protected_rpcs"));
    }
}
