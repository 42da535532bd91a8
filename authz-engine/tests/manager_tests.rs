//! Integration tests for the authorization manager
//!
//! Scenarios covered:
//! 1. Default-open RPCs for identities without a protected set
//! 2. Protected method denied until a literal or regex grant exists
//! 3. Role removal strips only that role's capabilities
//! 4. Group membership and group role assignments
//! 5. Protected topic gate with publish-only grants
//! 6. Persistence through the file repository

use authz_engine::*;
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

async fn create_test_manager() -> AuthorizationManager {
    AuthorizationManager::in_memory().await.unwrap()
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn members(identities: &[&str]) -> BTreeSet<String> {
    identities.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_unprotected_identity_is_open() {
    let manager = create_test_manager().await;
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("open.agent").with_comments("no protected methods"))
        .await
        .unwrap();

    for method in ["open.agent.anything", "open.agent.set_point", "never.seen.method"] {
        assert!(
            manager.check_rpc_authorization("nobody", method, &Map::new()).await.unwrap(),
            "{} should be open",
            method
        );
    }
    assert!(manager.get_protected_rpcs("never.seen").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_protected_method_requires_grant() {
    let manager = create_test_manager().await;
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("x").with_protected_rpcs(["m"]))
        .await
        .unwrap();

    assert!(!manager.check_rpc_authorization("x", "x.m", &Map::new()).await.unwrap());

    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("x").with_rpc(RpcCapability::new("x.m").unwrap()))
        .await
        .unwrap();
    assert!(manager.check_rpc_authorization("x", "x.m", &Map::new()).await.unwrap());

    // A regex grant works the same way for a different caller.
    assert!(!manager.check_rpc_authorization("y", "x.m", &Map::new()).await.unwrap());
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("y").with_rpc(RpcCapability::new("/x\\..*/").unwrap()))
        .await
        .unwrap();
    assert!(manager.check_rpc_authorization("y", "x.m", &Map::new()).await.unwrap());
}

#[tokio::test]
async fn test_role_assignment_restrictions_bind_identity() {
    let manager = create_test_manager().await;
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("config.store").with_protected_rpcs(["set_config"]))
        .await
        .unwrap();
    manager
        .create_or_merge_role(
            RoleUpdate::new("default_rpc_capabilities").with_rpc(RpcCapability::new("config.store.set_config").unwrap()),
        )
        .await
        .unwrap();
    manager
        .create_or_merge_agent_authz(
            AgentAuthzUpdate::new("agent1")
                .with_role(AgentRole::new("default_rpc_capabilities").with_param("identity", "agent1").unwrap()),
        )
        .await
        .unwrap();

    let own = args(json!({"identity": "agent1", "config_name": "c", "raw_contents": "{}"}));
    let foreign = args(json!({"identity": "agent2", "config_name": "c", "raw_contents": "{}"}));
    assert!(manager.check_rpc_authorization("agent1", "config.store.set_config", &own).await.unwrap());
    assert!(!manager.check_rpc_authorization("agent1", "config.store.set_config", &foreign).await.unwrap());
    assert!(!manager.check_rpc_authorization("agent1", "config.store.set_config", &Map::new()).await.unwrap());
}

#[tokio::test]
async fn test_removing_role_keeps_other_grants() {
    let manager = create_test_manager().await;
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("svc").with_protected_rpcs(["a", "b", "c"]))
        .await
        .unwrap();
    manager
        .create_or_merge_role(RoleUpdate::new("role_a").with_rpc(RpcCapability::new("svc.a").unwrap()))
        .await
        .unwrap();
    manager
        .create_or_merge_role(RoleUpdate::new("role_b").with_rpc(RpcCapability::new("svc.b").unwrap()))
        .await
        .unwrap();
    manager
        .create_or_merge_agent_authz(
            AgentAuthzUpdate::new("caller")
                .with_role(AgentRole::new("role_a"))
                .with_role(AgentRole::new("role_b"))
                .with_rpc(RpcCapability::new("svc.c").unwrap()),
        )
        .await
        .unwrap();

    manager.remove_role("role_a").await.unwrap();

    let no_args = Map::new();
    assert!(!manager.check_rpc_authorization("caller", "svc.a", &no_args).await.unwrap());
    assert!(manager.check_rpc_authorization("caller", "svc.b", &no_args).await.unwrap());
    assert!(manager.check_rpc_authorization("caller", "svc.c", &no_args).await.unwrap());

    let err = manager.remove_role("role_a").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_group_capabilities_follow_membership() {
    let manager = create_test_manager().await;
    manager
        .create_or_merge_role(RoleUpdate::new("admin").with_rpc(RpcCapability::new("/.*/").unwrap()))
        .await
        .unwrap();
    manager
        .create_or_merge_agent_group(GroupUpdate::new("admin_users").with_role(AgentRole::new("admin")))
        .await
        .unwrap();
    manager
        .create_or_merge_agent_authz(AgentAuthzUpdate::new("vault").with_protected_rpcs(["open"]))
        .await
        .unwrap();

    assert!(!manager.check_rpc_authorization("ops", "vault.open", &Map::new()).await.unwrap());

    manager.add_agents_to_group("admin_users", &members(&["ops"])).await.unwrap();
    assert!(manager.check_rpc_authorization("ops", "vault.open", &Map::new()).await.unwrap());
    assert_eq!(manager.get_agent_capabilities("ops").await.unwrap().rpc_capabilities.len(), 1);

    // Removing a stranger is a no-op, not an error.
    assert!(manager.remove_agents_from_group("admin_users", &members(&["nobody"])).await.unwrap());

    manager.remove_agents_from_group("admin_users", &members(&["ops"])).await.unwrap();
    assert!(!manager.check_rpc_authorization("ops", "vault.open", &Map::new()).await.unwrap());

    manager.remove_agent_group("admin_users").await.unwrap();
    assert!(matches!(
        manager.add_agents_to_group("admin_users", &members(&["ops"])).await,
        Err(PolicyError::GroupNotFound(_))
    ));
    // The member's own record survives group removal.
    assert_eq!(manager.get_protected_rpcs("vault").await.unwrap(), members(&["open"]));
}

#[tokio::test]
async fn test_protected_topic_gate() {
    let manager = create_test_manager().await;
    manager
        .create_protected_topics(&["/devices/[a-z]*$/".to_string()])
        .await
        .unwrap();
    manager
        .create_or_merge_agent_authz(
            AgentAuthzUpdate::new("test_agent")
                .with_pubsub(PubsubCapability::new("/devices/[a-z]*$/", TopicAccess::Publish).unwrap()),
        )
        .await
        .unwrap();

    for topic in ["devices/12323", "devices/ABC", "foo"] {
        assert!(!manager.is_protected_topic(topic).await.unwrap());
        assert!(manager
            .check_pubsub_authorization("test_agent", topic, TopicAccess::Subscribe)
            .await
            .unwrap());
    }

    assert!(manager.is_protected_topic("devices/building").await.unwrap());
    assert!(manager.is_protected_topic("devices/").await.unwrap());
    assert!(manager
        .check_pubsub_authorization("test_agent", "devices/building", TopicAccess::Publish)
        .await
        .unwrap());
    assert!(!manager
        .check_pubsub_authorization("test_agent", "devices/building", TopicAccess::Subscribe)
        .await
        .unwrap());

    manager
        .create_or_merge_agent_authz(
            AgentAuthzUpdate::new("test_agent")
                .with_pubsub(PubsubCapability::new("/devices/[a-z]*$/", TopicAccess::Pubsub).unwrap()),
        )
        .await
        .unwrap();
    assert!(manager
        .check_pubsub_authorization("test_agent", "devices/building", TopicAccess::Subscribe)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_invalid_pattern_is_rejected_not_downgraded() {
    let err = RpcCapability::new("/[unclosed/").unwrap_err();
    assert!(matches!(err, PolicyError::InvalidPattern { .. }));

    let pattern = ResourcePattern::parse("/.*/").unwrap();
    assert!(pattern.matches("anything.at.all"));
    assert!(pattern.matches(""));

    let literal = ResourcePattern::parse("literal").unwrap();
    assert!(literal.matches("literal"));
    assert!(!literal.matches("literal2"));
    assert!(!literal.matches("Literal"));
}

#[tokio::test]
async fn test_policy_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("authz.json");

    {
        let manager = AuthorizationManager::new(Arc::new(FilePolicyRepository::new(&path)))
            .await
            .unwrap();
        manager
            .create_or_merge_role(RoleUpdate::new("admin").with_rpc(RpcCapability::new("/.*/").unwrap()))
            .await
            .unwrap();
        manager
            .create_or_merge_agent_authz(
                AgentAuthzUpdate::new("platform.auth")
                    .with_protected_rpcs(["create_agent"])
                    .with_role(AgentRole::new("admin")),
            )
            .await
            .unwrap();
    }

    let reopened = AuthorizationManager::new(Arc::new(FilePolicyRepository::new(&path)))
        .await
        .unwrap();
    assert_eq!(
        reopened.get_protected_rpcs("platform.auth").await.unwrap(),
        members(&["create_agent"])
    );
    assert!(reopened
        .check_rpc_authorization("platform.auth", "platform.auth.create_agent", &Map::new())
        .await
        .unwrap());
}
