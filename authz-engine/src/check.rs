use crate::{
    models::*,
    resolve::CapabilityResolver,
    store::AuthzMap,
};
use serde_json::{Map, Value};
use tracing::debug;

/// Permission checker answers authorization queries against one policy
/// snapshot. Two default-open gates apply before any capability is resolved:
/// - an RPC is only checked if its target lists it as protected
/// - a topic is only checked if it matches a bus-wide protected pattern
pub struct PermissionChecker<'a> {
    policy: &'a AuthzMap,
}

impl<'a> PermissionChecker<'a> {
    pub fn new(policy: &'a AuthzMap) -> Self {
        Self { policy }
    }

    /// Check if `identity` may call `method_name` (`<target>.<method>`) with
    /// `method_args`
    pub fn check_rpc(&self, identity: &str, method_name: &str, method_args: &Map<String, Value>) -> bool {
        if !self.policy.is_protected_rpc(method_name) {
            debug!("{} is not protected, allowing {}", method_name, identity);
            return true;
        }

        let effective = CapabilityResolver::new(self.policy).resolve(identity);
        let allowed = effective
            .rpc_capabilities
            .iter()
            .any(|capability| capability.permits(method_name, method_args));

        debug!(identity, method_name, allowed, "RPC authorization check");
        allowed
    }

    /// Check if `identity` may access `topic` in mode `access`
    pub fn check_pubsub(&self, identity: &str, topic: &str, access: TopicAccess) -> bool {
        if !self.policy.is_protected_topic(topic) {
            debug!("{} is not a protected topic, allowing {}", topic, identity);
            return true;
        }

        let effective = CapabilityResolver::new(self.policy).resolve(identity);
        let allowed = effective
            .pubsub_capabilities
            .iter()
            .any(|capability| capability.permits(topic, access));

        debug!(identity, topic, %access, allowed, "Pubsub authorization check");
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pattern::ResourcePattern;
    use serde_json::json;

    fn no_args() -> Map<String, Value> {
        Map::new()
    }

    #[test]
    fn test_unprotected_methods_are_open() {
        let policy = AuthzMap::new();
        let checker = PermissionChecker::new(&policy);
        assert!(checker.check_rpc("anyone", "x.anything", &no_args()));
    }

    #[test]
    fn test_protected_method_needs_capability() {
        let mut policy = AuthzMap::new();
        policy
            .create_or_merge_agent_authz(AgentAuthzUpdate::new("x").with_protected_rpcs(["m"]))
            .unwrap();
        assert!(!PermissionChecker::new(&policy).check_rpc("x", "x.m", &no_args()));
        // Other methods of the same target stay open.
        assert!(PermissionChecker::new(&policy).check_rpc("x", "x.other", &no_args()));

        policy
            .create_or_merge_agent_authz(AgentAuthzUpdate::new("x").with_rpc(RpcCapability::new("/x\\.m/").unwrap()))
            .unwrap();
        assert!(PermissionChecker::new(&policy).check_rpc("x", "x.m", &no_args()));
    }

    #[test]
    fn test_param_restricted_grant() {
        let mut policy = AuthzMap::new();
        policy
            .create_or_merge_agent_authz(AgentAuthzUpdate::new("config.store").with_protected_rpcs(["set_config"]))
            .unwrap();
        policy
            .create_or_merge_agent_authz(
                AgentAuthzUpdate::new("a1").with_rpc(
                    RpcCapability::new("config.store.set_config")
                        .unwrap()
                        .with_param("identity", "a1")
                        .unwrap(),
                ),
            )
            .unwrap();

        let checker = PermissionChecker::new(&policy);
        let own = json!({"identity": "a1", "config_name": "c"});
        let other = json!({"identity": "a2", "config_name": "c"});
        assert!(checker.check_rpc("a1", "config.store.set_config", own.as_object().unwrap()));
        assert!(!checker.check_rpc("a1", "config.store.set_config", other.as_object().unwrap()));
    }

    #[test]
    fn test_protected_topics_gate() {
        let mut policy = AuthzMap::new();
        policy.create_protected_topics(vec![ResourcePattern::parse("/devices/[a-z]*$/").unwrap()]);
        policy
            .create_or_merge_agent_authz(
                AgentAuthzUpdate::new("test_agent")
                    .with_pubsub(PubsubCapability::new("/devices/[a-z]*$/", TopicAccess::Publish).unwrap()),
            )
            .unwrap();

        let checker = PermissionChecker::new(&policy);
        assert!(!policy.is_protected_topic("devices/12323"));
        assert!(!policy.is_protected_topic("devices/ABC"));
        assert!(policy.is_protected_topic("devices/building"));
        assert!(policy.is_protected_topic("devices/"));

        assert!(checker.check_pubsub("test_agent", "foo", TopicAccess::Publish));
        assert!(checker.check_pubsub("test_agent", "foo", TopicAccess::Subscribe));
        assert!(checker.check_pubsub("test_agent", "devices/building", TopicAccess::Publish));
        assert!(!checker.check_pubsub("test_agent", "devices/building", TopicAccess::Subscribe));
        assert!(!checker.check_pubsub("someone_else", "devices/building", TopicAccess::Publish));
    }
}
