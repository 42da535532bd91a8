use crate::{
    models::*,
    store::{union_into, AuthzMap},
};
use tracing::{debug, warn};

/// Resolves the effective capabilities of an identity:
/// - direct capabilities on its record
/// - capabilities of each assigned role, with assignment restrictions merged in
/// - capabilities of every group it belongs to, and of the groups' roles
///
/// Nothing is cached; every call reads the policy it is given.
pub struct CapabilityResolver<'a> {
    policy: &'a AuthzMap,
}

impl<'a> CapabilityResolver<'a> {
    pub fn new(policy: &'a AuthzMap) -> Self {
        Self { policy }
    }

    pub fn resolve(&self, identity: &str) -> EffectiveCapabilities {
        let mut effective = EffectiveCapabilities::default();

        if let Some(record) = self.policy.agents.get(identity) {
            union_into(&mut effective.rpc_capabilities, record.rpc_capabilities.iter().cloned());
            union_into(&mut effective.pubsub_capabilities, record.pubsub_capabilities.iter().cloned());
            self.apply_roles(&mut effective, &record.agent_roles);
        }

        let groups = self
            .policy
            .agent_groups
            .values()
            .filter(|group| group.identities.contains(identity));
        for group in groups {
            debug!("{} inherits from group {}", identity, group.name);
            union_into(&mut effective.rpc_capabilities, group.rpc_capabilities.iter().cloned());
            union_into(&mut effective.pubsub_capabilities, group.pubsub_capabilities.iter().cloned());
            self.apply_roles(&mut effective, &group.agent_roles);
        }

        effective
    }

    fn apply_roles(&self, effective: &mut EffectiveCapabilities, assignments: &[AgentRole]) {
        for assignment in assignments {
            let Some(role) = self.policy.roles.get(&assignment.role_name) else {
                // Removal cascades, so this only happens with a hand-edited policy file.
                warn!("Skipping unknown role {}", assignment.role_name);
                continue;
            };

            union_into(
                &mut effective.rpc_capabilities,
                role.rpc_capabilities
                    .iter()
                    .map(|capability| capability.restricted_by(&assignment.param_restrictions)),
            );
            union_into(&mut effective.pubsub_capabilities, role.pubsub_capabilities.iter().cloned());
        }
    }
}
