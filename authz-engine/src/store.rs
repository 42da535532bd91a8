//! Policy store: roles, agent groups, per-identity records and the bus-wide
//! protected topics, with additive merge semantics.
//!
//! [`AuthzMap`] is the plain data and its merge rules. [`PolicyStore`] wraps
//! it in a store-wide lock and a [`PolicyRepository`]: a mutation runs
//! against a copy, the copy is persisted if anything changed, and only then
//! replaces the live map. Readers therefore see either the old or the new
//! policy.

use crate::{
    error::{validate_name, PolicyError, Result},
    models::*,
    pattern::ResourcePattern,
    repository::PolicyRepository,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::{RwLock, RwLockReadGuard};
use tracing::{debug, info};

/// Push each item not already present. Returns whether anything was added.
pub(crate) fn union_into<T: PartialEq>(target: &mut Vec<T>, items: impl IntoIterator<Item = T>) -> bool {
    let mut changed = false;
    for item in items {
        if !target.contains(&item) {
            target.push(item);
            changed = true;
        }
    }
    changed
}

/// The complete authorization policy
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthzMap {
    #[serde(default)]
    pub roles: BTreeMap<String, Role>,
    #[serde(default)]
    pub agent_groups: BTreeMap<String, AgentGroup>,
    #[serde(default)]
    pub agents: BTreeMap<Identity, AgentAuthorization>,
    #[serde(default)]
    pub protected_topics: Vec<ResourcePattern>,
}

impl AuthzMap {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_roles_exist(&self, agent_roles: &[AgentRole]) -> Result<()> {
        for assignment in agent_roles {
            if !self.roles.contains_key(&assignment.role_name) {
                return Err(PolicyError::RoleNotFound(assignment.role_name.clone()));
            }
        }
        Ok(())
    }

    pub fn create_or_merge_role(&mut self, update: RoleUpdate) -> Result<bool> {
        validate_name("role name", &update.name)?;

        let mut created = false;
        let role = self.roles.entry(update.name.clone()).or_insert_with(|| {
            created = true;
            Role {
                name: update.name.clone(),
                ..Default::default()
            }
        });

        let rpc_changed = union_into(&mut role.rpc_capabilities, update.rpc_capabilities);
        let pubsub_changed = union_into(&mut role.pubsub_capabilities, update.pubsub_capabilities);
        Ok(created || rpc_changed || pubsub_changed)
    }

    pub fn create_or_merge_agent_group(&mut self, update: GroupUpdate) -> Result<bool> {
        validate_name("group name", &update.name)?;
        for identity in &update.identities {
            validate_name("identity", identity)?;
        }
        self.ensure_roles_exist(&update.agent_roles)?;

        let mut created = false;
        let group = self.agent_groups.entry(update.name.clone()).or_insert_with(|| {
            created = true;
            AgentGroup {
                name: update.name.clone(),
                ..Default::default()
            }
        });

        let before = group.identities.len();
        group.identities.extend(update.identities);
        let members_changed = group.identities.len() != before;
        let roles_changed = union_into(&mut group.agent_roles, update.agent_roles);
        let rpc_changed = union_into(&mut group.rpc_capabilities, update.rpc_capabilities);
        let pubsub_changed = union_into(&mut group.pubsub_capabilities, update.pubsub_capabilities);

        Ok(created || members_changed || roles_changed || rpc_changed || pubsub_changed)
    }

    pub fn create_or_merge_agent_authz(&mut self, update: AgentAuthzUpdate) -> Result<(AuthzChange, bool)> {
        validate_name("identity", &update.identity)?;
        self.ensure_roles_exist(&update.agent_roles)?;

        let mut created = false;
        let record = self.agents.entry(update.identity.clone()).or_insert_with(|| {
            created = true;
            AgentAuthorization {
                identity: update.identity.clone(),
                ..Default::default()
            }
        });

        let before = record.protected_rpcs.len();
        record.protected_rpcs.extend(update.protected_rpcs);
        let protected_rpcs_changed = record.protected_rpcs.len() != before;

        let roles_changed = union_into(&mut record.agent_roles, update.agent_roles);
        let rpc_changed = union_into(&mut record.rpc_capabilities, update.rpc_capabilities);
        let pubsub_changed = union_into(&mut record.pubsub_capabilities, update.pubsub_capabilities);

        // Comments are last-write-wins, unlike every other field.
        let mut comments_changed = false;
        if let Some(comments) = update.comments {
            comments_changed = record.comments.as_deref() != Some(comments.as_str());
            record.comments = Some(comments);
        }

        let change = AuthzChange {
            identity: record.identity.clone(),
            protected_rpcs_changed,
            protected_rpcs: record.protected_rpcs.clone(),
        };
        let changed = created
            || protected_rpcs_changed
            || roles_changed
            || rpc_changed
            || pubsub_changed
            || comments_changed;
        Ok((change, changed))
    }

    pub fn add_agents_to_group(&mut self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        validate_name("group name", name)?;
        for identity in identities {
            validate_name("identity", identity)?;
        }
        let group = self
            .agent_groups
            .get_mut(name)
            .ok_or_else(|| PolicyError::GroupNotFound(name.to_string()))?;

        let before = group.identities.len();
        group.identities.extend(identities.iter().cloned());
        Ok(group.identities.len() != before)
    }

    pub fn remove_agents_from_group(&mut self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        validate_name("group name", name)?;
        let group = self
            .agent_groups
            .get_mut(name)
            .ok_or_else(|| PolicyError::GroupNotFound(name.to_string()))?;

        let before = group.identities.len();
        group.identities.retain(|member| !identities.contains(member));
        Ok(group.identities.len() != before)
    }

    /// Remove a role and unassign it from every agent record and group.
    pub fn remove_role(&mut self, name: &str) -> Result<()> {
        validate_name("role name", name)?;
        if self.roles.remove(name).is_none() {
            return Err(PolicyError::RoleNotFound(name.to_string()));
        }

        for record in self.agents.values_mut() {
            record.agent_roles.retain(|assignment| assignment.role_name != name);
        }
        for group in self.agent_groups.values_mut() {
            group.agent_roles.retain(|assignment| assignment.role_name != name);
        }
        Ok(())
    }

    /// Remove a group. Member agent records are left as they are.
    pub fn remove_agent_group(&mut self, name: &str) -> Result<()> {
        validate_name("group name", name)?;
        self.agent_groups
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| PolicyError::GroupNotFound(name.to_string()))
    }

    /// Remove an identity's record and its membership in every group, so a
    /// removed agent keeps no group-derived capabilities. Fails only when the
    /// identity is neither on record nor a group member.
    pub fn remove_agent_authorization(&mut self, identity: &str) -> Result<()> {
        validate_name("identity", identity)?;
        let had_record = self.agents.remove(identity).is_some();

        let mut had_membership = false;
        for group in self.agent_groups.values_mut() {
            if group.identities.remove(identity) {
                debug!("Dropped {} from group {}", identity, group.name);
                had_membership = true;
            }
        }

        if had_record || had_membership {
            Ok(())
        } else {
            Err(PolicyError::AgentNotFound(identity.to_string()))
        }
    }

    pub fn create_protected_topics(&mut self, patterns: Vec<ResourcePattern>) -> bool {
        union_into(&mut self.protected_topics, patterns)
    }

    pub fn remove_protected_topics(&mut self, patterns: &[ResourcePattern]) -> bool {
        let before = self.protected_topics.len();
        self.protected_topics.retain(|pattern| !patterns.contains(pattern));
        self.protected_topics.len() != before
    }

    pub fn is_protected_topic(&self, topic: &str) -> bool {
        self.protected_topics.iter().any(|pattern| pattern.matches(topic))
    }

    pub fn protected_rpcs(&self, identity: &str) -> BTreeSet<String> {
        self.agents
            .get(identity)
            .map(|record| record.protected_rpcs.clone())
            .unwrap_or_default()
    }

    /// Whether `method_name` (`<identity>.<method>`) is protected by its
    /// target. Identities may contain dots, so every split point is tried.
    pub fn is_protected_rpc(&self, method_name: &str) -> bool {
        method_name.match_indices('.').any(|(index, _)| {
            let (target, method) = (&method_name[..index], &method_name[index + 1..]);
            self.agents
                .get(target)
                .map_or(false, |record| record.protected_rpcs.contains(method))
        })
    }
}

/// Lock-guarded policy with write-through persistence
pub struct PolicyStore {
    state: RwLock<AuthzMap>,
    repository: Arc<dyn PolicyRepository>,
}

impl PolicyStore {
    /// Load the persisted policy from `repository`.
    pub async fn open(repository: Arc<dyn PolicyRepository>) -> Result<Self> {
        let map = repository.load().await?;
        info!(
            roles = map.roles.len(),
            groups = map.agent_groups.len(),
            agents = map.agents.len(),
            "Loaded authorization policy"
        );
        Ok(Self {
            state: RwLock::new(map),
            repository,
        })
    }

    /// Shared view of the current policy. Hold it for the duration of one
    /// decision so the decision sees a single consistent policy.
    pub async fn read(&self) -> RwLockReadGuard<'_, AuthzMap> {
        self.state.read().await
    }

    /// Apply `mutation` atomically. The closure returns its value and whether
    /// it changed anything; unchanged policies are not re-persisted.
    pub async fn mutate<R, F>(&self, mutation: F) -> Result<R>
    where
        F: FnOnce(&mut AuthzMap) -> Result<(R, bool)>,
    {
        let mut guard = self.state.write().await;
        let mut next = guard.clone();
        let (value, changed) = mutation(&mut next)?;

        if changed {
            self.repository.save(&next).await?;
            *guard = next;
        } else {
            debug!("Policy mutation was a no-op");
        }
        Ok(value)
    }

    pub async fn snapshot(&self) -> AuthzMap {
        self.state.read().await.clone()
    }
}
