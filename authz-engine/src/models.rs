use crate::error::{PolicyError, Result};
use crate::pattern::{is_regex_form, ResourcePattern};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Unique name of one agent on the bus
pub type Identity = String;

/// Argument name → required value
pub type ParamRestrictions = BTreeMap<String, ParamValue>;

/// Required value of one call argument.
///
/// Strings in the `/regex/` form are compiled when the restriction is built
/// and must match the whole (string) argument; everything else is compared
/// by JSON equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub enum ParamValue {
    Exact(Value),
    Pattern(ResourcePattern),
}

impl ParamValue {
    pub fn new(value: impl Into<Value>) -> Result<Self> {
        Self::try_from(value.into())
    }

    pub fn accepts(&self, argument: &Value) -> bool {
        match self {
            Self::Exact(expected) => expected == argument,
            Self::Pattern(pattern) => argument.as_str().map_or(false, |s| pattern.matches(s)),
        }
    }
}

impl TryFrom<Value> for ParamValue {
    type Error = PolicyError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::String(ref s) if is_regex_form(s) => Ok(Self::Pattern(ResourcePattern::parse(s)?)),
            other => Ok(Self::Exact(other)),
        }
    }
}

impl From<ParamValue> for Value {
    fn from(value: ParamValue) -> Self {
        match value {
            ParamValue::Exact(v) => v,
            ParamValue::Pattern(p) => Value::String(p.into()),
        }
    }
}

/// Permission to call methods matching `resource`, optionally only with
/// particular argument values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcCapability {
    pub resource: ResourcePattern,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub param_restrictions: ParamRestrictions,
    /// Assignment restrictions on arguments the capability already
    /// restricts differently. Both values must accept the argument.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub assignment_restrictions: ParamRestrictions,
}

impl RpcCapability {
    pub fn new(resource: &str) -> Result<Self> {
        Ok(Self {
            resource: ResourcePattern::parse(resource)?,
            param_restrictions: BTreeMap::new(),
            assignment_restrictions: BTreeMap::new(),
        })
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.param_restrictions.insert(name.to_string(), ParamValue::new(value)?);
        Ok(self)
    }

    /// Copy of this capability further constrained by `extra`. An argument
    /// restricted by both must satisfy both, so the result never permits a
    /// call the capability alone would refuse.
    pub fn restricted_by(&self, extra: &ParamRestrictions) -> Self {
        let mut capability = self.clone();
        for (name, value) in extra {
            match capability.param_restrictions.get(name) {
                None => {
                    capability.param_restrictions.insert(name.clone(), value.clone());
                }
                Some(existing) if existing == value => {}
                Some(_) => {
                    capability.assignment_restrictions.insert(name.clone(), value.clone());
                }
            }
        }
        capability
    }

    pub fn permits(&self, method_name: &str, method_args: &Map<String, Value>) -> bool {
        if !self.resource.matches(method_name) {
            return false;
        }

        self.param_restrictions
            .iter()
            .chain(&self.assignment_restrictions)
            .all(|(name, required)| {
                method_args
                    .get(name)
                    .map_or(false, |actual| required.accepts(actual))
            })
    }
}

/// Publish/subscribe access mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopicAccess {
    Publish,
    Subscribe,
    Pubsub,
}

impl TopicAccess {
    /// Whether a grant of `self` covers a request for `requested`.
    pub fn grants(self, requested: TopicAccess) -> bool {
        self == TopicAccess::Pubsub || self == requested
    }
}

impl fmt::Display for TopicAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Publish => "publish",
            Self::Subscribe => "subscribe",
            Self::Pubsub => "pubsub",
        };
        f.write_str(name)
    }
}

impl FromStr for TopicAccess {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "publish" => Ok(Self::Publish),
            "subscribe" => Ok(Self::Subscribe),
            "pubsub" => Ok(Self::Pubsub),
            other => Err(PolicyError::InvalidArgument(format!("Unknown topic access: {}", other))),
        }
    }
}

/// Permission to publish and/or subscribe on topics matching `topic_pattern`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PubsubCapability {
    pub topic_pattern: ResourcePattern,
    pub topic_access: TopicAccess,
}

impl PubsubCapability {
    pub fn new(topic_pattern: &str, topic_access: TopicAccess) -> Result<Self> {
        Ok(Self {
            topic_pattern: ResourcePattern::parse(topic_pattern)?,
            topic_access,
        })
    }

    pub fn permits(&self, topic: &str, access: TopicAccess) -> bool {
        self.topic_access.grants(access) && self.topic_pattern.matches(topic)
    }
}

/// Named, reusable bundle of capabilities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
}

/// A role applied to an agent or group, with assignment-local restrictions
/// (e.g. `identity = <self>`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRole {
    pub role_name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub param_restrictions: ParamRestrictions,
}

impl AgentRole {
    pub fn new(role_name: &str) -> Self {
        Self {
            role_name: role_name.to_string(),
            param_restrictions: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.param_restrictions.insert(name.to_string(), ParamValue::new(value)?);
        Ok(self)
    }
}

/// Named set of identities sharing role assignments and capabilities
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentGroup {
    pub name: String,
    #[serde(default)]
    pub identities: BTreeSet<Identity>,
    #[serde(default)]
    pub agent_roles: Vec<AgentRole>,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
}

/// Per-identity authorization record
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgentAuthorization {
    pub identity: Identity,
    /// Methods of this agent that require a capability; everything else is open
    #[serde(default)]
    pub protected_rpcs: BTreeSet<String>,
    #[serde(default)]
    pub agent_roles: Vec<AgentRole>,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comments: Option<String>,
}

/// Resolved capabilities of one identity: direct, role-derived and
/// group-derived
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectiveCapabilities {
    pub rpc_capabilities: Vec<RpcCapability>,
    pub pubsub_capabilities: Vec<PubsubCapability>,
}

impl EffectiveCapabilities {
    pub fn is_empty(&self) -> bool {
        self.rpc_capabilities.is_empty() && self.pubsub_capabilities.is_empty()
    }
}

/// Merge request for a role
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoleUpdate {
    pub name: String,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
}

impl RoleUpdate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_rpc(mut self, capability: RpcCapability) -> Self {
        self.rpc_capabilities.push(capability);
        self
    }

    pub fn with_pubsub(mut self, capability: PubsubCapability) -> Self {
        self.pubsub_capabilities.push(capability);
        self
    }
}

/// Merge request for an agent group
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub name: String,
    #[serde(default)]
    pub identities: BTreeSet<Identity>,
    #[serde(default)]
    pub agent_roles: Vec<AgentRole>,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
}

impl GroupUpdate {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_members<I, S>(mut self, identities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.identities.extend(identities.into_iter().map(Into::into));
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.agent_roles.push(role);
        self
    }

    pub fn with_rpc(mut self, capability: RpcCapability) -> Self {
        self.rpc_capabilities.push(capability);
        self
    }

    pub fn with_pubsub(mut self, capability: PubsubCapability) -> Self {
        self.pubsub_capabilities.push(capability);
        self
    }
}

/// Merge request for a per-identity authorization record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentAuthzUpdate {
    pub identity: Identity,
    #[serde(default)]
    pub protected_rpcs: BTreeSet<String>,
    #[serde(default)]
    pub agent_roles: Vec<AgentRole>,
    #[serde(default)]
    pub rpc_capabilities: Vec<RpcCapability>,
    #[serde(default)]
    pub pubsub_capabilities: Vec<PubsubCapability>,
    /// Replaces the stored comment when present
    #[serde(default)]
    pub comments: Option<String>,
}

impl AgentAuthzUpdate {
    pub fn new(identity: &str) -> Self {
        Self {
            identity: identity.to_string(),
            ..Default::default()
        }
    }

    pub fn with_protected_rpcs<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.protected_rpcs.extend(methods.into_iter().map(Into::into));
        self
    }

    pub fn with_role(mut self, role: AgentRole) -> Self {
        self.agent_roles.push(role);
        self
    }

    pub fn with_rpc(mut self, capability: RpcCapability) -> Self {
        self.rpc_capabilities.push(capability);
        self
    }

    pub fn with_pubsub(mut self, capability: PubsubCapability) -> Self {
        self.pubsub_capabilities.push(capability);
        self
    }

    pub fn with_comments(mut self, comments: &str) -> Self {
        self.comments = Some(comments.to_string());
        self
    }
}

/// Outcome of merging an agent authorization record
#[derive(Debug, Clone, PartialEq)]
pub struct AuthzChange {
    pub identity: Identity,
    pub protected_rpcs_changed: bool,
    /// Protected set after the merge
    pub protected_rpcs: BTreeSet<String>,
}
