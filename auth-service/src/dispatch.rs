//! Remotely callable methods of the auth service
//!
//! [`METHODS`] is the complete, fixed table of operations other agents may
//! call. Each handler decodes named JSON arguments into a typed request,
//! runs the operation and encodes the result as JSON. Caller authorization
//! happens once in [`AuthService::handle`], against the auth identity's own
//! protected RPC set.

use crate::error::{Result, ServiceError};
use crate::service::AuthService;
use authz_engine::{AgentAuthzUpdate, GroupUpdate, Identity, RoleUpdate, TopicAccess};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use tracing::{debug, warn};

pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

pub type Handler = for<'a> fn(&'a AuthService, Value) -> HandlerFuture<'a>;

/// Method name → handler
pub static METHODS: &[(&str, Handler)] = &[
    ("create_agent", create_agent),
    ("remove_agent", remove_agent),
    ("get_agent_capabilities", get_agent_capabilities),
    ("get_protected_rpcs", get_protected_rpcs),
    ("check_rpc_authorization", check_rpc_authorization),
    ("check_pubsub_authorization", check_pubsub_authorization),
    ("create_or_merge_role", create_or_merge_role),
    ("remove_role", remove_role),
    ("create_or_merge_agent_group", create_or_merge_agent_group),
    ("remove_agent_group", remove_agent_group),
    ("add_agents_to_group", add_agents_to_group),
    ("remove_agents_from_group", remove_agents_from_group),
    ("create_or_merge_agent_authz", create_or_merge_agent_authz),
    ("remove_agent_authorization", remove_agent_authorization),
    ("create_protected_topics", create_protected_topics),
    ("remove_protected_topics", remove_protected_topics),
    ("is_protected_topic", is_protected_topic),
];

pub fn lookup(method: &str) -> Option<Handler> {
    METHODS
        .iter()
        .find(|(name, _)| *name == method)
        .map(|(_, handler)| *handler)
}

impl AuthService {
    /// Serve one remote call from the already-authenticated `caller`
    pub async fn handle(&self, caller: &str, method: &str, args: Value) -> Result<Value> {
        self.ensure_running()?;
        let handler = lookup(method).ok_or_else(|| ServiceError::MethodNotFound(method.to_string()))?;

        let method_name = format!("{}.{}", self.config().auth_identity, method);
        let no_args = Map::new();
        let method_args = args.as_object().unwrap_or(&no_args);
        if !self.check_rpc_authorization(caller, &method_name, method_args).await? {
            warn!(caller, method, "Denied remote call");
            return Err(ServiceError::AccessDenied {
                caller: caller.to_string(),
                method: method.to_string(),
            });
        }

        debug!(caller, method, "Dispatching remote call");
        handler(self, args).await
    }
}

fn decode<T: DeserializeOwned>(method: &str, args: Value) -> Result<T> {
    serde_json::from_value(args).map_err(|e| ServiceError::InvalidRequest {
        method: method.to_string(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(value: T) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| ServiceError::InternalError(e.into()))
}

// Request shapes

#[derive(Debug, Deserialize)]
struct IdentityRequest {
    identity: Identity,
}

#[derive(Debug, Deserialize)]
struct NameRequest {
    name: String,
}

#[derive(Debug, Deserialize)]
struct MembershipRequest {
    name: String,
    identities: BTreeSet<Identity>,
}

#[derive(Debug, Deserialize)]
struct RpcCheckRequest {
    identity: Identity,
    method_name: String,
    #[serde(default)]
    method_args: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct PubsubCheckRequest {
    identity: Identity,
    topic_pattern: String,
    access: TopicAccess,
}

#[derive(Debug, Deserialize)]
struct TopicsRequest {
    topic_name_patterns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TopicRequest {
    topic: String,
}

/// Defines a handler that decodes `$request` and evaluates `$call` with the
/// decoded request bound to `$req`.
macro_rules! handler {
    ($name:ident, $request:ty, |$service:ident, $req:ident| $call:expr) => {
        fn $name(service: &AuthService, args: Value) -> HandlerFuture<'_> {
            Box::pin(async move {
                let $req: $request = decode(stringify!($name), args)?;
                let $service = service;
                encode($call.await?)
            })
        }
    };
}

handler!(create_agent, IdentityRequest, |s, r| s.create_agent(&r.identity));
handler!(remove_agent, IdentityRequest, |s, r| s.remove_agent(&r.identity));
handler!(get_agent_capabilities, IdentityRequest, |s, r| s.get_agent_capabilities(&r.identity));
handler!(get_protected_rpcs, IdentityRequest, |s, r| s.get_protected_rpcs(&r.identity));
handler!(check_rpc_authorization, RpcCheckRequest, |s, r| s
    .check_rpc_authorization(&r.identity, &r.method_name, &r.method_args));
handler!(check_pubsub_authorization, PubsubCheckRequest, |s, r| s
    .check_pubsub_authorization(&r.identity, &r.topic_pattern, r.access));
handler!(create_or_merge_role, RoleUpdate, |s, r| s.create_or_merge_role(r));
handler!(remove_role, NameRequest, |s, r| s.remove_role(&r.name));
handler!(create_or_merge_agent_group, GroupUpdate, |s, r| s.create_or_merge_agent_group(r));
handler!(remove_agent_group, NameRequest, |s, r| s.remove_agent_group(&r.name));
handler!(add_agents_to_group, MembershipRequest, |s, r| s.add_agents_to_group(&r.name, &r.identities));
handler!(remove_agents_from_group, MembershipRequest, |s, r| s
    .remove_agents_from_group(&r.name, &r.identities));
handler!(create_or_merge_agent_authz, AgentAuthzUpdate, |s, r| s.create_or_merge_agent_authz(r));
handler!(remove_agent_authorization, IdentityRequest, |s, r| s.remove_agent_authorization(&r.identity));
handler!(create_protected_topics, TopicsRequest, |s, r| s.create_protected_topics(&r.topic_name_patterns));
handler!(remove_protected_topics, TopicsRequest, |s, r| s.remove_protected_topics(&r.topic_name_patterns));
handler!(is_protected_topic, TopicRequest, |s, r| s.is_protected_topic(&r.topic));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_has_unique_names() {
        let names: BTreeSet<&str> = METHODS.iter().map(|(name, _)| *name).collect();
        assert_eq!(names.len(), METHODS.len());
        assert_eq!(METHODS.len(), 17);
        assert!(lookup("create_agent").is_some());
        assert!(lookup("shutdown").is_none());
    }

    #[test]
    fn test_decode_reports_method() {
        let err = decode::<IdentityRequest>("create_agent", serde_json::json!({"name": "x"})).unwrap_err();
        match err {
            ServiceError::InvalidRequest { method, .. } => assert_eq!(method, "create_agent"),
            other => panic!("unexpected error: {}", other),
        }
    }
}
