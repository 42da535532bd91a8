//! Role and capability based authorization engine for the agent message bus
//!
//! This crate decides whether an already-authenticated agent identity may:
//! - call a remote procedure on another agent (optionally only with specific arguments)
//! - publish or subscribe on a bus topic
//!
//! # Core Concepts
//!
//! - **Capability**: a resource pattern (literal or `/regex/`) granting RPC or pubsub access
//! - **Role**: a named, reusable bundle of capabilities
//! - **Agent group**: a named set of identities sharing role assignments
//! - **Protected RPC**: a method its owner requires a capability for; everything else is open
//!
//! Every `create_or_merge_*` call is an additive union, so repeating a
//! mutation (for example during bootstrap after a crash) converges to the same
//! policy.
//!
//! # Example
//!
//! ```rust
//! use authz_engine::{AgentAuthzUpdate, AgentRole, AuthorizationManager, RoleUpdate, RpcCapability};
//! use serde_json::Map;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let manager = AuthorizationManager::in_memory().await?;
//!
//!     // The driver only lets capable callers use set_point
//!     manager
//!         .create_or_merge_agent_authz(AgentAuthzUpdate::new("platform.driver").with_protected_rpcs(["set_point"]))
//!         .await?;
//!
//!     manager
//!         .create_or_merge_role(RoleUpdate::new("operator").with_rpc(RpcCapability::new("/platform\\.driver\\..*/")?))
//!         .await?;
//!     manager
//!         .create_or_merge_agent_authz(AgentAuthzUpdate::new("hvac.controller").with_role(AgentRole::new("operator")))
//!         .await?;
//!
//!     let allowed = manager
//!         .check_rpc_authorization("hvac.controller", "platform.driver.set_point", &Map::new())
//!         .await?;
//!     assert!(allowed);
//!
//!     Ok(())
//! }
//! ```

pub mod models;
pub mod pattern;
pub mod store;
pub mod repository;
pub mod resolve;
pub mod check;
pub mod manager;
pub mod error;

pub use models::*;
pub use pattern::ResourcePattern;
pub use store::{AuthzMap, PolicyStore};
pub use repository::{FilePolicyRepository, InMemoryPolicyRepository, PolicyRepository};
pub use manager::*;
pub use error::*;
