//! Auth orchestrator for the agent message bus
//!
//! This crate runs the authorization authority of a platform:
//! - bootstraps credentials for the platform-reserved identities and seeds
//!   the default roles, protected RPCs and admin group
//! - provisions and removes agents without ever resetting an existing
//!   agent's secret or privileges
//! - serves the policy API to other agents through a fixed method table,
//!   guarded by its own protected RPC set
//! - pushes changed protected RPC sets to running agents with a bounded
//!   timeout
//!
//! # Example
//!
//! ```rust
//! use auth_service::{
//!     config::{policy_manager, AuthServiceConfig},
//!     credentials::{InMemoryCredentialStore, RandomCredentialCreator},
//!     notifier::{Delivery, PolicyNotifier},
//!     AuthService,
//! };
//! use std::collections::BTreeSet;
//! use std::sync::Arc;
//!
//! struct Offline;
//!
//! #[async_trait::async_trait]
//! impl PolicyNotifier for Offline {
//!     async fn protected_rpcs_changed(&self, _: &str, _: &BTreeSet<String>) -> auth_service::Result<Delivery> {
//!         Ok(Delivery::Offline)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AuthServiceConfig::default();
//!     let manager = policy_manager(&config).await?;
//!     let service = AuthService::new(
//!         config,
//!         manager,
//!         Arc::new(InMemoryCredentialStore::new()),
//!         Arc::new(RandomCredentialCreator),
//!         Arc::new(Offline),
//!     );
//!
//!     service.bootstrap().await?;
//!     service.create_agent("hvac.controller").await?;
//!
//!     let protected = service.get_protected_rpcs("platform.auth").await?;
//!     assert!(protected.contains("create_agent"));
//!
//!     Ok(())
//! }
//! ```

pub mod bootstrap;
pub mod config;
pub mod credentials;
pub mod dispatch;
pub mod error;
pub mod identities;
pub mod notifier;
pub mod peers;
pub mod service;
pub mod telemetry;

pub use error::*;
pub use service::{AuthService, ServiceState};
