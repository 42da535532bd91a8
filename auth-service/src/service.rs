use crate::{
    bootstrap,
    config::AuthServiceConfig,
    credentials::{CredentialCreator, CredentialStore},
    error::{CredentialError, Result, ServiceError},
    notifier::{Delivery, PolicyNotifier},
};
use authz_engine::{
    AgentAuthzUpdate, AuthorizationManager, AuthzChange, EffectiveCapabilities, GroupUpdate, Identity, RoleUpdate,
    TopicAccess,
};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Lifecycle of the auth service. `Running` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Uninitialized,
    Bootstrapping,
    Running,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Uninitialized => "uninitialized",
            Self::Bootstrapping => "bootstrapping",
            Self::Running => "running",
        };
        f.write_str(name)
    }
}

/// Auth orchestrator: owns the lifecycle, provisions agents and fronts the
/// authorization manager for remote callers
pub struct AuthService {
    config: AuthServiceConfig,
    state: RwLock<ServiceState>,
    /// `None` when authorization is disabled for the deployment
    manager: Option<Arc<AuthorizationManager>>,
    credential_store: Arc<dyn CredentialStore>,
    credential_creator: Arc<dyn CredentialCreator>,
    notifier: Arc<dyn PolicyNotifier>,
}

impl AuthService {
    pub fn new(
        config: AuthServiceConfig,
        manager: Option<Arc<AuthorizationManager>>,
        credential_store: Arc<dyn CredentialStore>,
        credential_creator: Arc<dyn CredentialCreator>,
        notifier: Arc<dyn PolicyNotifier>,
    ) -> Self {
        Self {
            config,
            state: RwLock::new(ServiceState::Uninitialized),
            manager,
            credential_store,
            credential_creator,
            notifier,
        }
    }

    pub fn state(&self) -> ServiceState {
        *self.state.read()
    }

    pub fn config(&self) -> &AuthServiceConfig {
        &self.config
    }

    pub fn authorization_enabled(&self) -> bool {
        self.manager.is_some()
    }

    pub(crate) fn ensure_running(&self) -> Result<()> {
        match self.state() {
            ServiceState::Running => Ok(()),
            other => Err(ServiceError::NotRunning(other)),
        }
    }

    /// Manager to delegate to, once running. `None` means authorization is
    /// disabled and the caller should answer with the permissive default.
    fn active_manager(&self) -> Result<Option<&AuthorizationManager>> {
        self.ensure_running()?;
        Ok(self.manager.as_deref())
    }

    // =============================================================================
    // Lifecycle
    // =============================================================================

    /// Provision reserved identities and seed the default policy. Must
    /// complete before any request is served. A failure leaves the service
    /// uninitialized so the bootstrap can be retried.
    pub async fn bootstrap(&self) -> Result<()> {
        {
            let mut state = self.state.write();
            if *state != ServiceState::Uninitialized {
                return Err(ServiceError::AlreadyStarted);
            }
            *state = ServiceState::Bootstrapping;
        }

        match self.run_bootstrap().await {
            Ok(()) => {
                *self.state.write() = ServiceState::Running;
                info!(identity = %self.config.auth_identity, "Auth service running");
                Ok(())
            }
            Err(e) => {
                *self.state.write() = ServiceState::Uninitialized;
                error!("Auth service bootstrap failed: {}", e);
                Err(e)
            }
        }
    }

    async fn run_bootstrap(&self) -> Result<()> {
        self.config.validate()?;
        for identity in &self.config.reserved_identities {
            self.ensure_credentials(identity).await?;
        }

        if let Some(manager) = &self.manager {
            bootstrap::seed_policy(manager, &self.config).await?;
        }
        Ok(())
    }

    /// Existing credentials are left untouched; only a missing identity gets
    /// new ones. Returns whether credentials were created.
    async fn ensure_credentials(&self, identity: &str) -> Result<bool> {
        match self.credential_store.retrieve(identity).await {
            Ok(_) => Ok(false),
            Err(CredentialError::NotFound(_)) => {
                let credentials = self.credential_creator.create(identity, &Map::new())?;
                self.credential_store.store(credentials).await?;
                info!("Created credentials for {}", identity);
                Ok(true)
            }
            Err(e) => Err(e.into()),
        }
    }

    // =============================================================================
    // Agent Provisioning
    // =============================================================================

    /// Provision `identity`. Re-running it for a known agent never resets its
    /// secret or its privileges. Credentials created by a call whose
    /// authorization step fails are removed again.
    pub async fn create_agent(&self, identity: &str) -> Result<bool> {
        let manager = self.active_manager()?;
        authz_engine::validate_name("identity", identity)?;

        let created = self.ensure_credentials(identity).await?;

        if let Some(manager) = manager {
            if let Err(e) = self.provision_default_authz(manager, identity).await {
                if created {
                    warn!("Withdrawing new credentials for {}: {}", identity, e);
                    self.credential_store.remove(identity).await?;
                }
                return Err(e);
            }
        }
        Ok(true)
    }

    async fn provision_default_authz(&self, manager: &AuthorizationManager, identity: &str) -> Result<()> {
        if manager.is_provisioned(identity).await? {
            debug!("{} already has capabilities, keeping them", identity);
            return Ok(());
        }
        manager
            .create_or_merge_agent_authz(bootstrap::new_agent_authz(identity)?)
            .await?;
        info!("Created default authorization for {}", identity);
        Ok(())
    }

    /// Remove credentials, then the authorization record. A failed credential
    /// removal leaves the authorization record in place.
    pub async fn remove_agent(&self, identity: &str) -> Result<bool> {
        let manager = self.active_manager()?;
        authz_engine::validate_name("identity", identity)?;

        self.credential_store.remove(identity).await?;
        info!("Removed credentials for {}", identity);

        if let Some(manager) = manager {
            match manager.remove_agent_authorization(identity).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    warn!("{} had no authorization record", identity);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(true)
    }

    // =============================================================================
    // Policy Mutation
    // =============================================================================

    pub async fn create_or_merge_role(&self, update: RoleUpdate) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.create_or_merge_role(update).await?),
            None => Ok(false),
        }
    }

    pub async fn create_or_merge_agent_group(&self, update: GroupUpdate) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.create_or_merge_agent_group(update).await?),
            None => Ok(false),
        }
    }

    /// Merge a per-identity record and push a changed protected RPC set to
    /// the agent if it is connected. An offline agent is not an error; a live
    /// agent that rejects the push is.
    pub async fn create_or_merge_agent_authz(&self, update: AgentAuthzUpdate) -> Result<bool> {
        let Some(manager) = self.active_manager()? else {
            return Ok(false);
        };

        // The policy lock is released once the merge returns.
        let change = manager.create_or_merge_agent_authz(update).await?;
        if change.protected_rpcs_changed {
            self.propagate(&change).await?;
        }
        Ok(true)
    }

    async fn propagate(&self, change: &AuthzChange) -> Result<()> {
        match self
            .notifier
            .protected_rpcs_changed(&change.identity, &change.protected_rpcs)
            .await
        {
            Ok(Delivery::Delivered) => {
                info!("Pushed protected RPCs to {}", change.identity);
                Ok(())
            }
            Ok(Delivery::Offline) => {
                warn!(
                    "{} is offline; its protected RPCs apply after its next start",
                    change.identity
                );
                Ok(())
            }
            Err(e) => {
                error!("{}", e);
                Err(e)
            }
        }
    }

    pub async fn add_agents_to_group(&self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.add_agents_to_group(name, identities).await?),
            None => Ok(false),
        }
    }

    pub async fn remove_agents_from_group(&self, name: &str, identities: &BTreeSet<Identity>) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.remove_agents_from_group(name, identities).await?),
            None => Ok(false),
        }
    }

    pub async fn create_protected_topics(&self, patterns: &[String]) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.create_protected_topics(patterns).await?),
            None => Ok(false),
        }
    }

    pub async fn remove_protected_topics(&self, patterns: &[String]) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.remove_protected_topics(patterns).await?),
            None => Ok(false),
        }
    }

    pub async fn remove_role(&self, name: &str) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.remove_role(name).await?),
            None => Ok(false),
        }
    }

    pub async fn remove_agent_group(&self, name: &str) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.remove_agent_group(name).await?),
            None => Ok(false),
        }
    }

    pub async fn remove_agent_authorization(&self, identity: &str) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.remove_agent_authorization(identity).await?),
            None => Ok(false),
        }
    }

    // =============================================================================
    // Queries
    // =============================================================================

    pub async fn get_agent_capabilities(&self, identity: &str) -> Result<EffectiveCapabilities> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.get_agent_capabilities(identity).await?),
            None => Ok(EffectiveCapabilities::default()),
        }
    }

    pub async fn get_protected_rpcs(&self, identity: &str) -> Result<BTreeSet<String>> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.get_protected_rpcs(identity).await?),
            None => Ok(BTreeSet::new()),
        }
    }

    pub async fn check_rpc_authorization(
        &self,
        identity: &str,
        method_name: &str,
        method_args: &Map<String, Value>,
    ) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager
                .check_rpc_authorization(identity, method_name, method_args)
                .await?),
            None => Ok(true),
        }
    }

    pub async fn check_pubsub_authorization(&self, identity: &str, topic: &str, access: TopicAccess) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.check_pubsub_authorization(identity, topic, access).await?),
            None => Ok(true),
        }
    }

    pub async fn is_protected_topic(&self, topic: &str) -> Result<bool> {
        match self.active_manager()? {
            Some(manager) => Ok(manager.is_protected_topic(topic).await?),
            None => Ok(false),
        }
    }
}
