use crate::error::{Result, ServiceError};
use crate::identities;
use authz_engine::{AuthorizationManager, FilePolicyRepository, InMemoryPolicyRepository, PolicyRepository};
use figment::{
    providers::{Env, Format, Serialized, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Environment variable prefix; `__` separates nested keys
/// (`AUTHZ_LOGGING__LEVEL=debug`)
pub const ENV_PREFIX: &str = "AUTHZ_";

/// Auth service configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthServiceConfig {
    /// Build an authorization manager at all. When disabled every check
    /// passes and only credentials are managed.
    #[serde(default = "default_authorization_enabled")]
    pub authorization_enabled: bool,

    /// Identity the auth service itself runs as
    #[serde(default = "default_auth_identity")]
    pub auth_identity: String,

    /// Identities provisioned at bootstrap and placed in the admin group
    #[serde(default = "default_reserved_identities")]
    pub reserved_identities: Vec<String>,

    /// JSON policy file; the policy is kept in memory only when unset
    #[serde(default)]
    pub policy_file: Option<PathBuf>,

    /// Bound on pushing a changed protected RPC set to a live agent
    #[serde(default = "default_propagation_timeout_secs")]
    pub propagation_timeout_secs: u64,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Structured JSON output instead of human-readable lines
    #[serde(default)]
    pub json: bool,
}

fn default_authorization_enabled() -> bool {
    true
}

fn default_auth_identity() -> String {
    identities::AUTH.to_string()
}

fn default_reserved_identities() -> Vec<String> {
    identities::reserved_identities()
}

fn default_propagation_timeout_secs() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AuthServiceConfig {
    fn default() -> Self {
        Self {
            authorization_enabled: default_authorization_enabled(),
            auth_identity: default_auth_identity(),
            reserved_identities: default_reserved_identities(),
            policy_file: None,
            propagation_timeout_secs: default_propagation_timeout_secs(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AuthServiceConfig {
    /// Load defaults, then `path` (TOML or YAML by extension), then
    /// `AUTHZ_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = path {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or_default();
            figment = match extension {
                "toml" => figment.merge(Toml::file(path)),
                "yaml" | "yml" => figment.merge(Yaml::file(path)),
                other => {
                    return Err(ServiceError::ConfigError(format!(
                        "Unsupported config format '{}' for {}",
                        other,
                        path.display()
                    )))
                }
            };
        }

        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| ServiceError::ConfigError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.auth_identity.trim().is_empty() {
            return Err(ServiceError::ConfigError("auth_identity must not be empty".to_string()));
        }
        // Bootstrap only protects the policy API of a reserved auth identity.
        if !self.reserved_identities.contains(&self.auth_identity) {
            return Err(ServiceError::ConfigError(format!(
                "auth_identity '{}' must be one of reserved_identities",
                self.auth_identity
            )));
        }
        if let Some(identity) = self.reserved_identities.iter().find(|i| i.trim().is_empty()) {
            return Err(ServiceError::ConfigError(format!(
                "Invalid reserved identity '{}'",
                identity
            )));
        }
        if self.propagation_timeout_secs == 0 {
            return Err(ServiceError::ConfigError(
                "propagation_timeout_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_secs(self.propagation_timeout_secs)
    }
}

/// Build the authorization manager described by `config`, or `None` when
/// authorization is disabled for this deployment.
pub async fn policy_manager(config: &AuthServiceConfig) -> Result<Option<Arc<AuthorizationManager>>> {
    if !config.authorization_enabled {
        info!("Authorization is disabled");
        return Ok(None);
    }

    let repository: Arc<dyn PolicyRepository> = match &config.policy_file {
        Some(path) => {
            info!("Using policy file {}", path.display());
            Arc::new(FilePolicyRepository::new(path))
        }
        None => Arc::new(InMemoryPolicyRepository::new()),
    };

    let manager = AuthorizationManager::new(repository).await?;
    Ok(Some(Arc::new(manager)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthServiceConfig::default();
        assert!(config.authorization_enabled);
        assert_eq!(config.auth_identity, "platform.auth");
        assert_eq!(config.reserved_identities.len(), 6);
        assert_eq!(config.propagation_timeout(), Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(
            &path,
            "authorization_enabled = false\npropagation_timeout_secs = 2\npolicy_file = \"/var/lib/authz.json\"\n",
        )
        .unwrap();

        let config = AuthServiceConfig::load(Some(&path)).unwrap();
        assert!(!config.authorization_enabled);
        assert_eq!(config.propagation_timeout_secs, 2);
        assert_eq!(config.policy_file, Some(PathBuf::from("/var/lib/authz.json")));
        assert_eq!(config.auth_identity, "platform.auth");
    }

    #[test]
    fn test_load_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.yaml");
        std::fs::write(&path, "reserved_identities:\n  - platform.auth\n  - config.store\n").unwrap();

        let config = AuthServiceConfig::load(Some(&path)).unwrap();
        assert_eq!(config.reserved_identities, vec!["platform.auth", "config.store"]);
    }

    #[test]
    fn test_rejects_unknown_format_and_zero_timeout() {
        assert!(AuthServiceConfig::load(Some(Path::new("auth.ini"))).is_err());

        let config = AuthServiceConfig {
            propagation_timeout_secs: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServiceError::ConfigError(_))));
    }

    #[test]
    fn test_auth_identity_must_be_reserved() {
        let config = AuthServiceConfig {
            auth_identity: "custom.auth".to_string(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ServiceError::ConfigError(_))));

        let mut config = config;
        config.reserved_identities.push("custom.auth".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_rejects_unreserved_auth_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.yaml");
        std::fs::write(&path, "auth_identity: custom.auth\nreserved_identities:\n  - config.store\n").unwrap();

        assert!(matches!(
            AuthServiceConfig::load(Some(&path)),
            Err(ServiceError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_disabled_config_builds_no_manager() {
        let config = AuthServiceConfig {
            authorization_enabled: false,
            ..Default::default()
        };
        assert!(policy_manager(&config).await.unwrap().is_none());
        assert!(policy_manager(&AuthServiceConfig::default()).await.unwrap().is_some());
    }
}
