//! JSON file backed policy repository
//!
//! The whole policy is one pretty-printed JSON document. Saves go to a
//! uniquely named sibling file that is then renamed over the target, so a
//! crash mid-write never leaves a truncated policy behind.

use crate::{error::PolicyError, repository::PolicyRepository, store::AuthzMap};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::{debug, info};
use uuid::Uuid;

pub struct FilePolicyRepository {
    path: PathBuf,
}

impl FilePolicyRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "authz.json".to_string());
        self.path.with_file_name(format!(".{}.{}.tmp", name, Uuid::new_v4()))
    }
}

#[async_trait]
impl PolicyRepository for FilePolicyRepository {
    async fn load(&self) -> Result<AuthzMap, PolicyError> {
        let contents = match tokio::fs::read(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No policy file at {}, starting empty", self.path.display());
                return Ok(AuthzMap::new());
            }
            Err(e) => {
                return Err(PolicyError::StorageError(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        Ok(serde_json::from_slice(&contents)?)
    }

    async fn save(&self, policy: &AuthzMap) -> Result<(), PolicyError> {
        let contents = serde_json::to_vec_pretty(policy)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                PolicyError::StorageError(format!("Failed to create {}: {}", parent.display(), e))
            })?;
        }

        let temp = self.temp_path();
        tokio::fs::write(&temp, &contents)
            .await
            .map_err(|e| PolicyError::StorageError(format!("Failed to write {}: {}", temp.display(), e)))?;

        if let Err(e) = tokio::fs::rename(&temp, &self.path).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return Err(PolicyError::StorageError(format!(
                "Failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        debug!("Saved policy to {}", self.path.display());
        Ok(())
    }
}
