//! Credential collaborators
//!
//! The auth service never authenticates anyone itself. It only makes sure
//! every provisioned identity has credentials, creating them on first use
//! and never regenerating an existing secret.

use crate::error::CredentialError;
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

const SECRET_BYTES: usize = 32;

#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub identity: String,
    pub secret: String,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("identity", &self.identity)
            .field("secret", &"[REDACTED]")
            .field("attributes", &self.attributes)
            .field("created_at", &self.created_at)
            .finish()
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fails with [`CredentialError::NotFound`] for unknown identities
    async fn retrieve(&self, identity: &str) -> Result<Credentials, CredentialError>;

    async fn store(&self, credentials: Credentials) -> Result<(), CredentialError>;

    async fn remove(&self, identity: &str) -> Result<(), CredentialError>;
}

pub trait CredentialCreator: Send + Sync {
    fn create(&self, identity: &str, attributes: &Map<String, Value>) -> Result<Credentials, CredentialError>;
}

/// In-memory credential store for testing and single-process platforms
#[derive(Default)]
pub struct InMemoryCredentialStore {
    credentials: DashMap<String, Credentials>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn retrieve(&self, identity: &str) -> Result<Credentials, CredentialError> {
        self.credentials
            .get(identity)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| CredentialError::NotFound(identity.to_string()))
    }

    async fn store(&self, credentials: Credentials) -> Result<(), CredentialError> {
        debug!("Storing credentials for {}", credentials.identity);
        self.credentials.insert(credentials.identity.clone(), credentials);
        Ok(())
    }

    async fn remove(&self, identity: &str) -> Result<(), CredentialError> {
        self.credentials
            .remove(identity)
            .map(|_| ())
            .ok_or_else(|| CredentialError::NotFound(identity.to_string()))
    }
}

/// Creates credentials with a random URL-safe secret
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomCredentialCreator;

impl CredentialCreator for RandomCredentialCreator {
    fn create(&self, identity: &str, attributes: &Map<String, Value>) -> Result<Credentials, CredentialError> {
        let mut secret = [0u8; SECRET_BYTES];
        OsRng.fill_bytes(&mut secret);

        Ok(Credentials {
            identity: identity.to_string(),
            secret: URL_SAFE_NO_PAD.encode(secret),
            attributes: attributes.clone(),
            created_at: Utc::now(),
        })
    }
}
