use crate::error::RemoteCallError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;

/// View of the identities currently connected to the bus
pub trait PeerDirectory: Send + Sync {
    fn connected_peers(&self) -> BTreeSet<String>;

    fn is_connected(&self, identity: &str) -> bool {
        self.connected_peers().contains(identity)
    }
}

/// Remote procedure call to a connected agent
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    async fn call(
        &self,
        identity: &str,
        method: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, RemoteCallError>;
}
