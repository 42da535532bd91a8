use crate::error::{RemoteCallError, Result, ServiceError};
use crate::identities::ADD_PROTECTED_RPCS;
use crate::peers::{PeerDirectory, RemoteCaller};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// How a policy change reached its agent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Not connected; the agent picks the change up on its next start
    Offline,
}

/// Delivers policy changes to running agents
#[async_trait]
pub trait PolicyNotifier: Send + Sync {
    /// Push the full protected RPC set of `identity`. Errors mean the agent
    /// is live but enforcing a stale set.
    async fn protected_rpcs_changed(&self, identity: &str, protected_rpcs: &BTreeSet<String>) -> Result<Delivery>;
}

/// Synchronous bounded-timeout delivery over the bus
pub struct PeerNotifier {
    peers: Arc<dyn PeerDirectory>,
    caller: Arc<dyn RemoteCaller>,
    timeout: Duration,
}

impl PeerNotifier {
    pub fn new(peers: Arc<dyn PeerDirectory>, caller: Arc<dyn RemoteCaller>, timeout: Duration) -> Self {
        Self { peers, caller, timeout }
    }
}

#[async_trait]
impl PolicyNotifier for PeerNotifier {
    async fn protected_rpcs_changed(&self, identity: &str, protected_rpcs: &BTreeSet<String>) -> Result<Delivery> {
        if !self.peers.is_connected(identity) {
            debug!("{} is not connected, skipping propagation", identity);
            return Ok(Delivery::Offline);
        }

        let args = serde_json::to_value(protected_rpcs).map_err(anyhow::Error::from)?;
        let call = self.caller.call(identity, ADD_PROTECTED_RPCS, args, self.timeout);

        // The caller may enforce its own deadline; this one bounds it regardless.
        let error = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(_)) => return Ok(Delivery::Delivered),
            Ok(Err(RemoteCallError::Unreachable(_))) => {
                warn!(
                    "{} went away before protected RPCs could be pushed; it will load them on restart",
                    identity
                );
                return Ok(Delivery::Offline);
            }
            Ok(Err(e)) => e,
            Err(_) => RemoteCallError::Timeout {
                identity: identity.to_string(),
                timeout: self.timeout,
            },
        };

        Err(ServiceError::PropagationFailed {
            identity: identity.to_string(),
            reason: error.to_string(),
        })
    }
}
