//! Poll-based confirmation tracking for explorer backends.
//!
//! One watcher task per registration. It first looks for a transaction paying
//! every expected output address whose outputs match the fingerprint exactly,
//! then waits for that transaction to land in a block.

use super::TxNotifyHandle;
use super::registry::NotifyRegistry;
use super::types::{NotifyError, Phase, RegistrationId, TxNotifyRequest};
use crate::backend::{BackendError, BlockchainBackend, OutputFingerprint, TxCodec};
use futures::future::try_join_all;
use itertools::Itertools;
use rand::seq::SliceRandom;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Poll intervals and deadlines.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub unconfirmed_poll_interval: Duration,
    pub unconfirmed_timeout: Duration,
    pub confirmed_poll_interval: Duration,
    pub confirmed_timeout: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            unconfirmed_poll_interval: Duration::from_secs(15),
            unconfirmed_timeout: Duration::from_secs(10 * 60),
            confirmed_poll_interval: Duration::from_secs(5 * 60),
            confirmed_timeout: Duration::from_secs(2 * 60 * 60),
        }
    }
}

/// Confirmation tracker that polls the backend.
#[derive(Clone)]
pub struct PollingTracker {
    backend: Arc<dyn BlockchainBackend>,
    codec: Arc<dyn TxCodec>,
    registry: NotifyRegistry,
    config: PollConfig,
}

impl PollingTracker {
    pub fn new(
        backend: Arc<dyn BlockchainBackend>,
        codec: Arc<dyn TxCodec>,
        config: PollConfig,
    ) -> Self {
        Self {
            backend,
            codec,
            registry: NotifyRegistry::new(),
            config,
        }
    }

    pub fn registry(&self) -> &NotifyRegistry {
        &self.registry
    }

    /// Register a transaction and start its watcher.
    ///
    /// Polling always runs against deadlines, whatever the request says.
    pub async fn add_tx_notify(
        &self,
        request: TxNotifyRequest,
    ) -> Result<TxNotifyHandle, NotifyError> {
        if request.outputs.is_empty() {
            return Err(NotifyError::EmptyFingerprint);
        }
        let addresses: Vec<String> = request
            .outputs
            .iter()
            .map(|output| self.codec.script_to_address(&output.script))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unique()
            .collect();
        debug!("watching output addresses {}", addresses.iter().join(","));

        let fingerprint = OutputFingerprint::new(request.outputs);
        let handle = self.registry.register(fingerprint.clone(), true);

        let watcher = Watcher {
            id: handle.id(),
            backend: self.backend.clone(),
            registry: self.registry.clone(),
            config: self.config.clone(),
            fingerprint,
            addresses,
        };
        tokio::spawn(watcher.run());
        Ok(handle)
    }
}

struct Watcher {
    id: RegistrationId,
    backend: Arc<dyn BlockchainBackend>,
    registry: NotifyRegistry,
    config: PollConfig,
    fingerprint: OutputFingerprint,
    addresses: Vec<String>,
}

impl Watcher {
    async fn run(mut self) {
        let deadline = Instant::now() + self.config.unconfirmed_timeout;
        let txid = loop {
            tokio::time::sleep(self.config.unconfirmed_poll_interval).await;
            if !self.registry.contains(self.id) {
                return;
            }
            if Instant::now() > deadline {
                info!("checking for unconfirmed tx timed out");
                self.registry.expire(self.id, Phase::AwaitingUnconfirmed);
                return;
            }
            match self.find_candidate().await {
                Ok(Some(txid)) => break txid,
                Ok(None) => continue,
                Err(e) => warn!("polling for unconfirmed tx failed: {}", e),
            }
        };
        self.registry.mark_unconfirmed(self.id, &txid);

        let deadline = Instant::now() + self.config.confirmed_timeout;
        loop {
            tokio::time::sleep(self.config.confirmed_poll_interval).await;
            if !self.registry.contains(self.id) {
                return;
            }
            if Instant::now() > deadline {
                info!("checking for confirmed tx timed out");
                self.registry.expire(self.id, Phase::AwaitingConfirmed);
                return;
            }
            match self.backend.get_transaction(&txid).await {
                Ok(Some(tx)) if tx.block_height.is_some() => {
                    self.registry.confirm(self.id, &txid, 1);
                    return;
                }
                Ok(_) => debug!("{} not yet confirmed", txid),
                Err(e) => warn!("polling for confirmed tx failed: {}", e),
            }
        }
    }

    /// A transaction paying every output address whose outputs match exactly.
    async fn find_candidate(&mut self) -> Result<Option<String>, BackendError> {
        self.addresses.shuffle(&mut rand::rng());

        let per_address = try_join_all(
            self.addresses
                .iter()
                .map(|address| self.backend.address_txids(address)),
        )
        .await?;
        let shared: HashSet<String> = per_address
            .into_iter()
            .reduce(|shared, txids| shared.intersection(&txids).cloned().collect())
            .unwrap_or_default();
        debug!("shared txids = {:?}", shared);

        for txid in shared {
            let Some(tx) = self.backend.get_transaction(&txid).await? else {
                continue;
            };
            if self.fingerprint.matches(&tx.outputs) {
                return Ok(Some(txid));
            }
        }
        Ok(None)
    }
}
