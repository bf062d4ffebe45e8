//! Rebuilding the wallet's unspent output set from a backend.

use crate::backend::{BlockchainBackend, OutPoint};
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};
use crate::wallet::{UnspentEntry, Wallet, WalletSyncError};
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Result of one `sync_unspent` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnspentRefresh {
    Refreshed { utxo_count: usize },
    /// Inside the backend's cooldown; the previous set was left in place.
    Skipped { retry_in: Duration },
}

/// Keeps `wallet.unspent` in step with the backend, honouring refresh cooldowns.
#[derive(Debug, Default)]
pub struct UnspentSynchronizer {
    last_refresh: Option<Instant>,
}

impl UnspentSynchronizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `wallet.unspent` with what the backend reports for the wallet's
    /// tracked addresses, minus the outpoints the wallet already spent.
    pub async fn sync_unspent(
        &mut self,
        wallet: &mut Wallet,
        backend: &dyn BlockchainBackend,
        event_dispatcher: &mut EventDispatcher,
    ) -> Result<UnspentRefresh, WalletSyncError> {
        if let (Some(cooldown), Some(last)) = (backend.unspent_refresh_cooldown(), self.last_refresh)
        {
            let elapsed = last.elapsed();
            if elapsed < cooldown {
                let retry_in = cooldown - elapsed;
                info!(
                    "{} unspent refresh happened too recently ({}s ago), skipping",
                    backend.name(),
                    elapsed.as_secs()
                );
                event_dispatcher
                    .dispatch(&SyncEvent::UnspentSkipped { retry_in })
                    .await;
                return Ok(UnspentRefresh::Skipped { retry_in });
            }
        }

        let started = Instant::now();
        let addresses = wallet.tracked_addresses();
        let outputs = if addresses.is_empty() {
            debug!("no used addresses, nothing to query");
            Vec::new()
        } else {
            backend.list_unspent(wallet.label(), &addresses).await?
        };

        let mut unspent: HashMap<OutPoint, UnspentEntry> = outputs
            .into_iter()
            .map(|output| {
                (
                    OutPoint::new(output.txid, output.vout),
                    UnspentEntry {
                        address: output.address,
                        value: output.value,
                    },
                )
            })
            .collect();
        unspent.retain(|outpoint, _| !wallet.spent_outpoints().contains(outpoint));

        let utxo_count = unspent.len();
        wallet.replace_unspent(unspent);
        self.last_refresh = Some(Instant::now());

        debug!(
            "{} sync_unspent took {}ms",
            backend.name(),
            started.elapsed().as_millis()
        );
        event_dispatcher
            .dispatch(&SyncEvent::UnspentRefreshed {
                utxo_count,
                balance: wallet.balance(),
            })
            .await;
        Ok(UnspentRefresh::Refreshed { utxo_count })
    }
}
