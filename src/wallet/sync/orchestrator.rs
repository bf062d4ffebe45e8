//! Wallet sync orchestrator and integration point for all sync services.
//!
//! This module defines the `WalletSyncOrchestrator`, which coordinates one wallet sync: it
//! restores the persisted index cache, picks the scan strategy (fast when requested and a cache
//! is present, full otherwise or when the backend cannot serve a fast scan), refreshes the
//! unspent set, persists the settled indices, and reports progress through the event dispatcher.
//!
//! The orchestrator holds the wallet's lock for the whole sync, so it is the only writer of the
//! wallet's sync state while a sync runs.

use crate::backend::BlockchainBackend;
use crate::wallet::sync::{
    events::{EventDispatcher, LoggingEventHandler, SyncEvent, SyncEventHandler},
    progress_tracker::{ScanProgressTracker, ScanStats},
    repositories::IndexCacheRepository,
    strategies::{FastScan, FullScan, ScanConfig, ScanOutcome, ScanStrategy},
    unspent::{UnspentRefresh, UnspentSynchronizer},
};
use crate::wallet::{SharedWallet, Wallet, WalletSyncError};
use std::sync::Arc;
use tracing::info;

/// What a successful sync did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Whether the fast scan answered the address sync.
    pub fast: bool,
    pub scan: ScanStats,
    pub unspent: UnspentRefresh,
}

/// Main wallet sync orchestrator that coordinates all sync components.
pub struct WalletSyncOrchestrator {
    backend: Arc<dyn BlockchainBackend>,

    // Strategies
    full_scan: FullScan,
    fast_scan: FastScan,

    // Services
    unspent_synchronizer: UnspentSynchronizer,
    index_cache_repository: Option<Arc<dyn IndexCacheRepository>>,
    event_dispatcher: EventDispatcher,
}

impl WalletSyncOrchestrator {
    /// Create an orchestrator for `backend` that logs every sync event.
    pub fn new(backend: Arc<dyn BlockchainBackend>, scan_config: ScanConfig) -> Self {
        let mut event_dispatcher = EventDispatcher::new();
        event_dispatcher.register_handler(Box::new(LoggingEventHandler));

        Self {
            backend,
            full_scan: FullScan::new(scan_config),
            fast_scan: FastScan,
            unspent_synchronizer: UnspentSynchronizer::new(),
            index_cache_repository: None,
            event_dispatcher,
        }
    }

    /// Restore index caches before each sync and persist indices after it.
    pub fn with_index_cache_repository(mut self, repository: Arc<dyn IndexCacheRepository>) -> Self {
        self.index_cache_repository = Some(repository);
        self
    }

    /// Register an additional event handler.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.event_dispatcher.register_handler(handler);
    }

    pub fn backend(&self) -> &Arc<dyn BlockchainBackend> {
        &self.backend
    }

    /// Synchronize `wallet` with the backend.
    ///
    /// # Errors
    /// [`WalletSyncError::InsufficientImport`] when the node had to import
    /// addresses first; run the sync again once the node has rescanned.
    pub async fn sync_wallet(
        &mut self,
        wallet: &SharedWallet,
        fast: bool,
    ) -> Result<SyncReport, WalletSyncError> {
        let mut wallet = wallet.lock().await;
        info!(
            "Starting wallet synchronization for {} using {}",
            wallet.label(),
            self.backend.name()
        );

        let result = self.sync_locked(&mut wallet, fast).await;

        let event = match &result {
            Ok(report) => SyncEvent::SyncCompleted { fast: report.fast },
            Err(e) => SyncEvent::SyncError {
                error: e.to_string(),
            },
        };
        self.event_dispatcher.dispatch(&event).await;
        result
    }

    async fn sync_locked(
        &mut self,
        wallet: &mut Wallet,
        fast: bool,
    ) -> Result<SyncReport, WalletSyncError> {
        if let Some(repository) = &self.index_cache_repository {
            if let Some(cache) = repository.load(wallet.label()).await? {
                wallet.set_index_cache(cache);
            }
        }

        let branch_count = wallet.branches().count();
        let mut progress_tracker = ScanProgressTracker::new(branch_count);
        let backend = self.backend.as_ref();

        let mut used_fast = false;
        if fast && wallet.has_index_cache() {
            let outcome = self
                .fast_scan
                .scan(wallet, backend, &mut self.event_dispatcher, &mut progress_tracker)
                .await?;
            used_fast = outcome == ScanOutcome::Completed;
            if !used_fast {
                info!("Fast sync unavailable, falling back to full scan");
            }
        }

        if !used_fast {
            let outcome = self
                .full_scan
                .scan(wallet, backend, &mut self.event_dispatcher, &mut progress_tracker)
                .await?;
            if outcome != ScanOutcome::Completed {
                return Err(WalletSyncError::SyncError(format!(
                    "{} cannot scan with {}",
                    self.full_scan.name(),
                    backend.name()
                )));
            }
        }

        progress_tracker
            .validate_completion()
            .map_err(WalletSyncError::SyncError)?;
        info!("Address sync completed: {}", progress_tracker.get_stats().summary());

        if let Some(repository) = &self.index_cache_repository {
            repository.save(wallet.label(), wallet.indices()).await?;
        }

        let unspent = self
            .unspent_synchronizer
            .sync_unspent(wallet, backend, &mut self.event_dispatcher)
            .await?;

        Ok(SyncReport {
            fast: used_fast,
            scan: progress_tracker.get_stats(),
            unspent,
        })
    }
}
