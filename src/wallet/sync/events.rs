//! Event system for wallet synchronization.
//!
//! This module defines the event types, the event handler trait, and the event dispatcher used
//! throughout the wallet sync process. Scan strategies and the orchestrator emit events, which
//! are then handled by registered event handlers. This keeps progress reporting and persistence
//! out of the scanning logic.

use crate::wallet::{Branch, WalletSyncError};
use std::time::Duration;

/// Events that occur during wallet synchronization
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// A branch finished scanning and its index was settled
    BranchScanned {
        branch: Branch,
        next_index: u32,
        used_addresses: usize,
    },
    /// Addresses were handed to the node for import; the sync will abort
    ImportRequested { count: usize },
    /// The unspent set was rebuilt from the backend
    UnspentRefreshed { utxo_count: usize, balance: u64 },
    /// The unspent refresh was skipped because of the backend cooldown
    UnspentSkipped { retry_in: Duration },
    /// Sync has completed
    SyncCompleted { fast: bool },
    /// An error occurred during sync
    SyncError { error: String },
}

/// Trait for handling sync events.
///
/// Implementors receive all sync events and can perform side effects or state updates.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    ///
    /// This method is called for every event dispatched by the orchestrator or scan strategy.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// Handlers are called in registration order; a failing handler does not
/// stop the others.
#[derive(Default)]
pub struct EventDispatcher {
    handlers: Vec<Box<dyn SyncEventHandler>>,
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new event handler.
    pub fn register_handler(&mut self, handler: Box<dyn SyncEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Dispatch an event to all registered handlers.
    pub async fn dispatch(&mut self, event: &SyncEvent) {
        for handler in &mut self.handlers {
            if let Err(e) = handler.handle(event).await {
                tracing::error!("Handler {} failed to process event: {}", handler.name(), e);
            }
        }
    }
}

/// Handler that writes every event to the log.
pub struct LoggingEventHandler;

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError> {
        match event {
            SyncEvent::BranchScanned {
                branch,
                next_index,
                used_addresses,
            } => tracing::debug!(
                "Branch {} settled at index {} ({} used addresses)",
                branch,
                next_index,
                used_addresses
            ),
            SyncEvent::ImportRequested { count } => {
                tracing::info!("Requested import of {} addresses", count)
            }
            SyncEvent::UnspentRefreshed {
                utxo_count,
                balance,
            } => tracing::info!(
                "Unspent set refreshed: {} outputs, {} BTC",
                utxo_count,
                crate::utils::format_btc(*balance)
            ),
            SyncEvent::UnspentSkipped { retry_in } => tracing::debug!(
                "Unspent refresh skipped, next allowed in {}s",
                retry_in.as_secs()
            ),
            SyncEvent::SyncCompleted { fast } => {
                tracing::info!("Wallet sync completed (fast: {})", fast)
            }
            SyncEvent::SyncError { error } => tracing::warn!("Wallet sync failed: {}", error),
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingEventHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    struct Recorder(Arc<Mutex<Vec<SyncEvent>>>);

    #[async_trait::async_trait]
    impl SyncEventHandler for Recorder {
        async fn handle(&mut self, event: &SyncEvent) -> Result<(), WalletSyncError> {
            self.0.lock().unwrap().push(event.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "Recorder"
        }
    }

    struct Failing;

    #[async_trait::async_trait]
    impl SyncEventHandler for Failing {
        async fn handle(&mut self, _event: &SyncEvent) -> Result<(), WalletSyncError> {
            Err(WalletSyncError::SyncError("boom".into()))
        }

        fn name(&self) -> &'static str {
            "Failing"
        }
    }

    #[tokio::test]
    async fn a_failing_handler_does_not_starve_the_rest() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut dispatcher = EventDispatcher::new();
        dispatcher.register_handler(Box::new(Failing));
        dispatcher.register_handler(Box::new(Recorder(seen.clone())));

        dispatcher
            .dispatch(&SyncEvent::ImportRequested { count: 3 })
            .await;

        assert_eq!(
            *seen.lock().unwrap(),
            vec![SyncEvent::ImportRequested { count: 3 }]
        );
    }
}
