//! Transaction confirmation tracking
//!
//! Follows a broadcast transaction from its first sighting to its first
//! confirmation. Node backends push notifications to a local webhook listener;
//! explorer backends are polled. Both report through a per-registration
//! channel of [`TxEvent`]s and deliver each transition at most once.

/// Shared registration set and timeout arbitration
pub mod registry;
/// Type definitions for confirmation tracking
mod types;
/// Poll-based tracking for explorer backends
mod poll;
/// Webhook listener for node backends
mod webhook;

pub use poll::{PollConfig, PollingTracker};
pub use registry::NotifyRegistry;
pub use types::*;
pub use webhook::{WebhookConfig, WebhookTracker};

use crate::backend::{BackendKind, BlockchainBackend, TxCodec};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receiving side of one registration.
///
/// The channel closes once the registration is gone, after its final event.
#[derive(Debug)]
pub struct TxNotifyHandle {
    id: RegistrationId,
    events: mpsc::UnboundedReceiver<TxEvent>,
}

impl TxNotifyHandle {
    pub(crate) fn new(id: RegistrationId, events: mpsc::UnboundedReceiver<TxEvent>) -> Self {
        Self { id, events }
    }

    pub fn id(&self) -> RegistrationId {
        self.id
    }

    /// Next event, or `None` once the registration has ended.
    pub async fn recv(&mut self) -> Option<TxEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Result<TxEvent, mpsc::error::TryRecvError> {
        self.events.try_recv()
    }

    /// Feed every event to `handler` until the registration ends.
    pub async fn dispatch(mut self, handler: &mut dyn TxNotifyHandler) {
        while let Some(event) = self.recv().await {
            match event {
                TxEvent::Unconfirmed { txid } => handler.on_unconfirmed(&txid).await,
                TxEvent::Confirmed {
                    txid,
                    confirmations,
                } => handler.on_confirmed(&txid, confirmations).await,
                TxEvent::TimedOut { unconfirmed_seen } => handler.on_timeout(unconfirmed_seen).await,
            }
        }
    }
}

/// Callback-style consumer of [`TxEvent`]s.
#[async_trait::async_trait]
pub trait TxNotifyHandler: Send {
    async fn on_unconfirmed(&mut self, txid: &str);

    async fn on_confirmed(&mut self, txid: &str, confirmations: u64);

    async fn on_timeout(&mut self, unconfirmed_seen: bool) {
        tracing::info!(
            "Timed out waiting for {} transaction",
            if unconfirmed_seen { "confirmed" } else { "unconfirmed" }
        );
    }
}

/// Confirmation tracking strategy, chosen by backend family.
#[derive(Clone)]
pub enum ConfirmationTracker {
    Webhook(WebhookTracker),
    Polling(PollingTracker),
}

impl ConfirmationTracker {
    /// Webhook tracking for node backends, polling for explorers.
    pub fn for_backend(
        backend: Arc<dyn BlockchainBackend>,
        codec: Arc<dyn TxCodec>,
        webhook: WebhookConfig,
        poll: PollConfig,
        alerts: AlertState,
    ) -> Self {
        match backend.kind() {
            BackendKind::Node => {
                ConfirmationTracker::Webhook(WebhookTracker::new(backend, codec, webhook, alerts))
            }
            BackendKind::Explorer => {
                ConfirmationTracker::Polling(PollingTracker::new(backend, codec, poll))
            }
        }
    }

    /// Start following the transaction described by `request`.
    pub async fn add_tx_notify(
        &self,
        request: TxNotifyRequest,
    ) -> Result<TxNotifyHandle, NotifyError> {
        match self {
            ConfirmationTracker::Webhook(tracker) => tracker.add_tx_notify(request).await,
            ConfirmationTracker::Polling(tracker) => tracker.add_tx_notify(request).await,
        }
    }

    pub fn registry(&self) -> &NotifyRegistry {
        match self {
            ConfirmationTracker::Webhook(tracker) => tracker.registry(),
            ConfirmationTracker::Polling(tracker) => tracker.registry(),
        }
    }
}
