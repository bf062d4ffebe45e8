//! Types shared by the confirmation trackers

use crate::backend::{BackendError, TxOutput};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// One state transition of a tracked transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxEvent {
    /// The transaction was seen with zero confirmations.
    Unconfirmed { txid: String },
    /// The transaction reached `confirmations` confirmations.
    Confirmed { txid: String, confirmations: u64 },
    /// A deadline passed; `unconfirmed_seen` tells which one.
    TimedOut { unconfirmed_seen: bool },
}

/// Identifies one `add_tx_notify` registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistrationId(pub u64);

impl fmt::Display for RegistrationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Which deadline a timer guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for the first sighting.
    AwaitingUnconfirmed,
    /// Seen unconfirmed, waiting for the first confirmation.
    AwaitingConfirmed,
}

impl Phase {
    pub fn for_unconfirmed_seen(unconfirmed_seen: bool) -> Self {
        if unconfirmed_seen {
            Phase::AwaitingConfirmed
        } else {
            Phase::AwaitingUnconfirmed
        }
    }
}

/// A request to follow a broadcast transaction.
#[derive(Debug, Clone)]
pub struct TxNotifyRequest {
    /// Outputs of the transaction, used to recognise it before its txid is known.
    pub outputs: Vec<TxOutput>,
    /// Address the node should watch when it watches none of the outputs,
    /// with the wallet label it is filed under.
    pub notify_address: Option<(String, String)>,
    /// Arm unconfirmed and confirmed deadlines.
    pub timeouts_enabled: bool,
}

impl TxNotifyRequest {
    pub fn new(outputs: Vec<TxOutput>) -> Self {
        Self {
            outputs,
            notify_address: None,
            timeouts_enabled: false,
        }
    }

    /// Watch `address` under `<wallet_label>-notify` if the node does not
    /// already watch one of the outputs.
    pub fn with_notify_address(
        mut self,
        wallet_label: impl Into<String>,
        address: impl Into<String>,
    ) -> Self {
        self.notify_address = Some((wallet_label.into(), address.into()));
        self
    }

    pub fn with_timeouts(mut self, enabled: bool) -> Self {
        self.timeouts_enabled = enabled;
        self
    }
}

/// The most recent alert message pushed by the node.
#[derive(Debug, Clone, Default)]
pub struct AlertState(Arc<Mutex<Option<String>>>);

impl AlertState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, message: String) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = Some(message);
    }

    pub fn latest(&self) -> Option<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

/// Error types for confirmation tracking
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Backend error: {0}")]
    BackendError(#[from] BackendError),

    #[error("Failed to bind notify listener on {host} ports {first_port}..{last_port}")]
    BindError {
        host: String,
        first_port: u16,
        last_port: u16,
    },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Transaction has no outputs to track")]
    EmptyFingerprint,
}
