//! Registration set shared by the confirmation trackers.
//!
//! Every state change happens under one lock and is decided by whether the
//! registration is still present (and in the expected phase). Whoever removes a
//! registration delivers its final event; a late timer or a duplicate
//! notification finds nothing and does nothing. The lock is never held across
//! an await point.

use super::TxNotifyHandle;
use super::types::{Phase, RegistrationId, TxEvent};
use crate::backend::{OutputFingerprint, TxOutput};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::debug;

struct Registration {
    fingerprint: OutputFingerprint,
    sender: mpsc::UnboundedSender<TxEvent>,
    unconfirmed_seen: bool,
    timeouts_enabled: bool,
    timer: Option<AbortHandle>,
}

impl Registration {
    fn send(&self, event: TxEvent) {
        // A dropped receiver only means nobody listens any more.
        let _ = self.sender.send(event);
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[derive(Default)]
struct RegistryInner {
    next_id: u64,
    registrations: BTreeMap<RegistrationId, Registration>,
}

/// Pending confirmation registrations.
#[derive(Clone, Default)]
pub struct NotifyRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

impl NotifyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a registration and hand back the receiving end of its event channel.
    pub fn register(&self, fingerprint: OutputFingerprint, timeouts_enabled: bool) -> TxNotifyHandle {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = RegistrationId(inner.next_id);
        inner.next_id += 1;
        inner.registrations.insert(
            id,
            Registration {
                fingerprint,
                sender,
                unconfirmed_seen: false,
                timeouts_enabled,
                timer: None,
            },
        );
        debug!("registered tx notify {}", id);
        TxNotifyHandle::new(id, receiver)
    }

    /// The oldest registration whose fingerprint equals `outputs`.
    pub fn find_by_fingerprint(&self, outputs: &[TxOutput]) -> Option<RegistrationId> {
        self.lock()
            .registrations
            .iter()
            .find(|(_, registration)| registration.fingerprint.matches(outputs))
            .map(|(id, _)| *id)
    }

    /// Deliver `Unconfirmed` unless it was delivered before.
    ///
    /// Returns `Some(timeouts_enabled)` when the event was delivered now, so the
    /// caller knows whether to arm the confirmed deadline.
    pub fn mark_unconfirmed(&self, id: RegistrationId, txid: &str) -> Option<bool> {
        let mut inner = self.lock();
        let registration = inner.registrations.get_mut(&id)?;
        if registration.unconfirmed_seen {
            return None;
        }
        registration.unconfirmed_seen = true;
        registration.cancel_timer();
        registration.send(TxEvent::Unconfirmed {
            txid: txid.to_string(),
        });
        Some(registration.timeouts_enabled)
    }

    /// Remove the registration and deliver `Confirmed`, preceded by
    /// `Unconfirmed` if the transaction was never seen unconfirmed.
    pub fn confirm(&self, id: RegistrationId, txid: &str, confirmations: u64) -> bool {
        let Some(mut registration) = self.lock().registrations.remove(&id) else {
            return false;
        };
        registration.cancel_timer();
        if !registration.unconfirmed_seen {
            debug!("saw confirmed tx before unconfirmed, delivering unconfirmed first");
            registration.send(TxEvent::Unconfirmed {
                txid: txid.to_string(),
            });
        }
        registration.send(TxEvent::Confirmed {
            txid: txid.to_string(),
            confirmations,
        });
        true
    }

    /// Remove the registration and deliver `TimedOut`, but only if it is still
    /// in `phase`; anything else is a stale timer.
    pub fn expire(&self, id: RegistrationId, phase: Phase) -> bool {
        let mut inner = self.lock();
        let current = inner
            .registrations
            .get(&id)
            .map(|registration| Phase::for_unconfirmed_seen(registration.unconfirmed_seen));
        if current != Some(phase) {
            debug!("stale timeout for {}, ignoring", id);
            return false;
        }
        let Some(registration) = inner.registrations.remove(&id) else {
            return false;
        };
        registration.send(TxEvent::TimedOut {
            unconfirmed_seen: registration.unconfirmed_seen,
        });
        true
    }

    /// Arm a deadline for `phase` that fires after `after`.
    pub fn arm_timeout(&self, id: RegistrationId, phase: Phase, after: Duration) {
        let registry = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            registry.expire(id, phase);
        });

        let mut inner = self.lock();
        match inner.registrations.get_mut(&id) {
            Some(registration) => {
                registration.cancel_timer();
                registration.timer = Some(task.abort_handle());
            }
            None => task.abort(),
        }
    }

    pub fn contains(&self, id: RegistrationId) -> bool {
        self.lock().registrations.contains_key(&id)
    }

    pub fn unconfirmed_seen(&self, id: RegistrationId) -> Option<bool> {
        self.lock()
            .registrations
            .get(&id)
            .map(|registration| registration.unconfirmed_seen)
    }

    pub fn len(&self) -> usize {
        self.lock().registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
