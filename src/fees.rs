//! Fee selection on top of a backend's fee estimate.

use crate::backend::BlockchainBackend;
use std::sync::Arc;
use tracing::{debug, warn};

/// Targets above this are fee rates chosen by the user, not block targets.
pub const DEFAULT_MANUAL_FEE_THRESHOLD: u64 = 144;

/// Rate used when the backend has no usable estimate, in sat/kB.
pub const DEFAULT_FALLBACK_FEE_PER_KB: u64 = 30_000;

/// Picks the fee rate for a transaction.
#[derive(Clone)]
pub struct FeeEstimator {
    backend: Arc<dyn BlockchainBackend>,
    manual_threshold: u64,
    fallback_fee_per_kb: u64,
}

impl FeeEstimator {
    pub fn new(backend: Arc<dyn BlockchainBackend>) -> Self {
        Self {
            backend,
            manual_threshold: DEFAULT_MANUAL_FEE_THRESHOLD,
            fallback_fee_per_kb: DEFAULT_FALLBACK_FEE_PER_KB,
        }
    }

    pub fn with_manual_threshold(mut self, threshold: u64) -> Self {
        self.manual_threshold = threshold;
        self
    }

    pub fn with_fallback(mut self, fee_per_kb: u64) -> Self {
        self.fallback_fee_per_kb = fee_per_kb;
        self
    }

    /// Fee rate in sat/kB for `target`.
    ///
    /// A `target` above the manual threshold is taken as the rate itself.
    /// Otherwise it is a confirmation target in blocks handed to the backend;
    /// any failure there falls back to a fixed rate.
    pub async fn get_fee(&self, target: u64) -> u64 {
        if target > self.manual_threshold {
            debug!("using manually set fee rate {} sat/kB", target);
            return target;
        }

        let blocks = u32::try_from(target).unwrap_or(u32::MAX);
        match self.backend.estimate_fee_per_kb(blocks).await {
            Ok(Some(fee)) => fee,
            Ok(None) => {
                warn!(
                    "Got no good fee estimation from {}. Using {} sat/kB as fallback.",
                    self.backend.name(),
                    self.fallback_fee_per_kb
                );
                self.fallback_fee_per_kb
            }
            Err(e) => {
                warn!(
                    "Fee estimation failed ({}). Using {} sat/kB as fallback.",
                    e, self.fallback_fee_per_kb
                );
                self.fallback_fee_per_kb
            }
        }
    }
}
