//! Progress tracking for address scans.
//!
//! This module provides the `ScanProgressTracker`, which counts derived and used addresses and
//! backend queries per scan, remembers which branches have settled, and validates that a scan
//! covered every branch of the wallet before its result is trusted.

use crate::wallet::Branch;
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Tracks the progress of one scan over all branches of a wallet.
#[derive(Debug, Clone)]
pub struct ScanProgressTracker {
    /// Number of branches the wallet has
    expected_branches: usize,
    /// Settled index per finished branch
    settled: BTreeMap<Branch, u32>,
    /// Addresses derived across all branches
    addresses_derived: usize,
    /// Addresses found used across all branches
    addresses_used: usize,
    /// Usage queries issued to the backend
    backend_queries: usize,
    /// Addresses handed to the node for import
    import_requests: usize,
    /// Derived count at which we last logged progress
    last_logged: usize,
}

impl ScanProgressTracker {
    pub fn new(expected_branches: usize) -> Self {
        Self {
            expected_branches,
            settled: BTreeMap::new(),
            addresses_derived: 0,
            addresses_used: 0,
            backend_queries: 0,
            import_requests: 0,
            last_logged: 0,
        }
    }

    /// Record one usage query over `derived` addresses of which `used` had history
    pub fn record_batch(&mut self, derived: usize, used: usize) {
        self.addresses_derived += derived;
        self.addresses_used += used;
        self.backend_queries += 1;
    }

    /// Record addresses checked against a bulk answer without a backend query
    pub fn record_checked(&mut self, checked: usize, used: usize) {
        self.addresses_derived += checked;
        self.addresses_used += used;
    }

    pub fn record_branch_settled(&mut self, branch: Branch, next_index: u32) {
        self.settled.insert(branch, next_index);
    }

    pub fn record_import(&mut self, count: usize) {
        self.import_requests += count;
    }

    /// Log progress every 100 derived addresses or when forced
    pub fn log_progress(&mut self, force: bool) {
        let since_last_log = self.addresses_derived.saturating_sub(self.last_logged);
        if force || since_last_log >= 100 {
            info!(
                "Scan progress: {} addresses derived, {} used, {}/{} branches settled",
                self.addresses_derived,
                self.addresses_used,
                self.settled.len(),
                self.expected_branches
            );
            self.last_logged = self.addresses_derived;
        }
    }

    pub fn get_stats(&self) -> ScanStats {
        ScanStats {
            branches_settled: self.settled.len(),
            addresses_derived: self.addresses_derived,
            addresses_used: self.addresses_used,
            backend_queries: self.backend_queries,
            import_requests: self.import_requests,
        }
    }

    /// Validate that every branch settled, returning an error naming the shortfall
    pub fn validate_completion(&self) -> Result<(), String> {
        if self.settled.len() != self.expected_branches {
            warn!(
                "Scan settled {} of {} branches",
                self.settled.len(),
                self.expected_branches
            );
            return Err(format!(
                "scan settled {} of {} branches",
                self.settled.len(),
                self.expected_branches
            ));
        }
        Ok(())
    }
}

/// Statistics about one scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanStats {
    pub branches_settled: usize,
    pub addresses_derived: usize,
    pub addresses_used: usize,
    pub backend_queries: usize,
    pub import_requests: usize,
}

impl ScanStats {
    /// Get a human-readable summary of the scan statistics
    pub fn summary(&self) -> String {
        format!(
            "{} branches, {} addresses derived, {} used, {} backend queries{}",
            self.branches_settled,
            self.addresses_derived,
            self.addresses_used,
            self.backend_queries,
            if self.import_requests == 0 {
                String::new()
            } else {
                format!(" ({} imports requested)", self.import_requests)
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_scans_fail_validation() {
        let mut tracker = ScanProgressTracker::new(2);
        tracker.record_batch(6, 1);
        tracker.record_branch_settled(Branch::new(0, false), 1);

        assert!(tracker.validate_completion().is_err());

        tracker.record_branch_settled(Branch::new(0, true), 0);
        assert!(tracker.validate_completion().is_ok());
        assert_eq!(
            tracker.get_stats().summary(),
            "2 branches, 6 addresses derived, 1 used, 1 backend queries"
        );
    }
}
