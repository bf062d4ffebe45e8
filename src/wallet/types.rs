use crate::backend::BackendError;

use serde::{Deserialize, Serialize};
use std::fmt;

/// One derivation branch of the wallet: external or change addresses of a mixdepth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Branch {
	pub mixdepth: u32,
	pub is_change: bool,
}

impl Branch {
	pub fn new(mixdepth: u32, is_change: bool) -> Self {
		Self {
			mixdepth,
			is_change,
		}
	}

	/// Position of this branch inside a mixdepth's `[external, change]` pair.
	pub fn slot(&self) -> usize {
		usize::from(self.is_change)
	}
}

impl fmt::Display for Branch {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.mixdepth, self.slot())
	}
}

/// Where a used address sits in the derivation tree.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct AddressRecord {
	pub branch: Branch,
	pub index: u32,
}

/// A wallet-owned unspent output.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnspentEntry {
	pub address: String,
	/// Value in satoshis.
	pub value: u64,
}

/// Deterministic address derivation, provided by the key-management layer.
///
/// Must return the same address for the same `(branch, index)` every time.
pub trait AddressDeriver: Send + Sync {
	fn derive(&self, branch: Branch, index: u32) -> Result<String, WalletSyncError>;
}

/// Error types for wallet synchronization
#[allow(clippy::enum_variant_names)]
#[derive(Debug, thiserror::Error)]
pub enum WalletSyncError {
	#[error("Backend error: {0}")]
	BackendError(#[from] BackendError),

	/// The node does not watch addresses the wallet needs; they were handed to
	/// the node for import and the sync must be re-run once it has rescanned.
	#[error("Node is missing {imported} wallet addresses, imported them; restart the sync after the rescan")]
	InsufficientImport { imported: usize },

	#[error("Address derivation error: {0}")]
	DerivationError(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),

	#[error("Persistence error: {0}")]
	PersistenceError(String),

	#[error("Sync error: {0}")]
	SyncError(String),
}
