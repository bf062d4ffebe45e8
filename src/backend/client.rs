//!
//! The capability interface every source of blockchain truth implements.
//!
//! A backend answers questions about addresses, outputs, transactions and fees.
//! Variants are picked at construction time: [`NodeClient`](super::NodeClient)
//! talks JSON-RPC to a full node, [`ExplorerClient`](super::ExplorerClient)
//! talks HTTP to a block-explorer web API. Queries that only one family can
//! answer have default implementations that report "unsupported" (`None`).

use super::types::*;
use std::collections::HashSet;
use std::time::Duration;

/// Questions the wallet sync engine asks a blockchain data source.
#[async_trait::async_trait]
pub trait BlockchainBackend: Send + Sync {
	/// Backend family, used to choose the confirmation tracking strategy.
	fn kind(&self) -> BackendKind;

	/// Name used in logs.
	fn name(&self) -> &'static str;

	/// Addresses the backend already watches under `label`.
	///
	/// `None` means the backend needs no imports and knows about every address.
	async fn tracked_addresses(
		&self,
		_label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		Ok(None)
	}

	/// Ask the backend to start watching `addresses` under `label`.
	async fn import_addresses(&self, _label: &str, _addresses: &[String]) -> Result<(), BackendError> {
		Ok(())
	}

	/// Whether the backend would report activity on `address` at all.
	///
	/// Explorers see every address; a node only sees what it watches.
	async fn is_watched(&self, _address: &str) -> Result<bool, BackendError> {
		Ok(true)
	}

	/// Every address with history under `label`, when answerable in one query.
	async fn address_history(
		&self,
		_label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		Ok(None)
	}

	/// The subset of `addresses` that has any transaction history.
	async fn address_usage(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<HashSet<String>, BackendError>;

	/// Bulk "used address" introspection for the fast scan.
	///
	/// `None` when the backend has no such query.
	async fn used_address_set(
		&self,
		_label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		Ok(None)
	}

	/// Unspent outputs paying any of `addresses`.
	async fn list_unspent(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<Vec<UnspentOutput>, BackendError>;

	/// Minimum spacing between two unspent refreshes, if the backend is rate limited.
	fn unspent_refresh_cooldown(&self) -> Option<Duration> {
		None
	}

	/// Look up a transaction; `Ok(None)` when the backend does not know it.
	async fn get_transaction(&self, txid: &str) -> Result<Option<ChainTransaction>, BackendError>;

	/// Ids of transactions currently paying `address`.
	async fn address_txids(&self, address: &str) -> Result<HashSet<String>, BackendError>;

	/// Fee rate in satoshis per kilobyte for inclusion within `target` blocks.
	///
	/// `Ok(None)` when the backend has no usable estimate.
	async fn estimate_fee_per_kb(&self, target: u32) -> Result<Option<u64>, BackendError>;

	/// Broadcast a serialized transaction.
	async fn push_tx(&self, tx_hex: &str) -> Result<(), BackendError>;

	/// Look up outpoints; spent or unknown outputs come back as `None`.
	async fn query_utxo_set(
		&self,
		outpoints: &[OutPoint],
		include_confirmations: bool,
	) -> Result<Vec<Option<UtxoInfo>>, BackendError>;
}
