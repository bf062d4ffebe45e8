//! In-memory wallet state touched by synchronization.
//!
//! Per branch the wallet keeps `index`, the next unused derivation index, and
//! `index_cache`, a persisted low-water-mark the scanner never goes below.

use super::types::*;
use crate::backend::OutPoint;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::warn;

/// A wallet shared between tasks; the lock serializes syncs of one wallet.
pub type SharedWallet = Arc<tokio::sync::Mutex<Wallet>>;

pub struct Wallet {
	label: String,
	deriver: Arc<dyn AddressDeriver>,
	gap_limit: u32,
	/// Next unused index per mixdepth, `[external, change]`.
	index: Vec<[u32; 2]>,
	index_cache: Vec<[u32; 2]>,
	address_records: HashMap<String, AddressRecord>,
	unspent: HashMap<OutPoint, UnspentEntry>,
	spent_outpoints: HashSet<OutPoint>,
	imported_addresses: BTreeSet<String>,
}

impl Wallet {
	pub fn new(
		label: impl Into<String>,
		deriver: Arc<dyn AddressDeriver>,
		mixdepth_count: u32,
		gap_limit: u32,
	) -> Self {
		let branches = mixdepth_count as usize;
		Self {
			label: label.into(),
			deriver,
			gap_limit,
			index: vec![[0, 0]; branches],
			index_cache: vec![[0, 0]; branches],
			address_records: HashMap::new(),
			unspent: HashMap::new(),
			spent_outpoints: HashSet::new(),
			imported_addresses: BTreeSet::new(),
		}
	}

	/// Builder-style variant of [`Wallet::set_index_cache`].
	pub fn with_index_cache(mut self, cache: Vec<[u32; 2]>) -> Self {
		self.set_index_cache(cache);
		self
	}

	pub fn into_shared(self) -> SharedWallet {
		Arc::new(tokio::sync::Mutex::new(self))
	}

	/// Account label the node files this wallet's addresses under.
	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn gap_limit(&self) -> u32 {
		self.gap_limit
	}

	pub fn mixdepth_count(&self) -> u32 {
		self.index.len() as u32
	}

	/// Every branch, external before change, in mixdepth order.
	pub fn branches(&self) -> impl Iterator<Item = Branch> + use<> {
		(0..self.mixdepth_count())
			.flat_map(|mixdepth| [Branch::new(mixdepth, false), Branch::new(mixdepth, true)])
	}

	pub fn index(&self, branch: Branch) -> u32 {
		self.index
			.get(branch.mixdepth as usize)
			.map_or(0, |pair| pair[branch.slot()])
	}

	pub fn set_index(&mut self, branch: Branch, value: u32) {
		match self.index.get_mut(branch.mixdepth as usize) {
			Some(pair) => pair[branch.slot()] = value,
			None => warn!("Ignoring index update for unknown branch {}", branch),
		}
	}

	pub fn indices(&self) -> &[[u32; 2]] {
		&self.index
	}

	pub fn index_cache(&self, branch: Branch) -> u32 {
		self.index_cache
			.get(branch.mixdepth as usize)
			.map_or(0, |pair| pair[branch.slot()])
	}

	pub fn index_cache_all(&self) -> &[[u32; 2]] {
		&self.index_cache
	}

	/// Replace the low-water-marks; missing mixdepths are treated as zero and
	/// extra ones are dropped.
	pub fn set_index_cache(&mut self, mut cache: Vec<[u32; 2]>) {
		cache.resize(self.index.len(), [0, 0]);
		self.index_cache = cache;
	}

	/// True when any branch carries a non-zero low-water-mark.
	pub fn has_index_cache(&self) -> bool {
		self.index_cache.iter().flatten().any(|&i| i > 0)
	}

	/// Address at `(branch, index)`; pure, does not move the cursor.
	pub fn address_at(&self, branch: Branch, index: u32) -> Result<String, WalletSyncError> {
		if branch.mixdepth >= self.mixdepth_count() {
			return Err(WalletSyncError::DerivationError(format!(
				"unknown branch {}",
				branch
			)));
		}
		self.deriver.derive(branch, index)
	}

	/// Derive the address at the branch cursor and advance the cursor by one.
	pub fn next_new_address(&mut self, branch: Branch) -> Result<String, WalletSyncError> {
		let index = self.index(branch);
		let address = self.address_at(branch, index)?;
		self.set_index(branch, index + 1);
		Ok(address)
	}

	/// Remember that `address` was seen used. Existing records are never
	/// overwritten; returns whether a new record was added.
	pub fn record_address_use(&mut self, address: String, branch: Branch, index: u32) -> bool {
		if self.address_records.contains_key(&address) {
			return false;
		}
		self.address_records
			.insert(address, AddressRecord { branch, index });
		true
	}

	pub fn address_records(&self) -> &HashMap<String, AddressRecord> {
		&self.address_records
	}

	pub fn unspent(&self) -> &HashMap<OutPoint, UnspentEntry> {
		&self.unspent
	}

	pub fn replace_unspent(&mut self, unspent: HashMap<OutPoint, UnspentEntry>) {
		self.unspent = unspent;
	}

	/// Total unspent value in satoshis.
	pub fn balance(&self) -> u64 {
		self.unspent.values().map(|entry| entry.value).sum()
	}

	pub fn spent_outpoints(&self) -> &HashSet<OutPoint> {
		&self.spent_outpoints
	}

	/// Mark an outpoint as spent by a transaction the wallet made; it is
	/// dropped now and excluded from every future unspent refresh.
	pub fn mark_spent(&mut self, outpoint: OutPoint) {
		self.unspent.remove(&outpoint);
		self.spent_outpoints.insert(outpoint);
	}

	pub fn imported_addresses(&self) -> &BTreeSet<String> {
		&self.imported_addresses
	}

	/// Watch an address that is not derived from the wallet's seed.
	pub fn add_imported_address(&mut self, address: impl Into<String>) {
		self.imported_addresses.insert(address.into());
	}

	/// Addresses whose outputs belong to the wallet: recorded plus imported.
	pub fn tracked_addresses(&self) -> Vec<String> {
		let tracked: BTreeSet<&String> = self
			.address_records
			.keys()
			.chain(self.imported_addresses.iter())
			.collect();
		tracked.into_iter().cloned().collect()
	}
}

impl std::fmt::Debug for Wallet {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Wallet")
			.field("label", &self.label)
			.field("gap_limit", &self.gap_limit)
			.field("index", &self.index)
			.field("index_cache", &self.index_cache)
			.field("address_records", &self.address_records.len())
			.field("unspent", &self.unspent.len())
			.finish()
	}
}
