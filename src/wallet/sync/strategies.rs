use crate::backend::BlockchainBackend;
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};
use crate::wallet::sync::progress_tracker::ScanProgressTracker;
use crate::wallet::{Branch, Wallet, WalletSyncError};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// How a scan ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOutcome {
	/// Every branch index was settled.
	Completed,
	/// The backend cannot serve this strategy; the wallet was not touched.
	Unsupported,
}

/// Trait for different address discovery strategies
#[async_trait::async_trait]
pub trait ScanStrategy: Send + Sync {
	/// Settle the index of every branch of `wallet` and record used addresses
	async fn scan(
		&self,
		wallet: &mut Wallet,
		backend: &dyn BlockchainBackend,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut ScanProgressTracker,
	) -> Result<ScanOutcome, WalletSyncError>;

	/// Get the name of this strategy
	fn name(&self) -> &'static str;
}

/// Configuration for scan strategies
#[derive(Debug, Clone)]
pub struct ScanConfig {
	/// Most addresses derived per usage query
	pub batch_size: u32,
}

impl Default for ScanConfig {
	fn default() -> Self {
		Self { batch_size: 20 }
	}
}

/// Gap-limit scan walking each branch from index 0.
///
/// A branch stops once `gap_limit` consecutive addresses are unused and the
/// cursor has passed the branch's index cache. Against a node backend the scan
/// first makes sure the node watches every address it is going to look at.
pub struct FullScan {
	config: ScanConfig,
}

impl FullScan {
	pub fn new(config: ScanConfig) -> Self {
		Self { config }
	}

	fn batch_size(&self) -> u32 {
		self.config.batch_size.max(1)
	}

	/// Addresses a node must already watch before a scan can be trusted: a
	/// whole number of batches past each branch's cache, plus imported keys.
	fn required_imports(&self, wallet: &Wallet) -> Result<HashSet<String>, WalletSyncError> {
		let batch = self.batch_size();
		let has_cache = wallet.has_index_cache();
		let mut required = HashSet::new();

		for branch in wallet.branches() {
			let count = if has_cache {
				(wallet.index_cache(branch) / batch + 1) * batch
			} else {
				batch
			};
			for index in 0..count {
				required.insert(wallet.address_at(branch, index)?);
			}
		}
		required.extend(wallet.imported_addresses().iter().cloned());
		Ok(required)
	}

	async fn request_import(
		&self,
		wallet: &Wallet,
		backend: &dyn BlockchainBackend,
		addresses: Vec<String>,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut ScanProgressTracker,
	) -> WalletSyncError {
		let count = addresses.len();
		if let Err(e) = backend.import_addresses(wallet.label(), &addresses).await {
			return e.into();
		}
		progress_tracker.record_import(count);
		event_dispatcher
			.dispatch(&SyncEvent::ImportRequested { count })
			.await;
		WalletSyncError::InsufficientImport { imported: count }
	}
}

impl Default for FullScan {
	fn default() -> Self {
		Self::new(ScanConfig::default())
	}
}

impl FullScan {
	async fn walk_branches(
		&self,
		wallet: &mut Wallet,
		backend: &dyn BlockchainBackend,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut ScanProgressTracker,
	) -> Result<ScanOutcome, WalletSyncError> {
		let label = wallet.label().to_string();
		let batch_size = self.batch_size();

		let tracked = backend.tracked_addresses(&label).await?;
		if let Some(tracked) = &tracked {
			let missing: Vec<String> = self
				.required_imports(wallet)?
				.into_iter()
				.filter(|address| !tracked.contains(address))
				.collect();
			if !missing.is_empty() {
				info!(
					"Node does not watch {} wallet addresses yet, importing",
					missing.len()
				);
				return Err(self
					.request_import(wallet, backend, missing, event_dispatcher, progress_tracker)
					.await);
			}
		}

		// One history query serves every branch when the backend can answer it.
		let history = backend.address_history(&label).await?;

		let mut too_few: Vec<(Branch, u32)> = Vec::new();
		let branches: Vec<Branch> = wallet.branches().collect();

		for branch in branches {
			let gap_limit = wallet.gap_limit();
			let cache = wallet.index_cache(branch);
			let mut last_used: Option<u32> = None;
			let mut consecutive_unused = 0u32;
			let mut used_count = 0usize;
			let mut reached_untracked = false;

			wallet.set_index(branch, 0);

			'batches: loop {
				let start = wallet.index(branch);
				if consecutive_unused >= gap_limit && start >= cache {
					break;
				}

				let needed = gap_limit
					.saturating_sub(consecutive_unused)
					.max(cache.saturating_sub(start))
					.max(1);
				let count = needed.min(batch_size);

				let mut batch = Vec::with_capacity(count as usize);
				for _ in 0..count {
					batch.push(wallet.next_new_address(branch)?);
				}

				let used: HashSet<String> = match &history {
					Some(history) => {
						let used: HashSet<String> = batch
							.iter()
							.filter(|address| history.contains(*address))
							.cloned()
							.collect();
						progress_tracker.record_checked(batch.len(), used.len());
						used
					}
					None => {
						let used = backend.address_usage(&label, &batch).await?;
						progress_tracker.record_batch(batch.len(), used.len());
						used
					}
				};

				for (index, address) in (start..).zip(batch) {
					if let Some(tracked) = &tracked {
						if !tracked.contains(&address) {
							reached_untracked = true;
							break 'batches;
						}
					}
					if used.contains(&address) {
						last_used = Some(index);
						consecutive_unused = 0;
						used_count += 1;
						wallet.record_address_use(address, branch, index);
					} else {
						consecutive_unused += 1;
					}
				}
				progress_tracker.log_progress(false);
			}

			let next_index = last_used.map_or(0, |index| index + 1);
			if reached_untracked {
				// Park the cursor right after the last used address so the
				// import below covers the gap the scan could not see.
				wallet.set_index(branch, next_index);
				too_few.push((branch, next_index));
				continue;
			}

			let settled = next_index.max(cache);
			wallet.set_index(branch, settled);
			progress_tracker.record_branch_settled(branch, settled);
			debug!("Branch {} settled at index {}", branch, settled);
			event_dispatcher
				.dispatch(&SyncEvent::BranchScanned {
					branch,
					next_index: settled,
					used_addresses: used_count,
				})
				.await;
		}

		if !too_few.is_empty() {
			info!(
				"Too few addresses imported in branches {:?}",
				too_few.iter().map(|(b, i)| format!("{}@{}", b, i)).collect::<Vec<_>>()
			);
			let mut addresses = Vec::new();
			for (branch, next_index) in &too_few {
				for _ in 0..batch_size * 3 {
					addresses.push(wallet.next_new_address(*branch)?);
				}
				let cache = wallet.index_cache(*branch);
				wallet.set_index(*branch, (*next_index).max(cache));
			}
			return Err(self
				.request_import(wallet, backend, addresses, event_dispatcher, progress_tracker)
				.await);
		}

		progress_tracker.log_progress(true);
		Ok(ScanOutcome::Completed)
	}
}

#[async_trait::async_trait]
impl ScanStrategy for FullScan {
	async fn scan(
		&self,
		wallet: &mut Wallet,
		backend: &dyn BlockchainBackend,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut ScanProgressTracker,
	) -> Result<ScanOutcome, WalletSyncError> {
		let previous = wallet.indices().to_vec();
		match self
			.walk_branches(wallet, backend, event_dispatcher, progress_tracker)
			.await
		{
			// An import request parks the cursors on purpose.
			Err(e @ WalletSyncError::InsufficientImport { .. }) => Err(e),
			Err(e) => {
				// A failed walk can leave a cursor mid-branch, below handed-out addresses.
				let branches: Vec<Branch> = wallet.branches().collect();
				for branch in branches {
					let before = previous
						.get(branch.mixdepth as usize)
						.map_or(0, |pair| pair[branch.slot()]);
					wallet.set_index(branch, before.max(wallet.index_cache(branch)));
				}
				warn!("Full scan failed, restored branch indices: {}", e);
				Err(e)
			}
			result => result,
		}
	}

	fn name(&self) -> &'static str {
		"FullScan"
	}
}

/// Scan answering every branch from one bulk "used addresses" query.
///
/// Only looks at indices below `index_cache + gap_limit`, so it relies on the
/// cache being close to the truth.
#[derive(Default)]
pub struct FastScan;

#[async_trait::async_trait]
impl ScanStrategy for FastScan {
	async fn scan(
		&self,
		wallet: &mut Wallet,
		backend: &dyn BlockchainBackend,
		event_dispatcher: &mut EventDispatcher,
		progress_tracker: &mut ScanProgressTracker,
	) -> Result<ScanOutcome, WalletSyncError> {
		let used = match backend.used_address_set(wallet.label()).await? {
			Some(used) if !used.is_empty() => used,
			Some(_) => {
				info!("Backend reports no used addresses, fast scan not possible");
				return Ok(ScanOutcome::Unsupported);
			}
			None => {
				debug!("{} has no bulk address query", backend.name());
				return Ok(ScanOutcome::Unsupported);
			}
		};

		let branches: Vec<Branch> = wallet.branches().collect();
		for branch in branches {
			let cache = wallet.index_cache(branch);
			let limit = cache + wallet.gap_limit();
			let mut highest_used: Option<u32> = None;
			let mut used_count = 0usize;

			for index in 0..limit {
				let address = wallet.address_at(branch, index)?;
				if used.contains(&address) {
					highest_used = Some(index);
					used_count += 1;
					wallet.record_address_use(address, branch, index);
				}
			}

			let settled = highest_used.map_or(0, |index| index + 1).max(cache);
			wallet.set_index(branch, settled);
			progress_tracker.record_checked(limit as usize, used_count);
			progress_tracker.record_branch_settled(branch, settled);
			event_dispatcher
				.dispatch(&SyncEvent::BranchScanned {
					branch,
					next_index: settled,
					used_addresses: used_count,
				})
				.await;
		}

		progress_tracker.log_progress(true);
		Ok(ScanOutcome::Completed)
	}

	fn name(&self) -> &'static str {
		"FastScan"
	}
}
