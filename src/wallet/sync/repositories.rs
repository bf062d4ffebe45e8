use crate::wallet::WalletSyncError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// Repository for per-branch index low-water-marks
#[async_trait::async_trait]
pub trait IndexCacheRepository: Send + Sync {
	async fn save(&self, label: &str, index_cache: &[[u32; 2]]) -> Result<(), WalletSyncError>;
	async fn load(&self, label: &str) -> Result<Option<Vec<[u32; 2]>>, WalletSyncError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct IndexCacheFile {
	index_cache: Vec<[u32; 2]>,
	updated_at: String,
}

/// File-based implementation of IndexCacheRepository, one JSON file per wallet
pub struct FileIndexCacheRepository {
	data_dir: PathBuf,
}

impl FileIndexCacheRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn get_cache_filename(&self, label: &str) -> PathBuf {
		let safe_label: String = label
			.chars()
			.map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
			.collect();
		self.data_dir
			.join(format!("index_cache_{}.json", safe_label))
	}
}

#[async_trait::async_trait]
impl IndexCacheRepository for FileIndexCacheRepository {
	async fn save(&self, label: &str, index_cache: &[[u32; 2]]) -> Result<(), WalletSyncError> {
		let file = IndexCacheFile {
			index_cache: index_cache.to_vec(),
			updated_at: chrono::Utc::now().to_rfc3339(),
		};
		let content = serde_json::to_string_pretty(&file).map_err(|e| {
			WalletSyncError::PersistenceError(format!("Failed to serialize index cache: {}", e))
		})?;

		tokio::fs::create_dir_all(&self.data_dir).await?;
		let filename = self.get_cache_filename(label);
		tokio::fs::write(&filename, content).await.map_err(|e| {
			WalletSyncError::PersistenceError(format!("Failed to write index cache file: {}", e))
		})?;

		info!("Saved index cache to {:?}", filename);
		Ok(())
	}

	async fn load(&self, label: &str) -> Result<Option<Vec<[u32; 2]>>, WalletSyncError> {
		let filename = self.get_cache_filename(label);
		if !filename.exists() {
			return Ok(None);
		}

		let content = tokio::fs::read_to_string(&filename).await.map_err(|e| {
			WalletSyncError::PersistenceError(format!("Failed to read index cache file: {}", e))
		})?;
		match serde_json::from_str::<IndexCacheFile>(&content) {
			Ok(file) => {
				info!(
					"Loaded index cache from {:?} (updated {})",
					filename, file.updated_at
				);
				Ok(Some(file.index_cache))
			}
			Err(e) => {
				// A damaged cache only costs a slower scan.
				warn!("Ignoring unreadable index cache {:?}: {}", filename, e);
				Ok(None)
			}
		}
	}
}
