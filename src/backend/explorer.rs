//!
//! Block-explorer backend over the blockchain.info HTTP API.
//!
//! The explorer knows every address without imports, but it is rate limited and
//! flaky, so every request goes through [`with_retry`]. Fee estimates come from
//! a separate fee oracle that publishes high, medium and low tiers.

use super::client::BlockchainBackend;
use super::codec::TxCodec;
use super::retry::{FailureKind, RequestFailure, RetryPolicy, classify, with_retry};
use super::types::*;
use itertools::Itertools;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Explorer endpoints and request shaping.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
	/// Explorer API root, e.g. `https://blockchain.info`.
	pub base_url: String,
	/// Fee oracle endpoint returning `{high,medium,low}_fee_per_kb`.
	pub fee_url: String,
	/// Addresses per multi-address request.
	pub batch_size: usize,
	/// Minimum spacing between two unspent refreshes.
	pub unspent_cooldown: Duration,
	pub retry: RetryPolicy,
}

impl Default for ExplorerConfig {
	fn default() -> Self {
		Self {
			base_url: "https://blockchain.info".to_string(),
			fee_url: "https://api.blockcypher.com/v1/btc/main".to_string(),
			batch_size: 20,
			unspent_cooldown: Duration::from_secs(600),
			retry: RetryPolicy::default(),
		}
	}
}

#[derive(Debug, Deserialize)]
struct MultiAddrResponse {
	#[serde(default)]
	addresses: Vec<AddressSummary>,
}

#[derive(Debug, Deserialize)]
struct AddressSummary {
	address: String,
	n_tx: u64,
}

#[derive(Debug, Deserialize)]
struct RawAddrResponse {
	#[serde(default)]
	txs: Vec<TxHash>,
}

#[derive(Debug, Deserialize)]
struct TxHash {
	hash: String,
}

#[derive(Debug, Deserialize)]
struct UnspentResponse {
	#[serde(default)]
	unspent_outputs: Vec<ExplorerUnspent>,
}

#[derive(Debug, Deserialize)]
struct ExplorerUnspent {
	tx_hash_big_endian: String,
	tx_output_n: u32,
	script: String,
	value: u64,
}

#[derive(Debug, Deserialize)]
struct RawTxResponse {
	hash: String,
	#[serde(default)]
	block_height: Option<u64>,
	#[serde(default)]
	out: Vec<RawTxOutput>,
}

#[derive(Debug, Deserialize)]
struct RawTxOutput {
	script: String,
	value: u64,
	#[serde(default)]
	addr: Option<String>,
	#[serde(default)]
	spent: bool,
}

#[derive(Debug, Deserialize)]
struct FeeTiers {
	high_fee_per_kb: u64,
	medium_fee_per_kb: u64,
	low_fee_per_kb: u64,
}

/// Backend talking to a block-explorer web API.
#[derive(Clone)]
pub struct ExplorerClient {
	/// The underlying HTTP client.
	http_client: Client,
	codec: Arc<dyn TxCodec>,
	config: ExplorerConfig,
}

impl ExplorerClient {
	/// Create an explorer client.
	///
	/// # Errors
	/// [`BackendError::FatalConfig`] for any network but mainnet; the explorer
	/// only serves mainnet data.
	pub fn new(
		network: Network,
		codec: Arc<dyn TxCodec>,
		config: ExplorerConfig,
	) -> Result<Self, BackendError> {
		if network != Network::Mainnet {
			return Err(BackendError::FatalConfig(format!(
				"explorer backend only supports mainnet, configured for {}",
				network
			)));
		}
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			codec,
			config,
		})
	}

	pub fn config(&self) -> &ExplorerConfig {
		&self.config
	}

	/// Fetch `url` once and classify any failure.
	async fn fetch_text(&self, url: &str, query: &[(&str, String)]) -> Result<String, RequestFailure> {
		let response = self
			.http_client
			.get(url)
			.query(query)
			.send()
			.await
			.map_err(|e| RequestFailure::from_transport(&e))?;
		let status = response.status();
		let body = response
			.text()
			.await
			.map_err(|e| RequestFailure::from_transport(&e))?;

		let kind = classify(status, &body);
		if !status.is_success() || kind != FailureKind::Other {
			return Err(RequestFailure::new(kind, body.chars().take(200).collect::<String>()));
		}
		Ok(body)
	}

	async fn fetch_json<T: DeserializeOwned>(
		&self,
		url: &str,
		query: &[(&str, String)],
	) -> Result<T, RequestFailure> {
		let body = self.fetch_text(url, query).await?;
		serde_json::from_str(&body).map_err(|e| {
			RequestFailure::new(FailureKind::Transient, format!("malformed response: {}", e))
		})
	}

	/// `fetch_json` under the retry policy; `None` is the not-found sentinel.
	async fn get_json<T: DeserializeOwned>(
		&self,
		what: &str,
		path: &str,
		query: Vec<(&str, String)>,
	) -> Result<Option<T>, BackendError> {
		let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), path);
		with_retry(&self.config.retry, what, || self.fetch_json::<T>(&url, &query)).await
	}

	async fn raw_tx(&self, txid: &str) -> Result<Option<RawTxResponse>, BackendError> {
		self.get_json("rawtx", &format!("rawtx/{}", txid), Vec::new())
			.await
	}

	async fn block_count(&self) -> Result<u64, BackendError> {
		let url = format!("{}/q/getblockcount", self.config.base_url.trim_end_matches('/'));
		let text = with_retry(&self.config.retry, "getblockcount", || self.fetch_text(&url, &[]))
			.await?
			.ok_or_else(|| BackendError::malformed("explorer does not know the block count"))?;
		text.trim()
			.parse()
			.map_err(|_| BackendError::Malformed(format!("block count is not a number: {}", text)))
	}

	async fn fee_tiers(&self) -> Result<FeeTiers, BackendError> {
		let url = self.config.fee_url.clone();
		with_retry(&self.config.retry, "fee oracle", || self.fetch_json::<FeeTiers>(&url, &[]))
			.await?
			.ok_or_else(|| BackendError::malformed("fee oracle returned nothing"))
	}
}

#[async_trait::async_trait]
impl BlockchainBackend for ExplorerClient {
	fn kind(&self) -> BackendKind {
		BackendKind::Explorer
	}

	fn name(&self) -> &'static str {
		"ExplorerClient"
	}

	async fn address_usage(
		&self,
		_label: &str,
		addresses: &[String],
	) -> Result<HashSet<String>, BackendError> {
		let mut used = HashSet::new();
		for chunk in addresses.chunks(self.config.batch_size.max(1)) {
			let active = chunk.iter().join("|");
			let response: Option<MultiAddrResponse> = self
				.get_json("multiaddr", "multiaddr", vec![("active", active)])
				.await?;
			used.extend(
				response
					.map(|r| r.addresses)
					.unwrap_or_default()
					.into_iter()
					.filter(|summary| summary.n_tx > 0)
					.map(|summary| summary.address),
			);
		}
		debug!("{} of {} addresses used", used.len(), addresses.len());
		Ok(used)
	}

	async fn list_unspent(
		&self,
		_label: &str,
		addresses: &[String],
	) -> Result<Vec<UnspentOutput>, BackendError> {
		let mut outputs = Vec::new();
		for chunk in addresses.chunks(self.config.batch_size.max(1)) {
			let wanted: HashSet<&str> = chunk.iter().map(String::as_str).collect();
			let response: Option<UnspentResponse> = self
				.get_json("unspent", "unspent", vec![("active", chunk.iter().join("|"))])
				.await?;
			// "No free outputs to spend" is the not-found sentinel.
			let Some(response) = response else {
				continue;
			};

			for utxo in response.unspent_outputs {
				let address = match self.codec.script_to_address(&utxo.script) {
					Ok(address) => address,
					Err(e) => {
						warn!("Skipping output with unknown script {}: {}", utxo.script, e);
						continue;
					}
				};
				if !wanted.contains(address.as_str()) {
					continue;
				}
				outputs.push(UnspentOutput {
					txid: utxo.tx_hash_big_endian,
					vout: utxo.tx_output_n,
					address,
					value: utxo.value,
				});
			}
		}
		Ok(outputs)
	}

	fn unspent_refresh_cooldown(&self) -> Option<Duration> {
		Some(self.config.unspent_cooldown)
	}

	async fn get_transaction(&self, txid: &str) -> Result<Option<ChainTransaction>, BackendError> {
		let Some(raw) = self.raw_tx(txid).await? else {
			return Ok(None);
		};

		let confirmations = match raw.block_height {
			Some(height) => (self.block_count().await? + 1).saturating_sub(height),
			None => 0,
		};

		Ok(Some(ChainTransaction {
			txid: raw.hash,
			outputs: raw
				.out
				.into_iter()
				.map(|out| TxOutput::new(out.script, out.value))
				.collect(),
			block_height: raw.block_height,
			confirmations,
		}))
	}

	async fn address_txids(&self, address: &str) -> Result<HashSet<String>, BackendError> {
		let response: Option<RawAddrResponse> = self
			.get_json("rawaddr", &format!("rawaddr/{}", address), Vec::new())
			.await?;
		Ok(response
			.map(|r| r.txs.into_iter().map(|tx| tx.hash).collect())
			.unwrap_or_default())
	}

	async fn estimate_fee_per_kb(&self, target: u32) -> Result<Option<u64>, BackendError> {
		let tiers = self.fee_tiers().await?;
		let fee = if target <= 2 {
			tiers.high_fee_per_kb
		} else if target <= 4 {
			tiers.medium_fee_per_kb
		} else {
			tiers.low_fee_per_kb
		};
		debug!("fee oracle rate for target {}: {} sat/kB", target, fee);
		Ok(Some(fee))
	}

	async fn push_tx(&self, tx_hex: &str) -> Result<(), BackendError> {
		let url = format!("{}/pushtx", self.config.base_url.trim_end_matches('/'));
		let response = self
			.http_client
			.post(&url)
			.form(&[("tx", tx_hex)])
			.send()
			.await?;
		let status = response.status();
		let body = response.text().await?;

		if !status.is_success() {
			info!("explorer rejected transaction: {}", body);
			return Err(BackendError::Rpc {
				code: i64::from(status.as_u16()),
				message: body,
			});
		}
		debug!("pushtx answer: {}", body.trim());
		Ok(())
	}

	async fn query_utxo_set(
		&self,
		outpoints: &[OutPoint],
		include_confirmations: bool,
	) -> Result<Vec<Option<UtxoInfo>>, BackendError> {
		let tip = if include_confirmations {
			Some(self.block_count().await?)
		} else {
			None
		};

		let mut result = Vec::with_capacity(outpoints.len());
		for outpoint in outpoints {
			let Some(raw) = self.raw_tx(&outpoint.txid).await? else {
				result.push(None);
				continue;
			};
			let Some(out) = raw.out.get(outpoint.vout as usize) else {
				result.push(None);
				continue;
			};
			if out.spent {
				result.push(None);
				continue;
			}

			let address = match &out.addr {
				Some(addr) => addr.clone(),
				None => self.codec.script_to_address(&out.script)?,
			};
			let confirmations = tip.map(|tip| match raw.block_height {
				Some(height) => (tip + 1).saturating_sub(height),
				None => 0,
			});

			result.push(Some(UtxoInfo {
				value: out.value,
				address,
				script: out.script.clone(),
				confirmations,
			}));
		}
		Ok(result)
	}
}
