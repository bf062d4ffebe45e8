//!
//! Full-node backend reached over JSON-RPC.
//!
//! The node keeps a watch-only view of the wallet under an account label, so
//! address discovery works by importing addresses and then reading the node's
//! own transaction history. Transport framing sits behind [`RpcTransport`];
//! [`HttpRpcTransport`] is the reqwest implementation used in production.

use super::client::BlockchainBackend;
use super::types::*;
use crate::utils::btc_to_sats;
use itertools::Itertools;
use rand::Rng;
use reqwest::Client;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Page size used when walking `listtransactions`.
const LIST_TRANSACTIONS_PAGE: usize = 1000;

/// RPC error code the node uses for an unknown transaction.
const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;

/// Raw JSON-RPC call interface.
///
/// Implementations must report an unreachable node as
/// [`BackendError::Connection`] and an error answer as [`BackendError::Rpc`].
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync {
	async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError>;
}

/// JSON-RPC over HTTP with basic authentication.
pub struct HttpRpcTransport {
	/// The underlying HTTP client.
	http_client: Client,
	/// Node RPC endpoint, e.g. `http://127.0.0.1:8332`.
	url: String,
	user: String,
	password: String,
	next_id: AtomicU64,
}

impl HttpRpcTransport {
	pub fn new(url: String, user: String, password: String) -> Result<Self, BackendError> {
		let http_client = Client::builder().timeout(Duration::from_secs(30)).build()?;

		Ok(Self {
			http_client,
			url,
			user,
			password,
			next_id: AtomicU64::new(0),
		})
	}
}

#[async_trait::async_trait]
impl RpcTransport for HttpRpcTransport {
	async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError> {
		let request_body = json!({
			"jsonrpc": "1.0",
			"id": self.next_id.fetch_add(1, Ordering::Relaxed),
			"method": method,
			"params": params,
		});

		let response = self
			.http_client
			.post(&self.url)
			.basic_auth(&self.user, Some(&self.password))
			.json(&request_body)
			.send()
			.await
			.map_err(|e| BackendError::Connection(e.to_string()))?;

		// The node reports RPC errors with a non-2xx status and a JSON body,
		// so the body is parsed before the status is looked at.
		let status = response.status();
		let response_json: Value = match response.json().await {
			Ok(value) => value,
			Err(e) if status.is_success() => return Err(BackendError::Malformed(e.to_string())),
			Err(_) => {
				return Err(BackendError::Connection(format!(
					"HTTP error: {}",
					status
				)));
			}
		};

		match response_json.get("error") {
			Some(error) if !error.is_null() => Err(BackendError::Rpc {
				code: error.get("code").and_then(Value::as_i64).unwrap_or_default(),
				message: error
					.get("message")
					.and_then(Value::as_str)
					.unwrap_or("unknown error")
					.to_string(),
			}),
			_ => Ok(response_json.get("result").cloned().unwrap_or(Value::Null)),
		}
	}
}

/// Backend talking to a full node over JSON-RPC.
#[derive(Clone)]
pub struct NodeClient {
	transport: Arc<dyn RpcTransport>,
	network: Network,
	/// Extra positional arguments passed to `listunspent`.
	listunspent_args: Vec<Value>,
}

impl NodeClient {
	/// Connect and verify the node runs on `network`.
	///
	/// # Errors
	/// [`BackendError::FatalConfig`] when the node reports another chain.
	pub async fn connect(
		transport: Arc<dyn RpcTransport>,
		network: Network,
	) -> Result<Self, BackendError> {
		let info = transport.call("getblockchaininfo", json!([])).await?;
		let chain = info
			.get("chain")
			.and_then(Value::as_str)
			.ok_or_else(|| BackendError::malformed("getblockchaininfo without chain"))?;

		match Network::from_node_chain(chain) {
			Some(actual) if actual == network => {}
			_ => {
				return Err(BackendError::FatalConfig(format!(
					"wrong network configured: wallet uses {}, node reports {}",
					network, chain
				)));
			}
		}

		info!("Connected to node on {}", network);
		Ok(Self {
			transport,
			network,
			listunspent_args: Vec::new(),
		})
	}

	/// Set extra positional arguments for `listunspent` (e.g. `[0]` to include
	/// unconfirmed outputs).
	pub fn with_listunspent_args(mut self, args: Vec<Value>) -> Self {
		self.listunspent_args = args;
		self
	}

	pub fn network(&self) -> Network {
		self.network
	}

	/// Issue one RPC call, logging everything except calls carrying secrets or
	/// large import batches.
	pub async fn rpc(&self, method: &str, params: Value) -> Result<Value, BackendError> {
		if !matches!(method, "importaddress" | "walletpassphrase") {
			debug!("rpc: {} {}", method, params);
		}
		self.transport.call(method, params).await
	}

	/// Label (account) the node files `address` under; empty when unknown.
	pub async fn address_label(&self, address: &str) -> Result<String, BackendError> {
		let label = self.rpc("getaccount", json!([address])).await?;
		Ok(label.as_str().unwrap_or_default().to_string())
	}

	/// Watch a single address without rescanning.
	pub async fn import_address(&self, address: &str, label: &str) -> Result<(), BackendError> {
		self.rpc("importaddress", json!([address, label, false])).await?;
		Ok(())
	}

	pub async fn block_count(&self) -> Result<u64, BackendError> {
		self.rpc("getblockcount", json!([]))
			.await?
			.as_u64()
			.ok_or_else(|| BackendError::malformed("getblockcount did not return a number"))
	}

	async fn estimate_fee_btc_per_kb(&self, target: u32) -> Result<f64, BackendError> {
		self.rpc("estimatefee", json!([target]))
			.await?
			.as_f64()
			.ok_or_else(|| BackendError::malformed("estimatefee did not return a number"))
	}
}

fn parse_sats(value: Option<&Value>, what: &str) -> Result<u64, BackendError> {
	value
		.and_then(Value::as_f64)
		.map(btc_to_sats)
		.ok_or_else(|| BackendError::Malformed(format!("missing amount in {}", what)))
}

fn string_set(value: &Value) -> HashSet<String> {
	value
		.as_array()
		.map(|items| {
			items
				.iter()
				.filter_map(Value::as_str)
				.map(str::to_string)
				.collect()
		})
		.unwrap_or_default()
}

#[async_trait::async_trait]
impl BlockchainBackend for NodeClient {
	fn kind(&self) -> BackendKind {
		BackendKind::Node
	}

	fn name(&self) -> &'static str {
		"NodeClient"
	}

	async fn tracked_addresses(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		let addresses = self.rpc("getaddressesbyaccount", json!([label])).await?;
		Ok(Some(string_set(&addresses)))
	}

	async fn import_addresses(&self, label: &str, addresses: &[String]) -> Result<(), BackendError> {
		info!(
			"Importing {} addresses into account {}",
			addresses.len(),
			label
		);
		for address in addresses {
			self.import_address(address, label).await?;
		}
		Ok(())
	}

	async fn is_watched(&self, address: &str) -> Result<bool, BackendError> {
		Ok(!self.address_label(address).await?.is_empty())
	}

	async fn address_history(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		let mut used = HashSet::new();
		let mut skip = 0usize;

		// Keep paging while the node hands back full pages.
		loop {
			let page = self
				.rpc(
					"listtransactions",
					json!([label, LIST_TRANSACTIONS_PAGE, skip, true]),
				)
				.await?;
			let entries = page
				.as_array()
				.ok_or_else(|| BackendError::malformed("listtransactions did not return a list"))?;

			used.extend(
				entries
					.iter()
					.filter(|tx| tx.get("category").and_then(Value::as_str) == Some("receive"))
					.filter_map(|tx| tx.get("address").and_then(Value::as_str))
					.map(str::to_string),
			);

			skip += entries.len();
			if entries.len() < LIST_TRANSACTIONS_PAGE {
				break;
			}
		}

		debug!("Node reports {} used addresses under {}", used.len(), label);
		Ok(Some(used))
	}

	async fn address_usage(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<HashSet<String>, BackendError> {
		let history = self.address_history(label).await?.unwrap_or_default();
		Ok(addresses
			.iter()
			.filter(|address| history.contains(*address))
			.cloned()
			.collect())
	}

	async fn used_address_set(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		let groupings = self.rpc("listaddressgroupings", json!([])).await?;
		let groups = groupings
			.as_array()
			.ok_or_else(|| BackendError::malformed("listaddressgroupings did not return a list"))?;

		// Each entry is [address, amount, label?]; flatten groups and drop duplicates.
		let used: HashSet<String> = groups
			.iter()
			.filter_map(Value::as_array)
			.flatten()
			.filter_map(Value::as_array)
			.filter(|entry| entry.get(2).and_then(Value::as_str) == Some(label))
			.filter_map(|entry| entry.first().and_then(Value::as_str))
			.unique()
			.map(str::to_string)
			.collect();

		info!("Fast sync in progress, node reports {} used addresses", used.len());
		Ok(Some(used))
	}

	async fn list_unspent(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<Vec<UnspentOutput>, BackendError> {
		let wanted: HashSet<&str> = addresses.iter().map(String::as_str).collect();
		let unspent = self
			.rpc("listunspent", Value::Array(self.listunspent_args.clone()))
			.await?;
		let entries = unspent
			.as_array()
			.ok_or_else(|| BackendError::malformed("listunspent did not return a list"))?;

		let mut outputs = Vec::new();
		for entry in entries {
			let entry_label = entry
				.get("account")
				.or_else(|| entry.get("label"))
				.and_then(Value::as_str);
			if entry_label != Some(label) {
				continue;
			}
			let Some(address) = entry.get("address").and_then(Value::as_str) else {
				continue;
			};
			if !wanted.contains(address) {
				continue;
			}
			let txid = entry
				.get("txid")
				.and_then(Value::as_str)
				.ok_or_else(|| BackendError::malformed("listunspent entry without txid"))?;
			let vout = entry
				.get("vout")
				.and_then(Value::as_u64)
				.ok_or_else(|| BackendError::malformed("listunspent entry without vout"))?;
			let vout = u32::try_from(vout)
				.map_err(|_| BackendError::malformed(format!("listunspent vout {} out of range", vout)))?;

			outputs.push(UnspentOutput {
				txid: txid.to_string(),
				vout,
				address: address.to_string(),
				value: parse_sats(entry.get("amount"), "listunspent")?,
			});
		}
		Ok(outputs)
	}

	async fn get_transaction(&self, txid: &str) -> Result<Option<ChainTransaction>, BackendError> {
		let raw = match self.rpc("getrawtransaction", json!([txid, 1])).await {
			Ok(raw) => raw,
			Err(BackendError::Rpc { code, message }) if code == RPC_INVALID_ADDRESS_OR_KEY => {
				debug!("transaction {} not found: {}", txid, message);
				return Ok(None);
			}
			Err(e) => return Err(e),
		};

		let vouts = raw
			.get("vout")
			.and_then(Value::as_array)
			.ok_or_else(|| BackendError::malformed("getrawtransaction without vout"))?;
		let outputs = vouts
			.iter()
			.map(|vout| {
				let script = vout
					.get("scriptPubKey")
					.and_then(|spk| spk.get("hex"))
					.and_then(Value::as_str)
					.ok_or_else(|| BackendError::malformed("vout without scriptPubKey hex"))?;
				Ok(TxOutput::new(script, parse_sats(vout.get("value"), "vout")?))
			})
			.collect::<Result<Vec<_>, BackendError>>()?;

		let confirmations = raw
			.get("confirmations")
			.and_then(Value::as_u64)
			.unwrap_or(0);
		let block_height = if confirmations > 0 {
			Some((self.block_count().await? + 1).saturating_sub(confirmations))
		} else {
			None
		};

		Ok(Some(ChainTransaction {
			txid: txid.to_string(),
			outputs,
			block_height,
			confirmations,
		}))
	}

	async fn address_txids(&self, address: &str) -> Result<HashSet<String>, BackendError> {
		let unspent = self
			.rpc("listunspent", json!([0, 9_999_999, [address]]))
			.await?;
		Ok(unspent
			.as_array()
			.map(|entries| {
				entries
					.iter()
					.filter_map(|entry| entry.get("txid").and_then(Value::as_str))
					.map(str::to_string)
					.collect()
			})
			.unwrap_or_default())
	}

	async fn estimate_fee_per_kb(&self, target: u32) -> Result<Option<u64>, BackendError> {
		let mut estimate = self.estimate_fee_btc_per_kb(target).await?;
		if target == 1 && estimate < 0.0 {
			// The top priority bucket sometimes has no data; the next one is a
			// better answer than a hardcoded default.
			debug!("no estimate for target 1, asking for target 2");
			estimate = self.estimate_fee_btc_per_kb(target + 1).await?;
		}
		if estimate < 0.0 {
			return Ok(None);
		}
		Ok(Some(btc_to_sats(estimate)))
	}

	async fn push_tx(&self, tx_hex: &str) -> Result<(), BackendError> {
		match self.rpc("sendrawtransaction", json!([tx_hex])).await {
			Ok(_) => Ok(()),
			Err(e) => {
				info!("error pushing transaction: {}", e);
				Err(e)
			}
		}
	}

	async fn query_utxo_set(
		&self,
		outpoints: &[OutPoint],
		include_confirmations: bool,
	) -> Result<Vec<Option<UtxoInfo>>, BackendError> {
		let mut result = Vec::with_capacity(outpoints.len());
		for outpoint in outpoints {
			let txout = self
				.rpc("gettxout", json!([outpoint.txid, outpoint.vout, false]))
				.await?;
			if txout.is_null() {
				result.push(None);
				continue;
			}

			let script_pub_key = txout
				.get("scriptPubKey")
				.ok_or_else(|| BackendError::malformed("gettxout without scriptPubKey"))?;
			let address = script_pub_key
				.get("address")
				.and_then(Value::as_str)
				.or_else(|| {
					script_pub_key
						.get("addresses")
						.and_then(|a| a.get(0))
						.and_then(Value::as_str)
				})
				.unwrap_or_default();
			let script = script_pub_key
				.get("hex")
				.and_then(Value::as_str)
				.unwrap_or_default();

			result.push(Some(UtxoInfo {
				value: parse_sats(txout.get("value"), "gettxout")?,
				address: address.to_string(),
				script: script.to_string(),
				confirmations: include_confirmations
					.then(|| txout.get("confirmations").and_then(Value::as_u64).unwrap_or(0)),
			}));
		}
		Ok(result)
	}
}

/// Operations that only make sense against a regtest node.
#[async_trait::async_trait]
pub trait RegtestControls: Send + Sync {
	/// Mine `blocks` blocks.
	async fn tick_forward_chain(&self, blocks: u32) -> Result<(), BackendError>;

	/// Pay `amount_btc` from the node's own wallet to `address`, then mine a
	/// block; returns the funding txid.
	async fn grab_coins(&self, address: &str, amount_btc: f64) -> Result<String, BackendError>;

	/// Total received by each address in satoshis, importing the addresses as
	/// watch-only first.
	async fn received_by_address(
		&self,
		addresses: &[String],
	) -> Result<Vec<(String, u64)>, BackendError>;
}

/// Knobs for regtest test runs.
#[derive(Debug, Clone)]
pub struct RegtestSettings {
	/// Probability in `[0, 1]` that `push_tx` silently drops the broadcast.
	pub pushtx_failure_prob: f64,
	/// Delay before mining one block after each broadcast; `None` disables it.
	pub tick_forward_chain_interval: Option<Duration>,
	/// When set, fee estimation returns this absurd rate.
	pub absurd_fee_per_kb: Option<u64>,
}

impl Default for RegtestSettings {
	fn default() -> Self {
		Self {
			pushtx_failure_prob: 0.0,
			tick_forward_chain_interval: Some(Duration::from_secs(2)),
			absurd_fee_per_kb: None,
		}
	}
}

/// A [`NodeClient`] on regtest with the [`RegtestControls`] capability.
#[derive(Clone)]
pub struct RegtestNode {
	node: NodeClient,
	settings: RegtestSettings,
}

/// Largest amount `grab_coins` will hand out.
const GRAB_COINS_LIMIT_BTC: f64 = 500.0;

impl RegtestNode {
	pub async fn connect(
		transport: Arc<dyn RpcTransport>,
		settings: RegtestSettings,
	) -> Result<Self, BackendError> {
		let node = NodeClient::connect(transport, Network::Regtest).await?;
		Ok(Self { node, settings })
	}

	pub fn node(&self) -> &NodeClient {
		&self.node
	}

	pub fn settings(&self) -> &RegtestSettings {
		&self.settings
	}
}

#[async_trait::async_trait]
impl RegtestControls for RegtestNode {
	async fn tick_forward_chain(&self, blocks: u32) -> Result<(), BackendError> {
		match self.node.rpc("generate", json!([blocks])).await {
			Ok(_) => Ok(()),
			Err(BackendError::Connection(e)) => {
				// The daemon is routinely shut down at the end of test runs.
				warn!("Failed to generate blocks, node looks shut down: {}", e);
				Ok(())
			}
			Err(e) => Err(e),
		}
	}

	async fn grab_coins(&self, address: &str, amount_btc: f64) -> Result<String, BackendError> {
		if amount_btc > GRAB_COINS_LIMIT_BTC {
			return Err(BackendError::FatalConfig(format!(
				"refusing to grab {} coins, limit is {}",
				amount_btc, GRAB_COINS_LIMIT_BTC
			)));
		}
		let txid = self
			.node
			.rpc("sendtoaddress", json!([address, amount_btc]))
			.await?;
		let txid = txid
			.as_str()
			.filter(|t| !t.is_empty())
			.ok_or_else(|| BackendError::malformed("sendtoaddress returned no txid"))?
			.to_string();
		self.tick_forward_chain(1).await?;
		Ok(txid)
	}

	async fn received_by_address(
		&self,
		addresses: &[String],
	) -> Result<Vec<(String, u64)>, BackendError> {
		let mut received = Vec::with_capacity(addresses.len());
		for address in addresses {
			// Fails harmlessly when the address is already watched.
			if let Err(e) = self.node.rpc("importaddress", json!([address, "watchonly"])).await {
				debug!("importaddress {} failed: {}", address, e);
			}
			let amount = self
				.node
				.rpc("getreceivedbyaddress", json!([address]))
				.await?;
			let sats = amount
				.as_f64()
				.map(btc_to_sats)
				.ok_or_else(|| BackendError::malformed("getreceivedbyaddress did not return a number"))?;
			received.push((address.clone(), sats));
		}
		Ok(received)
	}
}

#[async_trait::async_trait]
impl BlockchainBackend for RegtestNode {
	fn kind(&self) -> BackendKind {
		BackendKind::Node
	}

	fn name(&self) -> &'static str {
		"RegtestNode"
	}

	async fn tracked_addresses(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		self.node.tracked_addresses(label).await
	}

	async fn import_addresses(&self, label: &str, addresses: &[String]) -> Result<(), BackendError> {
		self.node.import_addresses(label, addresses).await
	}

	async fn is_watched(&self, address: &str) -> Result<bool, BackendError> {
		self.node.is_watched(address).await
	}

	async fn address_history(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		self.node.address_history(label).await
	}

	async fn address_usage(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<HashSet<String>, BackendError> {
		self.node.address_usage(label, addresses).await
	}

	async fn used_address_set(
		&self,
		label: &str,
	) -> Result<Option<HashSet<String>>, BackendError> {
		self.node.used_address_set(label).await
	}

	async fn list_unspent(
		&self,
		label: &str,
		addresses: &[String],
	) -> Result<Vec<UnspentOutput>, BackendError> {
		self.node.list_unspent(label, addresses).await
	}

	async fn get_transaction(&self, txid: &str) -> Result<Option<ChainTransaction>, BackendError> {
		self.node.get_transaction(txid).await
	}

	async fn address_txids(&self, address: &str) -> Result<HashSet<String>, BackendError> {
		self.node.address_txids(address).await
	}

	async fn estimate_fee_per_kb(&self, target: u32) -> Result<Option<u64>, BackendError> {
		match self.settings.absurd_fee_per_kb {
			Some(absurd) => Ok(Some(absurd)),
			None => self.node.estimate_fee_per_kb(target).await,
		}
	}

	async fn push_tx(&self, tx_hex: &str) -> Result<(), BackendError> {
		let drop_broadcast = self.settings.pushtx_failure_prob > 0.0
			&& rand::rng().random::<f64>() < self.settings.pushtx_failure_prob;
		if drop_broadcast {
			info!(
				"randomly not broadcasting {:.1}% of the time",
				self.settings.pushtx_failure_prob * 100.0
			);
			return Ok(());
		}

		let result = self.node.push_tx(tx_hex).await;

		if let Some(interval) = self.settings.tick_forward_chain_interval {
			let regtest = self.clone();
			tokio::spawn(async move {
				tokio::time::sleep(interval).await;
				if let Err(e) = regtest.tick_forward_chain(1).await {
					warn!("Failed to tick chain forward after broadcast: {}", e);
				}
			});
		} else {
			debug!("not ticking forward chain");
		}

		result
	}

	async fn query_utxo_set(
		&self,
		outpoints: &[OutPoint],
		include_confirmations: bool,
	) -> Result<Vec<Option<UtxoInfo>>, BackendError> {
		self.node
			.query_utxo_set(outpoints, include_confirmations)
			.await
	}
}
