//! Types shared by every blockchain backend implementation

use serde::{Deserialize, Serialize};
use std::fmt;

/// Which chain a wallet or backend is operating on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
}

impl Network {
    /// Map the `chain` field reported by a node's `getblockchaininfo`.
    pub fn from_node_chain(chain: &str) -> Option<Self> {
        match chain {
            "main" => Some(Network::Mainnet),
            "test" => Some(Network::Testnet),
            "regtest" => Some(Network::Regtest),
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
            Network::Regtest => "regtest",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" | "main" => Ok(Network::Mainnet),
            "testnet" | "test" => Ok(Network::Testnet),
            "regtest" => Ok(Network::Regtest),
            other => Err(format!("unknown network: {}", other)),
        }
    }
}

/// The family a backend belongs to; decides which confirmation strategy is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Full node reached over JSON-RPC, notifications pushed via webhook.
    Node,
    /// Block explorer web API, notifications discovered by polling.
    Explorer,
}

/// Reference to a transaction output, rendered as `txid:vout`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutPoint {
    pub txid: String,
    pub vout: u32,
}

impl OutPoint {
    pub fn new(txid: impl Into<String>, vout: u32) -> Self {
        Self {
            txid: txid.into(),
            vout,
        }
    }
}

impl fmt::Display for OutPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.vout)
    }
}

impl std::str::FromStr for OutPoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (txid, vout) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("outpoint without ':' separator: {}", s))?;
        if txid.is_empty() || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(format!("invalid txid in outpoint: {}", s));
        }
        let vout = vout
            .parse::<u32>()
            .map_err(|e| format!("invalid vout in outpoint {}: {}", s, e))?;
        Ok(OutPoint::new(txid, vout))
    }
}

/// One transaction output as seen on chain.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxOutput {
    /// The output script, hex encoded.
    pub script: String,
    /// The output value in satoshis.
    pub value: u64,
}

impl TxOutput {
    pub fn new(script: impl Into<String>, value: u64) -> Self {
        Self {
            script: script.into(),
            value,
        }
    }
}

/// A transaction as returned by a backend lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainTransaction {
    /// The transaction id, hex encoded.
    pub txid: String,
    /// All outputs in vout order.
    pub outputs: Vec<TxOutput>,
    /// Height of the including block, `None` while in the mempool.
    pub block_height: Option<u64>,
    /// Confirmation depth, 0 while in the mempool.
    pub confirmations: u64,
}

/// An unspent output reported by a backend for one of the wallet's addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspentOutput {
    pub txid: String,
    pub vout: u32,
    pub address: String,
    /// Value in satoshis.
    pub value: u64,
}

/// Result of looking up a single outpoint with `query_utxo_set`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoInfo {
    /// Value in satoshis.
    pub value: u64,
    pub address: String,
    pub script: String,
    /// Only filled when confirmations were requested.
    pub confirmations: Option<u64>,
}

/// Error types for backend operations
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend is configured for (or only supports) a different network.
    #[error("Fatal configuration error: {0}")]
    FatalConfig(String),

    /// The transport could not reach the backend at all.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend answered with a well-formed error response.
    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The backend answered with something we could not interpret.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// A bounded retry loop gave up.
    #[error("Gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl BackendError {
    pub fn malformed(what: impl Into<String>) -> Self {
        BackendError::Malformed(what.into())
    }
}
