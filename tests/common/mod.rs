//! Shared fakes for the integration tests.

#![allow(dead_code)]

use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wallet_chain_sync::backend::{
    BackendError, BackendKind, BlockchainBackend, ChainTransaction, OutPoint, RpcTransport,
    TxCodec, TxOutput, UnspentOutput, UtxoInfo,
};
use wallet_chain_sync::wallet::{AddressDeriver, Branch, Wallet, WalletSyncError};

/// Address the test deriver yields for `(mixdepth, change, index)`.
pub fn addr(mixdepth: u32, change: bool, index: u32) -> String {
    format!("addr/{}/{}/{}", mixdepth, u8::from(change), index)
}

/// Deterministic deriver counting how often it is asked.
#[derive(Default)]
pub struct TestDeriver {
    pub derivations: AtomicUsize,
}

impl AddressDeriver for TestDeriver {
    fn derive(&self, branch: Branch, index: u32) -> Result<String, WalletSyncError> {
        self.derivations.fetch_add(1, Ordering::SeqCst);
        Ok(addr(branch.mixdepth, branch.is_change, index))
    }
}

pub fn wallet(mixdepths: u32, gap_limit: u32) -> (Wallet, Arc<TestDeriver>) {
    let deriver = Arc::new(TestDeriver::default());
    let wallet = Wallet::new("test-wallet", deriver.clone(), mixdepths, gap_limit);
    (wallet, deriver)
}

/// Codec mapping a script to `addr-of-<script>`.
pub struct TestCodec;

impl TxCodec for TestCodec {
    fn script_to_address(&self, script: &str) -> Result<String, BackendError> {
        Ok(format!("addr-of-{}", script))
    }
}

/// In-memory backend whose answers are set by the test.
pub struct FakeBackend {
    pub kind: BackendKind,
    /// `Some` makes the backend behave like a node that needs imports.
    pub tracked: Mutex<Option<HashSet<String>>>,
    /// Node-style one-shot history; `None` forces per-batch usage queries.
    pub history: Mutex<Option<HashSet<String>>>,
    pub used: Mutex<HashSet<String>>,
    pub bulk_used: Mutex<Option<HashSet<String>>>,
    pub unspent: Mutex<Vec<UnspentOutput>>,
    pub cooldown: Option<Duration>,
    pub transactions: Mutex<HashMap<String, ChainTransaction>>,
    pub address_txids: Mutex<HashMap<String, HashSet<String>>>,
    pub watched: Mutex<HashSet<String>>,
    pub fees: Mutex<HashMap<u32, Option<u64>>>,
    pub fee_error: bool,
    pub imports: Mutex<Vec<(String, Vec<String>)>>,
    pub usage_calls: AtomicUsize,
    /// Usage queries past this many fail as if the explorer gave up.
    pub usage_fails_after: Option<usize>,
    pub list_unspent_calls: AtomicUsize,
    pub unspent_queries: Mutex<Vec<Vec<String>>>,
}

impl FakeBackend {
    pub fn new(kind: BackendKind) -> Self {
        Self {
            kind,
            tracked: Mutex::new(None),
            history: Mutex::new(None),
            used: Mutex::new(HashSet::new()),
            bulk_used: Mutex::new(None),
            unspent: Mutex::new(Vec::new()),
            cooldown: None,
            transactions: Mutex::new(HashMap::new()),
            address_txids: Mutex::new(HashMap::new()),
            watched: Mutex::new(HashSet::new()),
            fees: Mutex::new(HashMap::new()),
            fee_error: false,
            imports: Mutex::new(Vec::new()),
            usage_calls: AtomicUsize::new(0),
            usage_fails_after: None,
            list_unspent_calls: AtomicUsize::new(0),
            unspent_queries: Mutex::new(Vec::new()),
        }
    }

    pub fn explorer() -> Self {
        Self::new(BackendKind::Explorer)
    }

    pub fn node() -> Self {
        let backend = Self::new(BackendKind::Node);
        *backend.tracked.lock().unwrap() = Some(HashSet::new());
        *backend.history.lock().unwrap() = Some(HashSet::new());
        backend
    }

    pub fn with_used(self, addresses: impl IntoIterator<Item = String>) -> Self {
        let addresses: HashSet<String> = addresses.into_iter().collect();
        if let Some(history) = self.history.lock().unwrap().as_mut() {
            history.extend(addresses.iter().cloned());
        }
        self.used.lock().unwrap().extend(addresses);
        self
    }

    pub fn put_transaction(&self, tx: ChainTransaction) {
        self.transactions
            .lock()
            .unwrap()
            .insert(tx.txid.clone(), tx);
    }

    pub fn imported(&self) -> Vec<(String, Vec<String>)> {
        self.imports.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl BlockchainBackend for FakeBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn name(&self) -> &'static str {
        "FakeBackend"
    }

    async fn tracked_addresses(
        &self,
        _label: &str,
    ) -> Result<Option<HashSet<String>>, BackendError> {
        Ok(self.tracked.lock().unwrap().clone())
    }

    async fn import_addresses(&self, label: &str, addresses: &[String]) -> Result<(), BackendError> {
        self.imports
            .lock()
            .unwrap()
            .push((label.to_string(), addresses.to_vec()));
        if let Some(tracked) = self.tracked.lock().unwrap().as_mut() {
            tracked.extend(addresses.iter().cloned());
        }
        Ok(())
    }

    async fn is_watched(&self, address: &str) -> Result<bool, BackendError> {
        Ok(self.watched.lock().unwrap().contains(address))
    }

    async fn address_history(
        &self,
        _label: &str,
    ) -> Result<Option<HashSet<String>>, BackendError> {
        Ok(self.history.lock().unwrap().clone())
    }

    async fn address_usage(
        &self,
        _label: &str,
        addresses: &[String],
    ) -> Result<HashSet<String>, BackendError> {
        let call = self.usage_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.usage_fails_after.is_some_and(|limit| call > limit) {
            return Err(BackendError::RetriesExhausted {
                attempts: 10,
                last_error: "rate limited".to_string(),
            });
        }
        let used = self.used.lock().unwrap();
        Ok(addresses
            .iter()
            .filter(|address| used.contains(*address))
            .cloned()
            .collect())
    }

    async fn used_address_set(
        &self,
        _label: &str,
    ) -> Result<Option<HashSet<String>>, BackendError> {
        Ok(self.bulk_used.lock().unwrap().clone())
    }

    async fn list_unspent(
        &self,
        _label: &str,
        addresses: &[String],
    ) -> Result<Vec<UnspentOutput>, BackendError> {
        self.list_unspent_calls.fetch_add(1, Ordering::SeqCst);
        self.unspent_queries.lock().unwrap().push(addresses.to_vec());
        Ok(self
            .unspent
            .lock()
            .unwrap()
            .iter()
            .filter(|utxo| addresses.contains(&utxo.address))
            .cloned()
            .collect())
    }

    fn unspent_refresh_cooldown(&self) -> Option<Duration> {
        self.cooldown
    }

    async fn get_transaction(&self, txid: &str) -> Result<Option<ChainTransaction>, BackendError> {
        Ok(self.transactions.lock().unwrap().get(txid).cloned())
    }

    async fn address_txids(&self, address: &str) -> Result<HashSet<String>, BackendError> {
        Ok(self
            .address_txids
            .lock()
            .unwrap()
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn estimate_fee_per_kb(&self, target: u32) -> Result<Option<u64>, BackendError> {
        if self.fee_error {
            return Err(BackendError::Connection("fee source down".into()));
        }
        Ok(self.fees.lock().unwrap().get(&target).copied().flatten())
    }

    async fn push_tx(&self, _tx_hex: &str) -> Result<(), BackendError> {
        Ok(())
    }

    async fn query_utxo_set(
        &self,
        outpoints: &[OutPoint],
        _include_confirmations: bool,
    ) -> Result<Vec<Option<UtxoInfo>>, BackendError> {
        Ok(vec![None; outpoints.len()])
    }
}

/// Two-output transaction used by the confirmation tests.
pub fn two_output_tx(txid: &str, confirmations: u64) -> ChainTransaction {
    ChainTransaction {
        txid: txid.to_string(),
        outputs: vec![TxOutput::new("A", 5000), TxOutput::new("B", 3000)],
        block_height: (confirmations > 0).then_some(100),
        confirmations,
    }
}

pub fn two_outputs() -> Vec<TxOutput> {
    vec![TxOutput::new("B", 3000), TxOutput::new("A", 5000)]
}

type Reply = Result<Value, BackendError>;

/// JSON-RPC transport answering from queued replies per method.
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<HashMap<String, VecDeque<Reply>>>,
    pub calls: Mutex<Vec<(String, Value)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply; the last reply for a method is repeated once the queue drains.
    pub fn reply(&self, method: &str, reply: Reply) -> &Self {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn ok(&self, method: &str, value: Value) -> &Self {
        self.reply(method, Ok(value))
    }

    pub fn calls_to(&self, method: &str) -> Vec<Value> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

fn clone_reply(reply: &Reply) -> Reply {
    match reply {
        Ok(value) => Ok(value.clone()),
        Err(BackendError::Rpc { code, message }) => Err(BackendError::Rpc {
            code: *code,
            message: message.clone(),
        }),
        Err(e) => Err(BackendError::Connection(e.to_string())),
    }
}

#[async_trait::async_trait]
impl RpcTransport for ScriptedTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, BackendError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params));
        let mut replies = self.replies.lock().unwrap();
        let queue = replies
            .get_mut(method)
            .ok_or_else(|| BackendError::Rpc {
                code: -32601,
                message: format!("Method not found: {}", method),
            })?;
        if queue.len() > 1 {
            return queue.pop_front().unwrap();
        }
        queue
            .front()
            .map(clone_reply)
            .unwrap_or(Err(BackendError::Connection("no reply".into())))
    }
}
