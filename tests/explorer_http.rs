//! Explorer client against a local stand-in for the explorer web API.

mod common;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use common::TestCodec;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use wallet_chain_sync::backend::retry::RetryPolicy;
use wallet_chain_sync::backend::{
    BackendError, BlockchainBackend, ExplorerClient, ExplorerConfig, Network, OutPoint, TxOutput,
};

#[derive(Default)]
struct FakeExplorer {
    /// Requests to `/multiaddr` answered with a rate-limit error before succeeding.
    rate_limited: AtomicUsize,
    multiaddr_calls: AtomicUsize,
    /// Answer `/unspent` with the "no free outputs" message.
    no_unspent: bool,
}

type Shared = Arc<FakeExplorer>;

async fn multiaddr(
    State(state): State<Shared>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    state.multiaddr_calls.fetch_add(1, Ordering::SeqCst);
    let limited = state.rate_limited.load(Ordering::SeqCst);
    if limited > 0 {
        state.rate_limited.store(limited - 1, Ordering::SeqCst);
        return (StatusCode::TOO_MANY_REQUESTS, "Quota Exceeded").into_response();
    }
    let addresses: Vec<_> = query
        .get("active")
        .map(String::as_str)
        .unwrap_or_default()
        .split('|')
        .map(|address| {
            let n_tx = if address.ends_with("-used") { 3 } else { 0 };
            json!({ "address": address, "n_tx": n_tx })
        })
        .collect();
    axum::Json(json!({ "addresses": addresses })).into_response()
}

async fn unspent(State(state): State<Shared>) -> Response {
    if state.no_unspent {
        return (StatusCode::INTERNAL_SERVER_ERROR, "No free outputs to spend").into_response();
    }
    axum::Json(json!({
        "unspent_outputs": [
            { "tx_hash_big_endian": "aa", "tx_output_n": 0, "script": "s1", "value": 1000 },
            { "tx_hash_big_endian": "bb", "tx_output_n": 3, "script": "s2", "value": 2500 },
            { "tx_hash_big_endian": "cc", "tx_output_n": 1, "script": "s9", "value": 99 }
        ]
    }))
    .into_response()
}

async fn rawtx(Path(txid): Path<String>) -> Response {
    match txid.as_str() {
        "f00d" => axum::Json(json!({
            "hash": "f00d",
            "block_height": 100,
            "out": [
                { "script": "s1", "value": 5000, "addr": "explicit-addr", "spent": false },
                { "script": "s2", "value": 3000, "spent": true },
                { "script": "s3", "value": 700, "spent": false }
            ]
        }))
        .into_response(),
        "beef" => axum::Json(json!({
            "hash": "beef",
            "out": [{ "script": "s4", "value": 10, "spent": false }]
        }))
        .into_response(),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Transaction not found").into_response(),
    }
}

async fn rawaddr(Path(address): Path<String>) -> Response {
    let txs = if address == "busy" {
        json!([{ "hash": "t1" }, { "hash": "t2" }])
    } else {
        json!([])
    };
    axum::Json(json!({ "txs": txs })).into_response()
}

async fn block_count() -> &'static str {
    "105"
}

async fn fees() -> Response {
    axum::Json(json!({
        "high_fee_per_kb": 40000,
        "medium_fee_per_kb": 25000,
        "low_fee_per_kb": 10000
    }))
    .into_response()
}

async fn pushtx(body: String) -> Response {
    if body == "tx=00ff" {
        "Transaction Submitted".into_response()
    } else {
        (StatusCode::BAD_REQUEST, "Unable to decode transaction").into_response()
    }
}

async fn serve(state: FakeExplorer) -> (SocketAddr, Shared) {
    let state = Arc::new(state);
    let app = Router::new()
        .route("/multiaddr", get(multiaddr))
        .route("/unspent", get(unspent))
        .route("/rawtx/:txid", get(rawtx))
        .route("/rawaddr/:address", get(rawaddr))
        .route("/q/getblockcount", get(block_count))
        .route("/fees", get(fees))
        .route("/pushtx", post(pushtx))
        .with_state(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

fn client(addr: SocketAddr, batch_size: usize) -> ExplorerClient {
    let config = ExplorerConfig {
        base_url: format!("http://{}", addr),
        fee_url: format!("http://{}/fees", addr),
        batch_size,
        unspent_cooldown: Duration::from_secs(600),
        retry: RetryPolicy {
            rate_limit_cooldown: Duration::from_millis(10),
            transient_cooldown: Duration::from_millis(10),
            other_initial_interval: Duration::from_millis(1),
            other_max_interval: Duration::from_millis(5),
            max_attempts: 3,
        },
    };
    ExplorerClient::new(Network::Mainnet, Arc::new(TestCodec), config).unwrap()
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[test]
fn only_mainnet_is_supported() {
    let err = ExplorerClient::new(
        Network::Testnet,
        Arc::new(TestCodec),
        ExplorerConfig::default(),
    )
    .err()
    .unwrap();

    assert!(matches!(err, BackendError::FatalConfig(_)));
}

#[tokio::test]
async fn address_usage_is_batched() {
    let (addr, state) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 2);

    let used = explorer
        .address_usage("w", &strings(&["a-used", "b", "c", "d-used", "e"]))
        .await
        .unwrap();

    assert_eq!(used, HashSet::from(["a-used".to_string(), "d-used".to_string()]));
    assert_eq!(state.multiaddr_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rate_limits_are_retried() {
    let (addr, state) = serve(FakeExplorer {
        rate_limited: AtomicUsize::new(2),
        ..FakeExplorer::default()
    })
    .await;
    let explorer = client(addr, 20);

    let used = explorer
        .address_usage("w", &strings(&["x-used"]))
        .await
        .unwrap();

    assert_eq!(used.len(), 1);
    assert_eq!(state.multiaddr_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn retries_are_bounded() {
    let (addr, state) = serve(FakeExplorer {
        rate_limited: AtomicUsize::new(100),
        ..FakeExplorer::default()
    })
    .await;
    let explorer = client(addr, 20);

    let err = explorer
        .address_usage("w", &strings(&["x"]))
        .await
        .unwrap_err();

    assert!(matches!(err, BackendError::RetriesExhausted { attempts: 3, .. }));
    assert_eq!(state.multiaddr_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn unspent_outputs_are_mapped_to_wanted_addresses() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    let mut outputs = explorer
        .list_unspent("w", &strings(&["addr-of-s1", "addr-of-s2"]))
        .await
        .unwrap();
    outputs.sort_by(|a, b| a.txid.cmp(&b.txid));

    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0].txid, "aa");
    assert_eq!(outputs[0].address, "addr-of-s1");
    assert_eq!(outputs[1].vout, 3);
    assert_eq!(outputs[1].value, 2500);
    assert_eq!(explorer.unspent_refresh_cooldown(), Some(Duration::from_secs(600)));
}

#[tokio::test]
async fn no_free_outputs_means_empty() {
    let (addr, _) = serve(FakeExplorer {
        no_unspent: true,
        ..FakeExplorer::default()
    })
    .await;
    let explorer = client(addr, 20);

    let outputs = explorer
        .list_unspent("w", &strings(&["addr-of-s1"]))
        .await
        .unwrap();

    assert!(outputs.is_empty());
}

#[tokio::test]
async fn transactions_report_depth_from_the_tip() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    let confirmed = explorer.get_transaction("f00d").await.unwrap().unwrap();
    assert_eq!(confirmed.confirmations, 6);
    assert_eq!(confirmed.block_height, Some(100));
    assert_eq!(confirmed.outputs[0], TxOutput::new("s1", 5000));

    let mempool = explorer.get_transaction("beef").await.unwrap().unwrap();
    assert_eq!(mempool.confirmations, 0);
    assert_eq!(mempool.block_height, None);

    assert_eq!(explorer.get_transaction("dead").await.unwrap(), None);
}

#[tokio::test]
async fn address_txids_come_from_the_address_page() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    let txids = explorer.address_txids("busy").await.unwrap();

    assert_eq!(txids, HashSet::from(["t1".to_string(), "t2".to_string()]));
    assert!(explorer.address_txids("quiet").await.unwrap().is_empty());
}

#[tokio::test]
async fn fee_tiers_follow_the_target() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    assert_eq!(explorer.estimate_fee_per_kb(1).await.unwrap(), Some(40000));
    assert_eq!(explorer.estimate_fee_per_kb(3).await.unwrap(), Some(25000));
    assert_eq!(explorer.estimate_fee_per_kb(12).await.unwrap(), Some(10000));
}

#[tokio::test]
async fn pushtx_reports_rejections() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    explorer.push_tx("00ff").await.unwrap();
    let err = explorer.push_tx("0bad").await.unwrap_err();

    assert!(matches!(err, BackendError::Rpc { code: 400, .. }));
}

#[tokio::test]
async fn utxo_queries_skip_spent_and_missing_outputs() {
    let (addr, _) = serve(FakeExplorer::default()).await;
    let explorer = client(addr, 20);

    let results = explorer
        .query_utxo_set(
            &[
                OutPoint::new("f00d", 0),
                OutPoint::new("f00d", 1),
                OutPoint::new("f00d", 2),
                OutPoint::new("f00d", 7),
                OutPoint::new("dead", 0),
            ],
            true,
        )
        .await
        .unwrap();

    let first = results[0].as_ref().unwrap();
    assert_eq!(first.address, "explicit-addr");
    assert_eq!(first.confirmations, Some(6));
    assert!(results[1].is_none());
    assert_eq!(results[2].as_ref().unwrap().address, "addr-of-s3");
    assert!(results[3].is_none());
    assert!(results[4].is_none());
}
