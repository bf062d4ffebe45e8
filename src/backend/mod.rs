//! Blockchain backend integration
//!
//! This module provides the backend capability trait and its two families: a
//! full node reached over JSON-RPC and a block explorer reached over HTTP. The
//! wallet sync engine and the confirmation trackers only ever talk to
//! `dyn BlockchainBackend`.

/// The capability trait every backend implements
mod client;
/// Transaction codec seam and output fingerprints
mod codec;
/// Block-explorer HTTP backend
mod explorer;
/// Full-node JSON-RPC backend and regtest controls
mod node;
/// Failure classification and bounded retries
pub mod retry;
/// Type definitions shared by backends
mod types;

pub use client::BlockchainBackend;
pub use codec::{OutputFingerprint, TxCodec};
pub use explorer::{ExplorerClient, ExplorerConfig};
pub use node::{HttpRpcTransport, NodeClient, RegtestControls, RegtestNode, RegtestSettings, RpcTransport};
pub use types::*;
