//! Wallet synchronization against a full node or a block explorer.
//!
//! - [`backend`]: the [`BlockchainBackend`](backend::BlockchainBackend) trait with node and
//!   explorer implementations.
//! - [`wallet`]: wallet state, gap-limit address discovery and unspent output sync.
//! - [`notify`]: confirmation tracking for broadcast transactions.
//! - [`fees`]: fee rate selection.
//! - [`config`]: environment-driven configuration.

pub mod backend;
pub mod config;
pub mod fees;
pub mod notify;
pub mod utils;
pub mod wallet;
