//! Wallet state and its synchronization with a blockchain backend.

pub mod state;
pub mod sync;
pub mod types;

pub use state::{SharedWallet, Wallet};
pub use sync::{SyncReport, WalletSyncOrchestrator};
pub use types::*;
