//! Wallet Synchronization Module
//!
//! This module provides the services for synchronizing a wallet's address indices and unspent
//! outputs with a blockchain backend:
//!
//! - `orchestrator`: The main entry point and coordinator for wallet sync.
//! - `events`: Event types and handler traits used to report sync progress.
//! - `progress_tracker`: Counts scanned addresses and validates that every branch settled.
//! - `strategies`: The full gap-limit scan and the fast bulk-query scan.
//! - `unspent`: Rebuilds the unspent output set.
//! - `repositories`: Persists the per-branch index cache between runs.

/// Event system for decoupled communication during sync
pub mod events;
/// Main coordinator for the wallet sync process
pub mod orchestrator;
/// Tracks scan progress and statistics
pub mod progress_tracker;
/// Index cache persistence
pub mod repositories;
/// Address discovery strategies
pub mod strategies;
/// Unspent output synchronization
pub mod unspent;

pub use orchestrator::*;
