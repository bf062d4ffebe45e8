//!
//! Utility module for the wallet sync engine.
//!
//! Re-exports amount conversion and formatting helpers for use throughout the codebase.
/// Amount conversion and formatting
pub mod amount;

pub use amount::{btc_to_sats, format_btc, format_token_amount};
