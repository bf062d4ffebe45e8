/// Satoshis per bitcoin.
pub const SATS_PER_BTC: u64 = 100_000_000;

/// Render an integer amount with `decimals` fractional digits.
pub fn format_token_amount(amount: u64, decimals: u32) -> String {
    format!(
        "{:.*}",
        decimals as usize,
        amount as f64 / 10f64.powi(decimals as i32)
    )
}

pub fn format_btc(sats: u64) -> String {
    format_token_amount(sats, 8)
}

/// Convert a node-reported BTC amount to satoshis, rounding to the nearest unit.
pub fn btc_to_sats(btc: f64) -> u64 {
    (btc * SATS_PER_BTC as f64).round().max(0.0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_node_amounts_without_float_drift() {
        assert_eq!(btc_to_sats(0.1), 10_000_000);
        assert_eq!(btc_to_sats(0.00000001), 1);
        assert_eq!(btc_to_sats(0.0003), 30_000);
        assert_eq!(btc_to_sats(-1.0), 0);
    }

    #[test]
    fn formats_satoshis() {
        assert_eq!(format_btc(150_000_000), "1.50000000");
        assert_eq!(format_token_amount(1234, 2), "12.34");
    }
}
