//! Transaction codec seam and output fingerprints.
//!
//! Script/address encoding and transaction (de)serialization belong to an
//! external codec; this crate only needs the narrow [`TxCodec`] interface. The
//! [`OutputFingerprint`] identifies a broadcast transaction by what it pays,
//! before its txid is known.

use super::types::{BackendError, TxOutput};

/// Encoding operations the sync engine borrows from an external codec.
pub trait TxCodec: Send + Sync {
    /// Render an output script (hex) as an address on the configured network.
    fn script_to_address(&self, script: &str) -> Result<String, BackendError>;
}

/// Multiset of `(script, value)` pairs among a transaction's outputs.
///
/// Stored sorted so that equality is multiset equality regardless of output
/// order.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OutputFingerprint(Vec<TxOutput>);

impl OutputFingerprint {
    pub fn new(outputs: impl IntoIterator<Item = TxOutput>) -> Self {
        let mut outputs: Vec<TxOutput> = outputs.into_iter().collect();
        outputs.sort();
        Self(outputs)
    }

    pub fn outputs(&self) -> &[TxOutput] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True when `outputs` pays exactly the same multiset as this fingerprint.
    pub fn matches(&self, outputs: &[TxOutput]) -> bool {
        if outputs.len() != self.0.len() {
            return false;
        }
        let mut sorted = outputs.to_vec();
        sorted.sort();
        sorted == self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_does_not_matter() {
        let a = OutputFingerprint::new(vec![TxOutput::new("aa", 5000), TxOutput::new("bb", 3000)]);
        let b = OutputFingerprint::new(vec![TxOutput::new("bb", 3000), TxOutput::new("aa", 5000)]);
        assert_eq!(a, b);
        assert!(a.matches(&[TxOutput::new("bb", 3000), TxOutput::new("aa", 5000)]));
    }

    #[test]
    fn multiplicity_matters() {
        let fp = OutputFingerprint::new(vec![TxOutput::new("aa", 5000), TxOutput::new("aa", 5000)]);
        assert!(!fp.matches(&[TxOutput::new("aa", 5000)]));
        assert!(fp.matches(&[TxOutput::new("aa", 5000), TxOutput::new("aa", 5000)]));
    }

    #[test]
    fn extra_or_changed_outputs_are_rejected() {
        let fp = OutputFingerprint::new(vec![TxOutput::new("aa", 5000), TxOutput::new("bb", 3000)]);
        assert!(!fp.matches(&[
            TxOutput::new("aa", 5000),
            TxOutput::new("bb", 3000),
            TxOutput::new("cc", 1),
        ]));
        assert!(!fp.matches(&[TxOutput::new("aa", 5000), TxOutput::new("bb", 3001)]));
    }
}
