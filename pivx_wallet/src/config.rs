//! Wallet-wide policy settings.

use pivx_primitives::{
    consensus::MAX_REORG_DEPTH,
    transaction::{
        components::Amount,
        fees::{FeeRate, DEFAULT_MIN_RELAY_TX_FEE, DEFAULT_SHIELDED_TXFEE_K},
    },
};

/// Maximum serialized size of a standard transaction once shielded transactions are
/// active.
pub const MAX_TX_SIZE_AFTER_SAPLING: usize = 400_000;

/// Number of witnesses kept per note: enough to undo the deepest allowed reorg.
pub const WITNESS_CACHE_SIZE: u32 = MAX_REORG_DEPTH + 1;

/// Confirmations required of shielded inputs unless the caller asks otherwise.
pub const DEFAULT_MIN_DEPTH: u32 = 5;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConfig {
    /// Minimum relay fee, per 1000 bytes.
    pub min_relay_fee_per_kb: Amount,
    /// Multiplier applied to the relay fee of transactions with shielded data.
    pub shielded_fee_k: u32,
    pub default_min_depth: u32,
    pub witness_cache_size: u32,
    pub max_tx_size: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        WalletConfig {
            min_relay_fee_per_kb: Amount::const_from_i64(DEFAULT_MIN_RELAY_TX_FEE),
            shielded_fee_k: DEFAULT_SHIELDED_TXFEE_K as u32,
            default_min_depth: DEFAULT_MIN_DEPTH,
            witness_cache_size: WITNESS_CACHE_SIZE,
            max_tx_size: MAX_TX_SIZE_AFTER_SAPLING,
        }
    }
}

impl WalletConfig {
    pub fn fee_rate(&self) -> FeeRate {
        FeeRate::per_kb(self.min_relay_fee_per_kb)
    }

    /// The minimum fee for a transaction of `size` bytes.
    pub fn required_fee(&self, size: usize, shielded: bool) -> Amount {
        let fee = self.fee_rate().fee(size);
        if shielded {
            (fee * self.shielded_fee_k as usize).unwrap_or(fee)
        } else {
            fee
        }
    }
}

#[cfg(test)]
mod tests {
    use pivx_primitives::transaction::components::Amount;

    use super::WalletConfig;

    #[test]
    fn defaults_match_node_policy() {
        let config = WalletConfig::default();
        assert_eq!(config.witness_cache_size, 101);
        assert_eq!(config.default_min_depth, 5);
        assert_eq!(config.required_fee(1000, false), Amount::from_u64(10_000).unwrap());
        assert_eq!(
            config.required_fee(1000, true),
            Amount::from_u64(1_000_000).unwrap()
        );
    }
}
