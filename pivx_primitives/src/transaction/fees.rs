//! Relay fee policy: per-kilobyte fee rates and the dust thresholds derived from them.

use super::components::{
    amount::MAX_MONEY,
    sapling::SPEND_DESCRIPTION_SIZE,
    transparent::{P2PKH_TXIN_SIZE, P2PKH_TXOUT_SIZE},
    Amount, SIGNATURE_SIZE,
};

/// Default minimum relay fee, in satoshis per 1000 bytes.
pub const DEFAULT_MIN_RELAY_TX_FEE: i64 = 10_000;

/// Multiplier applied to the relay fee of transactions with shielded data.
pub const DEFAULT_SHIELDED_TXFEE_K: i64 = 100;

/// A fee rate in satoshis per 1000 bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct FeeRate {
    per_k: Amount,
}

impl Default for FeeRate {
    fn default() -> Self {
        FeeRate::per_kb(Amount::const_from_i64(DEFAULT_MIN_RELAY_TX_FEE))
    }
}

impl FeeRate {
    pub fn per_kb(per_k: Amount) -> Self {
        FeeRate { per_k }
    }

    pub fn per_k(&self) -> Amount {
        self.per_k
    }

    /// Returns the fee for a transaction of `size` bytes.
    ///
    /// A non-zero rate never yields a zero fee: when the proportional fee rounds down to
    /// zero, the full per-kilobyte rate is charged instead.
    pub fn fee(&self, size: usize) -> Amount {
        let per_k = i64::from(self.per_k);
        let fee = per_k.saturating_mul(size as i64) / 1000;
        let fee = if fee == 0 && per_k > 0 { per_k } else { fee };
        Amount::const_from_i64(fee.clamp(0, MAX_MONEY))
    }
}

/// Values at or below this threshold are not worth a transparent output.
///
/// Three times the fee of spending a pay-to-pubkey-hash output later on.
pub fn dust_threshold(rate: &FeeRate) -> Amount {
    (rate.fee(P2PKH_TXOUT_SIZE + P2PKH_TXIN_SIZE) * 3).unwrap_or(Amount::zero())
}

/// Values at or below this threshold are not worth a shielded output.
pub fn shielded_dust_threshold(rate: &FeeRate) -> Amount {
    let size = SPEND_DESCRIPTION_SIZE + P2PKH_TXOUT_SIZE + SIGNATURE_SIZE;
    (rate.fee(size) * (3 * DEFAULT_SHIELDED_TXFEE_K as usize)).unwrap_or(Amount::zero())
}

#[cfg(test)]
mod tests {
    use super::{dust_threshold, shielded_dust_threshold, FeeRate};
    use crate::transaction::components::Amount;

    #[test]
    fn fee_rounds_up_to_rate() {
        let rate = FeeRate::default();
        assert_eq!(rate.fee(0), Amount::from_i64(10_000).unwrap());
        assert_eq!(rate.fee(1000), Amount::from_i64(10_000).unwrap());
        assert_eq!(rate.fee(2500), Amount::from_i64(25_000).unwrap());

        let free = FeeRate::per_kb(Amount::zero());
        assert_eq!(free.fee(2500), Amount::zero());
    }

    #[test]
    fn default_dust_thresholds() {
        let rate = FeeRate::default();
        // 3 * fee(182 bytes)
        assert_eq!(dust_threshold(&rate), Amount::from_i64(5_460).unwrap());
        // 300 * fee(482 bytes)
        assert_eq!(
            shielded_dust_threshold(&rate),
            Amount::from_i64(1_446_000).unwrap()
        );
    }
}
