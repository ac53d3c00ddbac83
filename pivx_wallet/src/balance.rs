//! Balances and note listings.
//!
//! Everything here reads the wallet's cached note data; nothing mutates it. A note
//! counts towards a balance when it is the wallet's own, is confirmed deeply enough,
//! and no live wallet transaction spends its nullifier.

use std::collections::BTreeSet;

use pivx_primitives::{
    consensus::Parameters,
    memo::MemoBytes,
    sapling::{note_encryption::try_sapling_note_decryption, Note, Nullifier, PaymentAddress},
    transaction::{
        components::{Amount, OutPoint},
        Transaction,
    },
};

use crate::{
    chain::ChainOracle,
    error::Error,
    storage::KeyValueStore,
    wallet::{NoteData, Wallet, WalletTx},
    witness::{violation, InvariantViolation},
};

/// Selects notes for [`Wallet::list_notes`] and [`Wallet::get_balance`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NoteFilter {
    /// Only notes paying one of these addresses, if set.
    pub addresses: Option<BTreeSet<PaymentAddress>>,
    pub min_depth: u32,
    pub max_depth: u32,
    pub ignore_spent: bool,
    /// Skip watch-only notes.
    pub require_spending_key: bool,
}

impl Default for NoteFilter {
    fn default() -> Self {
        NoteFilter {
            addresses: None,
            min_depth: 1,
            max_depth: u32::MAX,
            ignore_spent: true,
            require_spending_key: true,
        }
    }
}

impl NoteFilter {
    pub fn for_address(address: PaymentAddress) -> Self {
        NoteFilter {
            addresses: Some(BTreeSet::from([address])),
            ..Default::default()
        }
    }
}

/// A decrypted wallet note.
#[derive(Clone, Debug)]
pub struct NoteEntry {
    pub outpoint: OutPoint,
    pub address: PaymentAddress,
    pub note: Note,
    pub memo: Option<MemoBytes>,
    /// Confirmations of the transaction that created the note.
    pub depth: i32,
}

/// How a shielded output relates to the wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IsMine {
    No,
    SpendableShielded,
    WatchOnlyShielded,
}

impl<P: Parameters + Clone, S: KeyValueStore> Wallet<P, S> {
    fn filtered_notes<'a, C: ChainOracle>(
        &'a self,
        chain: &'a C,
        filter: &'a NoteFilter,
    ) -> impl Iterator<Item = (&'a WalletTx, &'a OutPoint, &'a NoteData, i32)> + 'a {
        self.txs()
            .values()
            .filter_map(move |wtx| {
                let depth = wtx.depth(chain);
                (depth >= 0
                    && depth as u32 >= filter.min_depth
                    && depth as u32 <= filter.max_depth)
                    .then_some((wtx, depth))
            })
            .flat_map(|(wtx, depth)| {
                wtx.my_notes()
                    .map(move |(outpoint, nd)| (wtx, outpoint, nd, depth))
            })
            .filter(move |(_, _, nd, _)| {
                filter.addresses.as_ref().map_or(true, |addresses| {
                    nd.address.map_or(false, |a| addresses.contains(&a))
                })
            })
            .filter(move |(_, _, nd, _)| !(filter.ignore_spent && self.is_note_spent(chain, nd)))
            .filter(move |(_, _, nd, _)| {
                !filter.require_spending_key
                    || nd
                        .ivk
                        .as_ref()
                        .map_or(false, |ivk| self.keys().have_spending_key(ivk))
            })
    }

    fn is_note_spent<C: ChainOracle>(&self, chain: &C, nd: &NoteData) -> bool {
        nd.nullifier
            .map_or(false, |nf| self.nullifiers().is_spent(&nf, self.txs(), chain))
    }

    /// Decrypts and returns every wallet note matching `filter`.
    pub fn list_notes<C: ChainOracle>(
        &self,
        chain: &C,
        filter: &NoteFilter,
    ) -> Result<Vec<NoteEntry>, Error> {
        self.filtered_notes(chain, filter)
            .map(|(wtx, outpoint, nd, depth)| {
                let (note, address, memo) = nd
                    .ivk
                    .as_ref()
                    .zip(wtx.tx.shielded_outputs().get(outpoint.n() as usize))
                    .and_then(|(ivk, output)| {
                        try_sapling_note_decryption(
                            ivk,
                            &output.ephemeral_key,
                            &output.cmu,
                            &output.enc_ciphertext,
                        )
                    })
                    .ok_or_else(|| violation(InvariantViolation::NoteDecryptionFailed(*outpoint)))?;

                Ok(NoteEntry {
                    outpoint: *outpoint,
                    address,
                    note,
                    memo: (!memo.is_empty()).then_some(memo),
                    depth,
                })
            })
            .collect()
    }

    /// Sums the cached values of every wallet note matching `filter`.
    pub fn get_balance<C: ChainOracle>(&self, chain: &C, filter: &NoteFilter) -> Amount {
        let total: u64 = self
            .filtered_notes(chain, filter)
            .filter_map(|(_, _, nd, _)| nd.value)
            .sum();
        Amount::from_u64(total).unwrap_or_else(|_| Amount::zero())
    }

    /// The value of unspent notes with at least `min_depth` confirmations, optionally
    /// restricted to one address.
    pub fn available_balance<C: ChainOracle>(
        &self,
        chain: &C,
        address: Option<PaymentAddress>,
        min_depth: u32,
        include_watch_only: bool,
    ) -> Amount {
        let filter = NoteFilter {
            addresses: address.map(|a| BTreeSet::from([a])),
            min_depth,
            require_spending_key: !include_watch_only,
            ..Default::default()
        };
        self.get_balance(chain, &filter)
    }

    /// The value of unspent notes in transactions that are not yet mined.
    pub fn unconfirmed_balance<C: ChainOracle>(
        &self,
        chain: &C,
        address: Option<PaymentAddress>,
        include_watch_only: bool,
    ) -> Amount {
        let filter = NoteFilter {
            addresses: address.map(|a| BTreeSet::from([a])),
            min_depth: 0,
            max_depth: 0,
            require_spending_key: !include_watch_only,
            ..Default::default()
        };
        self.get_balance(chain, &filter)
    }

    /// Pairs each of `addresses` with the nullifier of every wallet note received by
    /// the same key.
    pub fn nullifiers_for_addresses(
        &self,
        addresses: &BTreeSet<PaymentAddress>,
    ) -> BTreeSet<(PaymentAddress, Nullifier)> {
        let mut set = BTreeSet::new();
        for wtx in self.txs().values() {
            for (_, nd) in wtx.my_notes() {
                let (ivk, nf) = match (&nd.ivk, nd.nullifier) {
                    (Some(ivk), Some(nf)) => (ivk, nf),
                    _ => continue,
                };
                for addr in addresses
                    .iter()
                    .filter(|addr| self.keys().ivk_for_address(addr) == Some(ivk))
                {
                    set.insert((*addr, nf));
                }
            }
        }
        set
    }

    /// Whether the note at `outpoint` is change: the address that received it also
    /// spent one of `nullifiers` in the same transaction. This includes notes sent from
    /// an address to itself.
    pub fn is_change(
        &self,
        nullifiers: &BTreeSet<(PaymentAddress, Nullifier)>,
        address: &PaymentAddress,
        outpoint: &OutPoint,
    ) -> bool {
        self.get_tx(outpoint.hash()).map_or(false, |wtx| {
            wtx.tx
                .nullifiers()
                .any(|nf| nullifiers.contains(&(*address, *nf)))
        })
    }

    /// Whether the note at `outpoint` is change, using every nullifier of its address.
    pub fn is_note_change(&self, outpoint: &OutPoint, address: &PaymentAddress) -> bool {
        let nullifiers = self.nullifiers_for_addresses(&BTreeSet::from([*address]));
        self.is_change(&nullifiers, address, outpoint)
    }

    pub fn is_mine(&self, wtx: &WalletTx, outpoint: &OutPoint) -> IsMine {
        match wtx.sapling_note_data.get(outpoint) {
            Some(nd) if nd.is_mine() => {
                if nd.address.map_or(false, |a| self.keys().has_spending_key(&a)) {
                    IsMine::SpendableShielded
                } else {
                    IsMine::WatchOnlyShielded
                }
            }
            _ => IsMine::No,
        }
    }

    /// The value `wtx` pays to the wallet, optionally counting only unspent notes.
    pub fn credit<C: ChainOracle>(&self, chain: &C, wtx: &WalletTx, unspent_only: bool) -> Amount {
        let total: u64 = wtx
            .my_notes()
            .filter(|(_, nd)| !(unspent_only && self.is_note_spent(chain, nd)))
            .filter_map(|(_, nd)| nd.value)
            .sum();
        Amount::from_u64(total).unwrap_or_else(|_| Amount::zero())
    }

    /// The value of wallet notes `tx` spends.
    pub fn debit(&self, tx: &Transaction) -> Amount {
        let total: u64 = tx
            .nullifiers()
            .filter_map(|nf| self.nullifiers().note_for(nf))
            .filter_map(|outpoint| self.note_value(outpoint))
            .sum();
        Amount::from_u64(total).unwrap_or_else(|_| Amount::zero())
    }

    /// The value of the change notes `wtx` pays back to the wallet.
    pub fn shielded_change(&self, wtx: &WalletTx) -> Amount {
        let total: u64 = wtx
            .my_notes()
            .filter_map(|(outpoint, nd)| {
                let address = nd.address?;
                self.is_note_change(outpoint, &address).then_some(nd.value?)
            })
            .sum();
        Amount::from_u64(total).unwrap_or_else(|_| Amount::zero())
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    use pivx_primitives::{
        memo::MemoBytes,
        transaction::components::{Amount, OutPoint},
        zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use super::{IsMine, NoteFilter};
    use crate::testing::{
        connect, fake_shielded_tx, new_wallet, spend_notes, FakeChain,
    };

    #[test]
    fn change_note_is_not_double_counted() {
        let mut chain = FakeChain::new();
        let mut wallet = new_wallet();
        let extsk = ExtendedSpendingKey::master(&[7; 32]);
        wallet.import_spending_key(extsk.clone(), 0).unwrap();
        let (_, x) = extsk.default_address();

        for _ in 0..10 {
            connect(&mut wallet, &mut chain, vec![]);
        }
        // Note A, worth 100, at height 10.
        let receive = fake_shielded_tx(&[(x, 100, MemoBytes::empty())]);
        let a = OutPoint::new(receive.txid(), 0);
        connect(&mut wallet, &mut chain, vec![receive]);
        connect(&mut wallet, &mut chain, vec![]);
        assert_eq!(
            wallet.available_balance(&chain, None, 1, false),
            Amount::from_u64(100).unwrap()
        );

        // At height 12, spend A into note B, worth 90, paying a fee of 10.
        let spend = spend_notes(&wallet, &extsk, &[a], &[(x, 90)], 10);
        let b = OutPoint::new(spend.txid(), 0);
        connect(&mut wallet, &mut chain, vec![spend.clone()]);

        let nullifiers = wallet.nullifiers_for_addresses(&BTreeSet::from([x]));
        assert!(wallet.is_change(&nullifiers, &x, &b));
        assert!(wallet.is_change(&nullifiers, &x, &b));
        assert!(!wallet.is_change(&nullifiers, &x, &a));
        assert_eq!(
            wallet.available_balance(&chain, None, 1, false),
            Amount::from_u64(90).unwrap()
        );
        assert_eq!(
            wallet.available_balance(&chain, Some(x), 1, false),
            Amount::from_u64(90).unwrap()
        );

        let wtx = wallet.get_tx(&spend.txid()).unwrap();
        assert!(wtx.from_me);
        assert_eq!(wallet.debit(&spend), Amount::from_u64(100).unwrap());
        assert_eq!(wallet.credit(&chain, wtx, true), Amount::from_u64(90).unwrap());
        assert_eq!(wallet.shielded_change(wtx), Amount::from_u64(90).unwrap());
        assert_eq!(wallet.is_mine(wtx, &b), IsMine::SpendableShielded);

        let receive_wtx = wallet.get_tx(a.hash()).unwrap();
        assert_eq!(wallet.credit(&chain, receive_wtx, true), Amount::zero());
        assert_eq!(
            wallet.credit(&chain, receive_wtx, false),
            Amount::from_u64(100).unwrap()
        );

        let notes = wallet.list_notes(&chain, &NoteFilter::default()).unwrap();
        assert_eq!(notes.len(), 1);
        assert_eq!(notes[0].outpoint, b);
        assert_eq!(notes[0].address, x);
        assert_eq!(notes[0].note.value, 90);
        assert_eq!(notes[0].depth, 1);
    }

    #[test]
    fn depth_and_watch_only_filters() {
        let mut chain = FakeChain::new();
        let mut wallet = new_wallet();
        let spendable = ExtendedSpendingKey::master(&[1; 32]);
        let watched = ExtendedSpendingKey::master(&[2; 32]);
        wallet.import_spending_key(spendable.clone(), 0).unwrap();
        wallet
            .import_viewing_key(ExtendedFullViewingKey::from(&watched))
            .unwrap();
        let (_, mine) = spendable.default_address();
        let (_, theirs) = watched.default_address();

        connect(
            &mut wallet,
            &mut chain,
            vec![fake_shielded_tx(&[(mine, 5, MemoBytes::empty()), (theirs, 7, MemoBytes::empty())])],
        );
        let pending = fake_shielded_tx(&[(mine, 11, MemoBytes::from_bytes(b"soon").unwrap())]);
        wallet.commit_transaction(&chain, &pending).unwrap();

        let amount = |v| Amount::from_u64(v).unwrap();
        assert_eq!(wallet.available_balance(&chain, None, 1, false), amount(5));
        assert_eq!(wallet.available_balance(&chain, None, 1, true), amount(12));
        assert_eq!(wallet.available_balance(&chain, None, 0, false), amount(16));
        assert_eq!(wallet.available_balance(&chain, None, 2, true), Amount::zero());
        assert_eq!(wallet.unconfirmed_balance(&chain, None, false), amount(11));
        assert_eq!(wallet.available_balance(&chain, Some(theirs), 1, true), amount(7));

        let outpoint = OutPoint::new(pending.txid(), 0);
        assert_eq!(wallet.note_memo(&outpoint), Some(MemoBytes::from_bytes(b"soon").unwrap()));
        assert_eq!(wallet.note_value(&outpoint), Some(11));
        assert_eq!(wallet.note_address(&outpoint), Some(mine));

        let wtx = wallet.get_tx(&pending.txid()).unwrap();
        assert_eq!(wallet.is_mine(wtx, &outpoint), IsMine::SpendableShielded);
        assert_eq!(wallet.is_mine(wtx, &OutPoint::new(pending.txid(), 1)), IsMine::No);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn balance_is_sum_of_matching_notes(
            values in proptest::collection::vec(1u64..1_000_000, 1..4),
            min_depth in 0u32..4,
            watch_only in any::<bool>(),
        ) {
            let mut chain = FakeChain::new();
            let mut wallet = new_wallet();
            let spendable = ExtendedSpendingKey::master(&[3; 32]);
            let watched = ExtendedSpendingKey::master(&[4; 32]);
            wallet.import_spending_key(spendable.clone(), 0).unwrap();
            wallet.import_viewing_key(ExtendedFullViewingKey::from(&watched)).unwrap();
            let (_, mine) = spendable.default_address();
            let (_, theirs) = watched.default_address();

            for (i, value) in values.iter().enumerate() {
                let to = if i % 2 == 0 { mine } else { theirs };
                connect(&mut wallet, &mut chain, vec![fake_shielded_tx(&[(to, *value, MemoBytes::empty())])]);
            }

            let filter = NoteFilter {
                min_depth,
                require_spending_key: !watch_only,
                ..Default::default()
            };
            let expected: u64 = wallet
                .list_notes(&chain, &filter)
                .unwrap()
                .iter()
                .map(|n| n.note.value)
                .sum();
            let tip_height = values.len() as u32;
            let by_hand: u64 = values
                .iter()
                .enumerate()
                .filter(|(i, _)| watch_only || i % 2 == 0)
                .filter(|(i, _)| tip_height - *i as u32 >= min_depth)
                .map(|(_, v)| *v)
                .sum();
            prop_assert_eq!(expected, by_hand);
            prop_assert_eq!(
                wallet.available_balance(&chain, None, min_depth, watch_only),
                Amount::from_u64(by_hand).unwrap()
            );
        }
    }
}
