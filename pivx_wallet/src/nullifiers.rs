//! Nullifier bookkeeping.
//!
//! Two maps are kept: every nullifier spent by a wallet transaction, with the
//! transactions spending it, and the nullifier of every witnessed wallet note, with the
//! note it belongs to. Together they answer whether a note is spent and whether two
//! wallet transactions conflict.

use std::collections::{BTreeMap, BTreeSet};

use pivx_primitives::{
    merkle_tree::IncrementalWitness,
    sapling::{keys::FullViewingKey, Node, Note, Nullifier},
    transaction::{components::OutPoint, Transaction, TxId},
};

use crate::{chain::ChainOracle, wallet::WalletTx};

/// Computes a note's nullifier from its viewing key and witness.
///
/// Returns `None` without the viewing key or before the note has a witness, as the
/// nullifier depends on the note's position in the commitment tree.
pub fn compute_nullifier(
    fvk: Option<&FullViewingKey>,
    note: &Note,
    witness: Option<&IncrementalWitness<Node>>,
) -> Option<Nullifier> {
    let fvk = fvk?;
    let witness = witness?;
    Some(note.nf(&fvk.vk.nk, witness.position()))
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NullifierTracker {
    spends: BTreeMap<Nullifier, BTreeSet<TxId>>,
    notes: BTreeMap<Nullifier, OutPoint>,
}

impl NullifierTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records that `txid` spends `nf`, returning the other transactions that spend it.
    pub fn register_spend(&mut self, nf: Nullifier, txid: TxId) -> BTreeSet<TxId> {
        let spenders = self.spends.entry(nf).or_default();
        spenders.insert(txid);
        spenders.iter().filter(|t| **t != txid).copied().collect()
    }

    /// Records every nullifier revealed by `tx`.
    pub fn register_spends(&mut self, tx: &Transaction) -> BTreeSet<TxId> {
        let txid = tx.txid();
        tx.nullifiers()
            .flat_map(|nf| self.register_spend(*nf, txid))
            .collect()
    }

    /// Returns the other wallet transactions sharing a nullifier with `tx`, with the
    /// nullifier they share.
    pub fn conflicts_of(&self, tx: &Transaction) -> Vec<(Nullifier, TxId)> {
        let txid = tx.txid();
        tx.nullifiers()
            .flat_map(|nf| {
                self.spends
                    .get(nf)
                    .into_iter()
                    .flatten()
                    .filter(move |other| **other != txid)
                    .map(move |other| (*nf, *other))
            })
            .collect()
    }

    pub fn spenders(&self, nf: &Nullifier) -> impl Iterator<Item = &TxId> {
        self.spends.get(nf).into_iter().flatten()
    }

    /// Whether a wallet transaction that is mined, or still waiting to be mined,
    /// spends `nf`.
    pub fn is_spent<C: ChainOracle>(
        &self,
        nf: &Nullifier,
        txs: &BTreeMap<TxId, WalletTx>,
        chain: &C,
    ) -> bool {
        self.spenders(nf)
            .filter_map(|txid| txs.get(txid))
            .any(|wtx| wtx.depth(chain) >= 0)
    }

    /// The wallet note with nullifier `nf`.
    pub fn note_for(&self, nf: &Nullifier) -> Option<&OutPoint> {
        self.notes.get(nf)
    }

    pub fn is_nullifier_from_me(&self, nf: &Nullifier) -> bool {
        self.notes.contains_key(nf)
    }

    pub fn set_note(&mut self, nf: Nullifier, outpoint: OutPoint) {
        self.notes.insert(nf, outpoint);
    }

    pub fn clear_note(&mut self, nf: &Nullifier) {
        self.notes.remove(nf);
    }

    /// Rebuilds both maps from the wallet's transactions.
    pub fn rebuild(txs: &BTreeMap<TxId, WalletTx>) -> Self {
        let mut tracker = NullifierTracker::new();
        for wtx in txs.values() {
            tracker.register_spends(&wtx.tx);
            for (outpoint, nd) in wtx.my_notes() {
                if let Some(nf) = nd.nullifier {
                    tracker.set_note(nf, *outpoint);
                }
            }
        }
        tracker
    }
}

#[cfg(test)]
mod tests {
    use ff::Field;
    use std::collections::{BTreeMap, BTreeSet};

    use pivx_primitives::{
        merkle_tree::{CommitmentTree, IncrementalWitness},
        sapling::{Node, Nullifier, Rseed},
        transaction::{components::OutPoint, TxId},
        zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use super::{compute_nullifier, NullifierTracker};
    use crate::{
        testing::{fake_spend_tx, FakeChain},
        wallet::{TxStatus, WalletTx},
    };

    #[test]
    fn nullifier_needs_key_and_position() {
        let extsk = ExtendedSpendingKey::master(&[1; 32]);
        let fvk = ExtendedFullViewingKey::from(&extsk).fvk;
        let (_, addr) = extsk.default_address();
        let note = addr
            .create_note(100, Rseed::BeforeZip212(jubjub::Fr::ONE))
            .unwrap();

        let mut tree = CommitmentTree::empty();
        tree.append(Node::new([0; 32])).unwrap();
        tree.append(note.cmu()).unwrap();
        let witness = IncrementalWitness::from_tree(&tree);

        assert_eq!(compute_nullifier(None, &note, Some(&witness)), None);
        assert_eq!(compute_nullifier(Some(&fvk), &note, None), None);

        let nf = compute_nullifier(Some(&fvk), &note, Some(&witness)).unwrap();
        assert_eq!(nf, note.nf(&fvk.vk.nk, 1));

        // The same note at a different position has a different nullifier.
        let mut other = CommitmentTree::empty();
        other.append(note.cmu()).unwrap();
        let at_zero = IncrementalWitness::from_tree(&other);
        assert_ne!(compute_nullifier(Some(&fvk), &note, Some(&at_zero)), Some(nf));
    }

    #[test]
    fn spends_and_conflicts() {
        let nf = Nullifier([1; 32]);
        let a = fake_spend_tx(&[nf], 1);
        let b = fake_spend_tx(&[nf, Nullifier([2; 32])], 2);

        let mut tracker = NullifierTracker::new();
        assert!(tracker.register_spends(&a).is_empty());
        assert_eq!(
            tracker.register_spends(&b),
            BTreeSet::from([a.txid()])
        );
        assert_eq!(tracker.conflicts_of(&a), vec![(nf, b.txid())]);
        assert_eq!(tracker.conflicts_of(&b), vec![(nf, a.txid())]);

        let mut chain = FakeChain::new();
        let mut txs = BTreeMap::new();
        let mut wtx_a = WalletTx::new(a.clone(), TxStatus::Abandoned, 0);
        txs.insert(a.txid(), wtx_a.clone());
        assert!(!tracker.is_spent(&nf, &txs, &chain));

        wtx_a.status = TxStatus::Unconfirmed;
        txs.insert(a.txid(), wtx_a);
        assert!(tracker.is_spent(&nf, &txs, &chain));
        // Spent by a transaction the wallet does not hold.
        assert!(!tracker.is_spent(&Nullifier([2; 32]), &txs, &chain));

        chain.mine(vec![]);
        assert!(tracker.is_spent(&nf, &txs, &chain));
    }

    #[test]
    fn rebuild_restores_note_map() {
        let nf = Nullifier([3; 32]);
        let spend = fake_spend_tx(&[nf], 7);
        let mut wtx = WalletTx::new(spend.clone(), TxStatus::Unconfirmed, 0);
        let outpoint = OutPoint::new(TxId::from_bytes([5; 32]), 0);
        let extsk = ExtendedSpendingKey::master(&[0; 32]);
        let ivk = ExtendedFullViewingKey::from(&extsk).fvk.vk.ivk();
        let mut nd = crate::wallet::NoteData::received(
            ivk,
            1,
            extsk.default_address().1,
            pivx_primitives::memo::MemoBytes::empty(),
        );
        nd.nullifier = Some(Nullifier([4; 32]));
        wtx.sapling_note_data.insert(outpoint, nd);

        let txs = BTreeMap::from([(spend.txid(), wtx)]);
        let tracker = NullifierTracker::rebuild(&txs);
        assert_eq!(tracker.note_for(&Nullifier([4; 32])), Some(&outpoint));
        assert!(tracker.is_nullifier_from_me(&Nullifier([4; 32])));
        assert_eq!(tracker.spenders(&nf).collect::<Vec<_>>(), vec![&spend.txid()]);
    }
}
