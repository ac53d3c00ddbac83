//! The witness cache.
//!
//! Every note the wallet owns keeps a short history of incremental witnesses, one per
//! recent block, so that the note stays spendable across chain reorganizations of up
//! to [`WITNESS_CACHE_SIZE`] blocks. The history is advanced when a block is connected
//! and rewound when one is disconnected, in lock-step with the chain tip.
//!
//! Each update validates the whole cache before touching any note. A failed update
//! leaves the cache as it was and returns an [`InvariantViolation`]; the caller is
//! expected to [`reset`] the cache and rescan.
//!
//! [`WITNESS_CACHE_SIZE`]: crate::config::WITNESS_CACHE_SIZE
//! [`reset`]: WitnessCache::reset

use std::collections::BTreeMap;
use std::error;
use std::fmt;
use tracing::{error, warn};

use pivx_primitives::{
    block::Block,
    consensus::{BlockHeight, H0},
    merkle_tree::{CommitmentTree, IncrementalWitness},
    sapling::{Node, SAPLING_COMMITMENT_TREE_DEPTH},
    transaction::{components::OutPoint, TxId},
};

use crate::wallet::{NoteData, WalletTx};

/// A broken witness cache invariant. The cache no longer matches the chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InvariantViolation {
    /// A note holds more witnesses than the cache has blocks.
    CacheSizeExceeded {
        outpoint: OutPoint,
        witnesses: usize,
        cache_size: u32,
    },
    /// A note's witness height is not adjacent to the block being applied.
    WitnessHeightMismatch {
        outpoint: OutPoint,
        witness_height: Option<BlockHeight>,
        block_height: BlockHeight,
    },
    /// Witnesses requested for one transaction disagree on the anchor.
    AnchorMismatch(OutPoint),
    /// A note recorded as the wallet's own no longer decrypts.
    NoteDecryptionFailed(OutPoint),
    /// The note commitment tree cannot hold the block's commitments.
    TreeFull,
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            InvariantViolation::CacheSizeExceeded {
                outpoint,
                witnesses,
                cache_size,
            } => write!(
                f,
                "Witness cache corrupt: note {:?} holds {} witnesses but the cache size is {}",
                outpoint, witnesses, cache_size
            ),
            InvariantViolation::WitnessHeightMismatch {
                outpoint,
                witness_height,
                block_height,
            } => write!(
                f,
                "Witness cache corrupt: note {:?} witnessed at height {:?} while applying block {}",
                outpoint, witness_height, block_height
            ),
            InvariantViolation::AnchorMismatch(outpoint) => write!(
                f,
                "Witness for note {:?} does not share the anchor of the other inputs",
                outpoint
            ),
            InvariantViolation::NoteDecryptionFailed(outpoint) => {
                write!(f, "Failed to decrypt wallet note {:?}", outpoint)
            }
            InvariantViolation::TreeFull => write!(f, "Note commitment tree is full"),
        }
    }
}

impl error::Error for InvariantViolation {}

/// Reports a violation. Debug builds outside of tests stop here.
pub(crate) fn violation(v: InvariantViolation) -> InvariantViolation {
    error!("{}", v);
    debug_assert!(cfg!(test), "{}", v);
    v
}

fn previous(height: BlockHeight) -> Option<BlockHeight> {
    (height > H0).then(|| height - 1)
}

/// Whether the note's newest witness predates the block at `height`.
fn is_behind(nd: &NoteData, height: BlockHeight) -> bool {
    nd.witness_height.map_or(true, |h| h < height)
}

fn my_notes(txs: &BTreeMap<TxId, WalletTx>) -> impl Iterator<Item = (&OutPoint, &NoteData)> {
    txs.values().flat_map(|wtx| wtx.my_notes())
}

fn my_notes_mut(txs: &mut BTreeMap<TxId, WalletTx>) -> impl Iterator<Item = &mut NoteData> {
    txs.values_mut().flat_map(|wtx| {
        wtx.sapling_note_data
            .values_mut()
            .filter(|nd| nd.is_mine())
    })
}

/// Tracks how many blocks the per-note witness histories cover.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WitnessCache {
    size: u32,
    capacity: u32,
}

impl WitnessCache {
    pub fn new(capacity: u32) -> Self {
        WitnessCache { size: 0, capacity }
    }

    /// Restores a cache whose size was persisted earlier.
    pub fn with_size(size: u32, capacity: u32) -> Self {
        WitnessCache {
            size: size.min(capacity),
            capacity,
        }
    }

    /// The number of blocks the cache currently covers.
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Checks that every owned note's witnesses can be advanced over the block at
    /// `height`, without changing anything.
    pub fn check_increment(
        &self,
        txs: &BTreeMap<TxId, WalletTx>,
        height: BlockHeight,
    ) -> Result<(), InvariantViolation> {
        for (outpoint, nd) in my_notes(txs) {
            if !is_behind(nd, height) {
                continue;
            }
            if nd.witnesses.len() > self.size as usize {
                return Err(violation(InvariantViolation::CacheSizeExceeded {
                    outpoint: *outpoint,
                    witnesses: nd.witnesses.len(),
                    cache_size: self.size,
                }));
            }
            if nd.witness_height.is_some() && nd.witness_height != previous(height) {
                return Err(violation(InvariantViolation::WitnessHeightMismatch {
                    outpoint: *outpoint,
                    witness_height: nd.witness_height,
                    block_height: height,
                }));
            }
        }
        Ok(())
    }

    /// Advances every owned note's witnesses over the block at `height`.
    ///
    /// `tree` must be the note commitment tree as of the end of the previous block; on
    /// success it has been advanced over `block`. Outputs of `block` that the wallet
    /// already records as its own receive a new witness.
    pub fn increment(
        &mut self,
        txs: &mut BTreeMap<TxId, WalletTx>,
        block: &Block,
        height: BlockHeight,
        tree: &mut CommitmentTree<Node>,
    ) -> Result<(), InvariantViolation> {
        self.check_increment(txs, height)?;

        let commitments: Vec<(OutPoint, Node)> = block
            .vtx
            .iter()
            .flat_map(|tx| {
                let txid = tx.txid();
                tx.shielded_outputs()
                    .iter()
                    .enumerate()
                    .map(move |(n, output)| (OutPoint::new(txid, n as u32), output.cmu))
            })
            .collect();
        if (tree.size() + commitments.len()) as u64 > 1u64 << SAPLING_COMMITMENT_TREE_DEPTH {
            return Err(violation(InvariantViolation::TreeFull));
        }

        // Start this block's witness from the previous block's.
        for nd in my_notes_mut(txs) {
            if is_behind(nd, height) {
                if let Some(newest) = nd.witnesses.front().cloned() {
                    nd.witnesses.push_front(newest);
                }
                if nd.witnesses.len() > self.capacity as usize {
                    nd.witnesses.pop_back();
                }
            }
        }
        if self.size < self.capacity {
            self.size += 1;
        }

        for (outpoint, cmu) in commitments {
            tree.append(cmu)
                .map_err(|_| violation(InvariantViolation::TreeFull))?;

            for nd in my_notes_mut(txs) {
                if is_behind(nd, height) {
                    if let Some(witness) = nd.witnesses.front_mut() {
                        witness
                            .append(cmu)
                            .map_err(|_| violation(InvariantViolation::TreeFull))?;
                    }
                }
            }

            if let Some(nd) = txs
                .get_mut(outpoint.hash())
                .and_then(|wtx| wtx.sapling_note_data.get_mut(&outpoint))
            {
                self.witness_note(&outpoint, nd, height, IncrementalWitness::from_tree(tree));
            }
        }

        for nd in my_notes_mut(txs) {
            if is_behind(nd, height) && (nd.witness_height.is_some() || !nd.witnesses.is_empty())
            {
                nd.witness_height = Some(height);
            }
        }

        Ok(())
    }

    fn witness_note(
        &self,
        outpoint: &OutPoint,
        nd: &mut NoteData,
        height: BlockHeight,
        witness: IncrementalWitness<Node>,
    ) {
        if !nd.is_mine() || !is_behind(nd, height) {
            return;
        }

        if let Some(stale) = nd.witnesses.front() {
            // Blocks already applied are being replayed, e.g. after a crash between
            // persisting the cache and the chain state.
            warn!(
                ?outpoint,
                cached = nd.witnesses.len(),
                top_height = ?nd.witness_height,
                top_root = ?stale.root(),
                new_height = %height,
                new_root = ?witness.root(),
                "Inconsistent witness cache state"
            );
            nd.witnesses.clear();
        }
        nd.witnesses.push_front(witness);
        // One below, so that the height update at the end of the block applies.
        nd.witness_height = previous(height);
    }

    /// Rewinds every owned note's witnesses over the disconnected block at `height`.
    pub fn decrement(
        &mut self,
        txs: &mut BTreeMap<TxId, WalletTx>,
        height: BlockHeight,
    ) -> Result<(), InvariantViolation> {
        let new_size = self.size.saturating_sub(1);
        let applies = |nd: &NoteData| {
            nd.witness_height.map_or(!nd.witnesses.is_empty(), |h| h <= height)
        };

        for (outpoint, nd) in my_notes(txs) {
            // Notes witnessed above `height` are only possible mid-reindex; they become
            // consistent again once the chain catches up.
            if !applies(nd) {
                continue;
            }
            if nd.witnesses.len() > self.size as usize {
                return Err(violation(InvariantViolation::CacheSizeExceeded {
                    outpoint: *outpoint,
                    witnesses: nd.witnesses.len(),
                    cache_size: self.size,
                }));
            }
            if nd.witness_height.is_some() && nd.witness_height != Some(height) {
                return Err(violation(InvariantViolation::WitnessHeightMismatch {
                    outpoint: *outpoint,
                    witness_height: nd.witness_height,
                    block_height: height,
                }));
            }
            let remaining = nd.witnesses.len().saturating_sub(1);
            if remaining > new_size as usize {
                return Err(violation(InvariantViolation::CacheSizeExceeded {
                    outpoint: *outpoint,
                    witnesses: remaining,
                    cache_size: new_size,
                }));
            }
        }

        for nd in my_notes_mut(txs) {
            if applies(nd) {
                nd.witnesses.pop_front();
                nd.witness_height = previous(height);
            }
        }
        self.size = new_size;

        Ok(())
    }

    /// Returns the newest witness of each requested note, and the anchor they share.
    ///
    /// Notes without a witness yield `None`; the anchor is `None` if no note has one.
    pub fn final_witnesses(
        &self,
        txs: &BTreeMap<TxId, WalletTx>,
        outpoints: &[OutPoint],
    ) -> Result<(Vec<Option<IncrementalWitness<Node>>>, Option<Node>), InvariantViolation> {
        let mut anchor = None;
        let mut witnesses = Vec::with_capacity(outpoints.len());

        for outpoint in outpoints {
            let witness = txs
                .get(outpoint.hash())
                .and_then(|wtx| wtx.sapling_note_data.get(outpoint))
                .and_then(|nd| nd.witnesses.front())
                .cloned();

            if let Some(witness) = &witness {
                let root = witness.root();
                match anchor {
                    None => anchor = Some(root),
                    Some(a) if a != root => {
                        return Err(violation(InvariantViolation::AnchorMismatch(*outpoint)))
                    }
                    Some(_) => (),
                }
            }
            witnesses.push(witness);
        }

        Ok((witnesses, anchor))
    }

    /// Forgets every witness. Used before rescanning from the start of the chain.
    pub fn reset(&mut self, txs: &mut BTreeMap<TxId, WalletTx>) {
        for wtx in txs.values_mut() {
            for nd in wtx.sapling_note_data.values_mut() {
                nd.witnesses.clear();
                nd.witness_height = None;
            }
        }
        self.size = 0;
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    use pivx_primitives::{
        consensus::BlockHeight,
        merkle_tree::CommitmentTree,
        sapling::Node,
        transaction::{components::OutPoint, TxId},
    };

    use super::{InvariantViolation, WitnessCache};
    use crate::{
        testing::{fake_commitment_tx, FakeChain},
        wallet::{NoteData, TxStatus, WalletTx},
    };

    fn my_note() -> NoteData {
        use pivx_primitives::{memo::MemoBytes, zip32::*};
        let extsk = ExtendedSpendingKey::master(&[0; 32]);
        let ivk = ExtendedFullViewingKey::from(&extsk).fvk.vk.ivk();
        NoteData::received(ivk, 1, extsk.default_address().1, MemoBytes::empty())
    }

    /// Records every output of `tx` as owned by the wallet.
    fn track(txs: &mut BTreeMap<TxId, WalletTx>, tx: &pivx_primitives::transaction::Transaction) {
        let mut wtx = WalletTx::new(tx.clone(), TxStatus::Unconfirmed, 0);
        for n in 0..tx.shielded_outputs().len() {
            wtx.sapling_note_data
                .insert(OutPoint::new(tx.txid(), n as u32), my_note());
        }
        txs.insert(tx.txid(), wtx);
    }

    fn note(txs: &BTreeMap<TxId, WalletTx>, outpoint: &OutPoint) -> NoteData {
        txs[outpoint.hash()].sapling_note_data[outpoint].clone()
    }

    #[test]
    fn connect_witnesses_new_note() {
        let mut chain = FakeChain::new();
        let mut txs = BTreeMap::new();
        let mut cache = WitnessCache::new(101);

        let cms: Vec<Node> = (1..=3u8).map(|i| Node::new([i; 32])).collect();
        let before = fake_commitment_tx(&cms[..1]);
        let ours = fake_commitment_tx(&cms[1..2]);
        let after = fake_commitment_tx(&cms[2..]);
        track(&mut txs, &ours);
        let outpoint = OutPoint::new(ours.txid(), 0);

        chain.mine(vec![]);
        let block = chain.mine(vec![before, ours, after]);
        let height = BlockHeight::from_u32(1);
        let mut tree = CommitmentTree::empty();
        cache.increment(&mut txs, &block, height, &mut tree).unwrap();

        let nd = note(&txs, &outpoint);
        assert_eq!(nd.witness_height, Some(height));
        assert_eq!(nd.witnesses.len(), 1);
        assert_eq!(nd.witnesses[0].root(), tree.root());
        assert_eq!(nd.witnesses[0].position(), 1);
        assert_eq!(tree, chain.sapling_tree(height));
        assert_eq!(cache.size(), 1);

        cache.decrement(&mut txs, height).unwrap();
        let nd = note(&txs, &outpoint);
        assert!(nd.witnesses.is_empty());
        assert_eq!(nd.witness_height, Some(BlockHeight::from_u32(0)));
        assert_eq!(cache.size(), 0);
    }

    #[test]
    fn replayed_block_reseeds_note() {
        let mut txs = BTreeMap::new();
        let mut cache = WitnessCache::new(101);
        let ours = fake_commitment_tx(&[Node::new([7; 32])]);
        track(&mut txs, &ours);
        let outpoint = OutPoint::new(ours.txid(), 0);

        let mut chain = FakeChain::new();
        let block = chain.mine(vec![ours]);
        let mut tree = CommitmentTree::empty();
        cache
            .increment(&mut txs, &block, BlockHeight::from_u32(0), &mut tree)
            .unwrap();
        let expected = note(&txs, &outpoint);

        // State left behind by an update whose height was never persisted.
        let wtx = txs.get_mut(outpoint.hash()).unwrap();
        wtx.sapling_note_data
            .get_mut(&outpoint)
            .unwrap()
            .witness_height = None;

        let mut tree = CommitmentTree::empty();
        cache
            .increment(&mut txs, &block, BlockHeight::from_u32(0), &mut tree)
            .unwrap();
        assert_eq!(note(&txs, &outpoint), expected);
    }

    #[test]
    fn failed_update_leaves_cache_untouched() {
        let mut txs = BTreeMap::new();
        let mut cache = WitnessCache::new(101);
        let ours = fake_commitment_tx(&[Node::new([7; 32])]);
        track(&mut txs, &ours);
        let outpoint = OutPoint::new(ours.txid(), 0);

        let mut chain = FakeChain::new();
        let block = chain.mine(vec![ours]);
        let mut tree = CommitmentTree::empty();
        cache
            .increment(&mut txs, &block, BlockHeight::from_u32(0), &mut tree)
            .unwrap();
        let snapshot = note(&txs, &outpoint);
        let tree_before = tree.clone();

        // Skipping blocks.
        assert_matches!(
            cache.increment(&mut txs, &block, BlockHeight::from_u32(5), &mut tree),
            Err(InvariantViolation::WitnessHeightMismatch { .. })
        );
        assert_eq!(cache.size(), 1);
        assert_eq!(tree, tree_before);
        assert_eq!(note(&txs, &outpoint), snapshot);

        // Disconnecting a block the note was not witnessed at.
        assert_matches!(
            cache.decrement(&mut txs, BlockHeight::from_u32(3)),
            Err(InvariantViolation::WitnessHeightMismatch { .. })
        );
        assert_eq!(note(&txs, &outpoint), snapshot);

        // A note holding more witnesses than the cache covers.
        let mut cache = WitnessCache::with_size(0, 101);
        assert_matches!(
            cache.decrement(&mut txs, BlockHeight::from_u32(0)),
            Err(InvariantViolation::CacheSizeExceeded { .. })
        );
        assert_eq!(cache.size(), 0);
        assert_eq!(note(&txs, &outpoint), snapshot);
    }

    #[test]
    fn witness_lists_are_bounded_by_capacity() {
        let mut chain = FakeChain::new();
        let mut txs = BTreeMap::new();
        let mut cache = WitnessCache::new(3);
        let ours = fake_commitment_tx(&[Node::new([1; 32])]);
        track(&mut txs, &ours);
        let outpoint = OutPoint::new(ours.txid(), 0);

        let mut block_txs = vec![ours];
        for i in 0..6u8 {
            block_txs.push(fake_commitment_tx(&[Node::new([i + 10; 32])]));
            let height = chain.next_height();
            let mut tree = chain.tip_tree();
            let block = chain.mine(std::mem::take(&mut block_txs));
            cache.increment(&mut txs, &block, height, &mut tree).unwrap();

            let nd = note(&txs, &outpoint);
            assert_eq!(nd.witnesses.len(), usize::from(i + 1).min(3));
            assert_eq!(nd.witness_height, Some(height));
            assert_eq!(nd.witnesses[0].root(), tree.root());
            assert!(cache.size() <= cache.capacity());
        }
        assert_eq!(cache.size(), 3);

        // Only the three newest witnesses survive.
        let nd = note(&txs, &outpoint);
        for (age, witness) in nd.witnesses.iter().enumerate() {
            let height = BlockHeight::from_u32(5 - age as u32);
            assert_eq!(witness.root(), chain.sapling_tree(height).root());
        }

        for (tip, remaining) in [(5u32, 2usize), (4, 1), (3, 0)] {
            cache
                .decrement(&mut txs, BlockHeight::from_u32(tip))
                .unwrap();
            let nd = note(&txs, &outpoint);
            assert_eq!(cache.size() as usize, remaining);
            assert_eq!(nd.witnesses.len(), remaining);
            assert_eq!(nd.witness_height, Some(BlockHeight::from_u32(tip - 1)));
            if let Some(newest) = nd.witnesses.front() {
                let previous = BlockHeight::from_u32(tip - 1);
                assert_eq!(newest.root(), chain.sapling_tree(previous).root());
            }
        }
    }

    #[test]
    fn final_witnesses_share_anchor() {
        let mut txs = BTreeMap::new();
        let mut cache = WitnessCache::new(101);
        let a = fake_commitment_tx(&[Node::new([1; 32])]);
        let b = fake_commitment_tx(&[Node::new([2; 32])]);
        track(&mut txs, &a);
        track(&mut txs, &b);
        let a_out = OutPoint::new(a.txid(), 0);
        let b_out = OutPoint::new(b.txid(), 0);

        let mut chain = FakeChain::new();
        let block = chain.mine(vec![a, b]);
        let mut tree = CommitmentTree::empty();
        cache
            .increment(&mut txs, &block, BlockHeight::from_u32(0), &mut tree)
            .unwrap();

        let missing = OutPoint::new(TxId::from_bytes([9; 32]), 0);
        let (witnesses, anchor) = cache
            .final_witnesses(&txs, &[a_out, missing, b_out])
            .unwrap();
        assert_eq!(anchor, Some(tree.root()));
        assert!(witnesses[0].is_some());
        assert!(witnesses[1].is_none());
        assert!(witnesses[2].is_some());

        // Give one note a witness from an older tree state.
        let wtx = txs.get_mut(b_out.hash()).unwrap();
        let nd = wtx.sapling_note_data.get_mut(&b_out).unwrap();
        let mut older = nd.witnesses[0].clone();
        older.append(Node::new([3; 32])).unwrap();
        nd.witnesses[0] = older;
        assert_eq!(
            cache.final_witnesses(&txs, &[a_out, b_out]),
            Err(InvariantViolation::AnchorMismatch(b_out))
        );
    }

    proptest! {
        #[test]
        fn reorgs_are_reversible(
            history in proptest::collection::vec(1usize..4, 1..4),
            reorg in proptest::collection::vec(0usize..4, 1..6),
        ) {
            let mut chain = FakeChain::new();
            let mut txs = BTreeMap::new();
            let mut cache = WitnessCache::new(101);
            let mut counter = 0u8;
            let mut next_cms = |count: usize| -> Vec<Node> {
                (0..count)
                    .map(|_| {
                        counter = counter.wrapping_add(1);
                        Node::new([counter; 32])
                    })
                    .collect()
            };

            // Build a history in which the wallet receives a note in every block.
            for count in history {
                let ours = fake_commitment_tx(&next_cms(count));
                track(&mut txs, &ours);
                let height = chain.next_height();
                let mut tree = chain.tip_tree();
                let block = chain.mine(vec![ours]);
                cache.increment(&mut txs, &block, height, &mut tree).unwrap();
            }
            let snapshot = (txs.clone(), cache.clone());

            let mut blocks = vec![];
            for count in &reorg {
                let other = fake_commitment_tx(&next_cms(*count));
                let height = chain.next_height();
                let mut tree = chain.tip_tree();
                let block = chain.mine(vec![other]);
                cache.increment(&mut txs, &block, height, &mut tree).unwrap();
                blocks.push(height);
            }
            for height in blocks.into_iter().rev() {
                cache.decrement(&mut txs, height).unwrap();
                chain.disconnect_tip();
            }

            prop_assert_eq!(&cache, &snapshot.1);
            for (txid, wtx) in &txs {
                prop_assert_eq!(&wtx.sapling_note_data, &snapshot.0[txid].sapling_note_data);
            }
        }
    }
}
