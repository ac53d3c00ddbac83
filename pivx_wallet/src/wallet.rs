//! The wallet context.
//!
//! A [`Wallet`] owns every piece of shielded wallet state: the key store, the wallet's
//! transactions with their note data, the nullifier maps and the witness cache. It is
//! an explicit value that callers pass around by reference; mutations go through
//! `&mut self`, so a caller sharing it between threads serializes access with a single
//! lock and observers never see a half-applied block.

use rand_core::{CryptoRng, RngCore};
use secrecy::SecretVec;
use std::collections::{btree_map::Entry, BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use pivx_primitives::{
    block::Block,
    consensus::{BlockHeight, Parameters, H0},
    memo::MemoBytes,
    merkle_tree::{CommitmentTree, IncrementalWitness},
    sapling::{
        keys::OutgoingViewingKey,
        note_encryption::{try_sapling_note_decryption, try_sapling_output_recovery},
        Node, Note, PaymentAddress,
    },
    transaction::{components::OutPoint, Transaction, TxId},
    zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
};

use crate::{
    chain::ChainOracle,
    config::WalletConfig,
    encoding::Destination,
    error::Error,
    keys::{hd_chain::SeedId, KeyAddResult, KeyManager},
    nullifiers::{compute_nullifier, NullifierTracker},
    scan,
    storage::{KeyValueStore, WalletDb},
    witness::{violation, InvariantViolation, WitnessCache},
};

mod tx;

pub use tx::{NoteData, TxStatus, WalletTx};

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// The shielded wallet.
pub struct Wallet<P, S> {
    params: P,
    config: WalletConfig,
    db: WalletDb<S>,
    keys: KeyManager,
    txs: BTreeMap<TxId, WalletTx>,
    nullifiers: NullifierTracker,
    witness_cache: WitnessCache,
}

impl<P: Parameters + Clone, S: KeyValueStore> Wallet<P, S> {
    /// Opens the wallet stored in `store`, which may be empty.
    ///
    /// The nullifier maps are rebuilt from the stored transactions.
    pub fn load(params: P, config: WalletConfig, store: S) -> Result<Self, Error> {
        let db = WalletDb::new(store);
        let keys = KeyManager::load(&db)?;
        let txs: BTreeMap<TxId, WalletTx> = db
            .load_txs()?
            .into_iter()
            .map(|wtx| (wtx.txid(), wtx))
            .collect();
        let nullifiers = NullifierTracker::rebuild(&txs);
        let witness_cache = WitnessCache::with_size(
            db.read_witness_cache_size()?.unwrap_or(0),
            config.witness_cache_size,
        );

        info!(
            txs = txs.len(),
            witness_cache_size = witness_cache.size(),
            "Loaded shielded wallet"
        );
        Ok(Wallet {
            params,
            config,
            db,
            keys,
            txs,
            nullifiers,
            witness_cache,
        })
    }

    pub fn params(&self) -> &P {
        &self.params
    }

    pub fn config(&self) -> &WalletConfig {
        &self.config
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn db(&self) -> &WalletDb<S> {
        &self.db
    }

    pub fn txs(&self) -> &BTreeMap<TxId, WalletTx> {
        &self.txs
    }

    pub fn get_tx(&self, txid: &TxId) -> Option<&WalletTx> {
        self.txs.get(txid)
    }

    pub fn nullifiers(&self) -> &NullifierTracker {
        &self.nullifiers
    }

    pub fn witness_cache(&self) -> &WitnessCache {
        &self.witness_cache
    }

    /// Decodes a transparent or shielded address of the wallet's network.
    pub fn decode_address(&self, s: &str) -> Result<Destination, Error> {
        Ok(Destination::decode(&self.params, s)?)
    }

    //
    // Keys
    //

    pub fn generate_hd_seed<R: RngCore + CryptoRng>(&mut self, rng: &mut R) -> Result<SeedId, Error> {
        self.keys.generate_hd_seed(&mut self.db, rng)
    }

    pub fn set_hd_seed(&mut self, seed: SecretVec<u8>, force: bool) -> Result<SeedId, Error> {
        self.keys.set_hd_seed(&mut self.db, seed, force)
    }

    /// Derives a new shielded key from the HD seed and returns its default address.
    pub fn generate_address(&mut self) -> Result<PaymentAddress, Error> {
        self.keys.generate_address(&self.params, &mut self.db)
    }

    pub fn import_spending_key(
        &mut self,
        extsk: ExtendedSpendingKey,
        creation_time: i64,
    ) -> Result<KeyAddResult, Error> {
        self.keys
            .import_spending_key(&self.params, &mut self.db, extsk, creation_time)
    }

    pub fn import_viewing_key(
        &mut self,
        extfvk: ExtendedFullViewingKey,
    ) -> Result<KeyAddResult, Error> {
        self.keys.import_viewing_key(&mut self.db, extfvk)
    }

    pub fn encrypt_keys<R: RngCore + CryptoRng>(
        &mut self,
        rng: &mut R,
        passphrase: &[u8],
    ) -> Result<(), Error> {
        self.keys.encrypt_keys(&mut self.db, rng, passphrase)
    }

    pub fn lock(&mut self) {
        self.keys.lock();
    }

    /// Unlocks the wallet and back-fills nullifiers of notes witnessed while it was
    /// locked.
    pub fn unlock(&mut self, passphrase: &[u8]) -> Result<(), Error> {
        self.keys.unlock(passphrase)?;
        self.update_nullifier_note_map()
    }

    pub fn is_locked(&self) -> bool {
        self.keys.is_locked()
    }

    //
    // Transactions
    //

    /// Records `tx` if it pays or spends any wallet note, or is already recorded.
    ///
    /// Returns whether the transaction is now part of the wallet. Recording a mined
    /// transaction that spends a nullifier already spent by another mined transaction
    /// in the active chain fails with [`Error::ConflictingSpend`] and changes nothing.
    pub fn add_to_wallet_if_involving_me<C: ChainOracle>(
        &mut self,
        chain: &C,
        tx: &Transaction,
        status: TxStatus,
    ) -> Result<bool, Error> {
        let txid = tx.txid();
        let (notes, new_addresses) = scan::find_my_notes(&self.keys, tx);
        let spends_mine = tx
            .nullifiers()
            .any(|nf| self.nullifiers.is_nullifier_from_me(nf));
        if notes.is_empty() && !spends_mine && !self.txs.contains_key(&txid) {
            return Ok(false);
        }

        let status = match self.txs.get(&txid) {
            Some(existing) => existing.status.merge(status),
            None => status,
        };
        let mined = matches!(status, TxStatus::Mined { .. });
        if mined {
            self.check_active_conflicts(chain, tx)?;
        }
        let conflicts = self.nullifiers.conflicts_of(tx);

        if !notes.is_empty() {
            debug!(%txid, notes = notes.len(), "Found shielded notes");
        }
        let wtx = self
            .txs
            .entry(txid)
            .or_insert_with(|| WalletTx::new(tx.clone(), status, now()));
        wtx.status = status;
        wtx.from_me |= spends_mine;
        for (outpoint, nd) in notes {
            match wtx.sapling_note_data.entry(outpoint) {
                Entry::Vacant(e) => {
                    e.insert(nd);
                }
                Entry::Occupied(mut e) => {
                    // Witnesses and the nullifier depend on chain state, not on the
                    // transaction, so they survive the merge.
                    let existing = e.get_mut();
                    existing.ivk = nd.ivk;
                    existing.value = nd.value;
                    existing.address = nd.address;
                    existing.memo = nd.memo;
                }
            }
        }

        for (addr, ivk) in new_addresses {
            self.keys.add_address(&mut self.db, addr, ivk)?;
        }

        self.nullifiers.register_spends(tx);
        let mut conflicted = vec![];
        for (_, other) in conflicts {
            if let Some(owtx) = self.txs.get(&other) {
                if mined && owtx.status == TxStatus::Unconfirmed {
                    conflicted.push(other);
                } else if !mined && owtx.is_in_main_chain(chain) {
                    conflicted.push(txid);
                }
            }
        }
        conflicted.sort();
        conflicted.dedup();
        for conflicted_txid in conflicted {
            if let Some(wtx) = self.txs.get_mut(&conflicted_txid) {
                warn!(txid = %conflicted_txid, "Marking transaction as conflicted");
                wtx.status = TxStatus::Conflicted;
                self.db.write_tx(wtx)?;
            }
        }

        self.update_nullifier_note_map_for(&txid)?;
        if let Some(wtx) = self.txs.get(&txid) {
            self.db.write_tx(wtx)?;
        }
        Ok(true)
    }

    /// Fails if `tx` spends a nullifier that a transaction in the active chain also
    /// spends.
    fn check_active_conflicts<C: ChainOracle>(
        &self,
        chain: &C,
        tx: &Transaction,
    ) -> Result<(), Error> {
        let txid = tx.txid();
        for (nullifier, other) in self.nullifiers.conflicts_of(tx) {
            if let Some(owtx) = self.txs.get(&other) {
                if owtx.is_in_main_chain(chain) {
                    warn!(%txid, conflicts_with = %other, "Mined transaction spends a nullifier spent in the active chain");
                    return Err(Error::ConflictingSpend {
                        txid,
                        conflicts_with: other,
                        nullifier,
                    });
                }
            }
        }
        Ok(())
    }

    /// Records a transaction the wallet created, ahead of broadcasting it.
    pub fn commit_transaction<C: ChainOracle>(
        &mut self,
        chain: &C,
        tx: &Transaction,
    ) -> Result<(), Error> {
        let txid = tx.txid();
        self.add_to_wallet_if_involving_me(chain, tx, TxStatus::Unconfirmed)?;
        let wtx = self
            .txs
            .entry(txid)
            .or_insert_with(|| WalletTx::new(tx.clone(), TxStatus::Unconfirmed, now()));
        wtx.from_me = true;
        self.db.write_tx(wtx)?;
        self.recover_sent_notes(&txid)?;

        info!(%txid, "Committed transaction");
        Ok(())
    }

    /// Gives up on an unmined transaction, releasing the notes it spends.
    pub fn abandon_transaction(&mut self, txid: &TxId) -> Result<(), Error> {
        if let Some(wtx) = self.txs.get_mut(txid) {
            if matches!(wtx.status, TxStatus::Unconfirmed | TxStatus::Conflicted) {
                wtx.status = TxStatus::Abandoned;
                self.db.write_tx(wtx)?;
                info!(%txid, "Abandoned transaction");
            }
        }
        Ok(())
    }

    //
    // Nullifiers
    //

    /// Recomputes the nullifiers of every wallet note from its newest witness.
    pub fn update_nullifier_note_map(&mut self) -> Result<(), Error> {
        let txids: Vec<TxId> = self.txs.keys().copied().collect();
        for txid in &txids {
            self.update_nullifier_note_map_for(txid)?;
        }
        Ok(())
    }

    /// Recomputes the nullifiers of the wallet notes created in `block`.
    pub fn update_nullifier_note_map_for_block(&mut self, block: &Block) -> Result<(), Error> {
        for tx in &block.vtx {
            self.update_nullifier_note_map_for(&tx.txid())?;
        }
        Ok(())
    }

    fn update_nullifier_note_map_for(&mut self, txid: &TxId) -> Result<(), Error> {
        let WalletTx {
            tx,
            sapling_note_data,
            ..
        } = match self.txs.get_mut(txid) {
            Some(wtx) => wtx,
            None => return Ok(()),
        };

        for (outpoint, nd) in sapling_note_data.iter_mut() {
            let ivk = match &nd.ivk {
                Some(ivk) => ivk,
                None => continue,
            };
            let witness = match nd.witnesses.front() {
                Some(witness) => witness,
                None => {
                    if let Some(nf) = nd.nullifier.take() {
                        self.nullifiers.clear_note(&nf);
                    }
                    continue;
                }
            };

            let note = tx
                .shielded_outputs()
                .get(outpoint.n() as usize)
                .and_then(|output| {
                    try_sapling_note_decryption(
                        ivk,
                        &output.ephemeral_key,
                        &output.cmu,
                        &output.enc_ciphertext,
                    )
                })
                .map(|(note, _, _)| note)
                .ok_or_else(|| violation(InvariantViolation::NoteDecryptionFailed(*outpoint)))?;

            let fvk = self.keys.full_viewing_key(ivk).map(|extfvk| &extfvk.fvk);
            if let Some(nf) = compute_nullifier(fvk, &note, Some(witness)) {
                nd.nullifier = Some(nf);
                self.nullifiers.set_note(nf, *outpoint);
            }
        }
        Ok(())
    }

    //
    // Chain updates
    //

    /// Applies the block at `height`, which has just been connected to the active chain.
    pub fn block_connected<C: ChainOracle>(
        &mut self,
        chain: &C,
        block: &Block,
        height: BlockHeight,
    ) -> Result<(), Error> {
        // Nothing is recorded unless the whole block can be applied.
        for tx in &block.vtx {
            self.check_active_conflicts(chain, tx)?;
        }
        let mut tree = if height == H0 {
            CommitmentTree::empty()
        } else {
            chain
                .sapling_tree_at(height - 1)
                .ok_or(Error::ChainDataUnavailable(height - 1))?
        };
        self.witness_cache.check_increment(&self.txs, height)?;

        let block_hash = block.hash();
        for (index, tx) in block.vtx.iter().enumerate() {
            self.add_to_wallet_if_involving_me(
                chain,
                tx,
                TxStatus::Mined {
                    block_hash,
                    height,
                    index: index as u32,
                },
            )?;
        }

        self.witness_cache
            .increment(&mut self.txs, block, height, &mut tree)?;
        self.update_nullifier_note_map_for_block(block)?;
        self.persist_notes()?;

        debug!(%height, witness_cache_size = self.witness_cache.size(), "Connected block");
        Ok(())
    }

    /// Reverts the block at `height`, which has just left the active chain.
    pub fn block_disconnected(&mut self, block: &Block, height: BlockHeight) -> Result<(), Error> {
        self.witness_cache.decrement(&mut self.txs, height)?;
        for tx in &block.vtx {
            if let Some(wtx) = self.txs.get_mut(&tx.txid()) {
                wtx.status = TxStatus::Unconfirmed;
            }
        }
        self.update_nullifier_note_map_for_block(block)?;
        self.persist_notes()?;

        debug!(%height, witness_cache_size = self.witness_cache.size(), "Disconnected block");
        Ok(())
    }

    /// Replays the active chain from `from` to the tip, returning the height of the last
    /// block applied.
    ///
    /// Rescanning from the start of the chain discards every cached witness first. The
    /// scan stops between blocks once `cancel` is set.
    pub fn rescan<C: ChainOracle>(
        &mut self,
        chain: &C,
        from: BlockHeight,
        cancel: &AtomicBool,
    ) -> Result<Option<BlockHeight>, Error> {
        let tip = match chain.best_tip_height() {
            Some(tip) => tip,
            None => return Ok(None),
        };

        if from == H0 {
            self.witness_cache.reset(&mut self.txs);
            self.update_nullifier_note_map()?;
        }

        info!(%from, %tip, "Rescanning shielded wallet");
        let mut last = None;
        let mut height = from;
        while height <= tip {
            if cancel.load(Ordering::Relaxed) {
                info!(%height, "Rescan cancelled");
                break;
            }
            let block = chain
                .read_block(height)
                .ok_or(Error::ChainDataUnavailable(height))?;
            self.block_connected(chain, &block, height)?;
            last = Some(height);

            if u32::from(height) % 1000 == 0 {
                info!(%height, %tip, "Rescan progress");
            }
            height = height + 1;
        }

        Ok(last)
    }

    fn persist_notes(&mut self) -> Result<(), Error> {
        for wtx in self.txs.values() {
            if wtx.my_notes().next().is_some() {
                self.db.write_tx(wtx)?;
            }
        }
        self.db.write_witness_cache_size(self.witness_cache.size())?;
        Ok(())
    }

    //
    // Sent notes
    //

    /// Decrypts output `index` of `tx` as its sender.
    ///
    /// Outputs funded by transparent inputs are recovered with the wallet's common
    /// outgoing viewing key; others with the outgoing viewing keys of the wallet notes
    /// the transaction spends.
    pub fn recover_sent_note(
        &self,
        tx: &Transaction,
        index: usize,
    ) -> Option<(Note, PaymentAddress, MemoBytes)> {
        let output = tx.shielded_outputs().get(index)?;

        let mut ovks = BTreeSet::new();
        if !tx.vin.is_empty() {
            match self.keys.cached_common_ovk() {
                Some(ovk) => {
                    ovks.insert(ovk);
                }
                None => {
                    warn!(txid = %tx.txid(), "No common outgoing viewing key to recover outputs");
                    return None;
                }
            }
        }
        for nf in tx.nullifiers() {
            let ovk = self
                .nullifiers
                .note_for(nf)
                .and_then(|outpoint| self.txs.get(outpoint.hash())?.sapling_note_data.get(outpoint))
                .and_then(|nd| nd.ivk.as_ref())
                .and_then(|ivk| self.keys.full_viewing_key(ivk))
                .map(|extfvk| extfvk.fvk.ovk);
            if let Some(ovk) = ovk {
                ovks.insert(ovk);
            }
        }

        ovks.iter().find_map(|ovk| {
            try_sapling_output_recovery(
                ovk,
                &output.cv,
                &output.cmu,
                &output.ephemeral_key,
                &output.enc_ciphertext,
                &output.out_ciphertext,
            )
        })
    }

    /// Caches the plaintext of every output of `txid` the wallet can recover as its
    /// sender, returning how many were added.
    pub fn recover_sent_notes(&mut self, txid: &TxId) -> Result<usize, Error> {
        let tx = match self.txs.get(txid) {
            Some(wtx) => wtx.tx.clone(),
            None => return Ok(0),
        };

        let recovered: Vec<(OutPoint, NoteData)> = (0..tx.shielded_outputs().len())
            .map(|index| OutPoint::new(*txid, index as u32))
            .filter(|outpoint| {
                self.txs[txid]
                    .sapling_note_data
                    .get(outpoint)
                    .map_or(true, |nd| nd.value.is_none())
            })
            .filter_map(|outpoint| {
                self.recover_sent_note(&tx, outpoint.n() as usize)
                    .map(|(note, to, memo)| (outpoint, NoteData::sent(note.value, to, memo)))
            })
            .collect();

        let count = recovered.len();
        if count > 0 {
            if let Some(wtx) = self.txs.get_mut(txid) {
                wtx.sapling_note_data.extend(recovered);
                self.db.write_tx(wtx)?;
            }
        }
        Ok(count)
    }

    //
    // Per-note accessors
    //

    fn note_data(&self, outpoint: &OutPoint) -> Option<&NoteData> {
        self.txs
            .get(outpoint.hash())
            .and_then(|wtx| wtx.sapling_note_data.get(outpoint))
    }

    pub fn note_address(&self, outpoint: &OutPoint) -> Option<PaymentAddress> {
        self.note_data(outpoint).and_then(|nd| nd.address)
    }

    pub fn note_value(&self, outpoint: &OutPoint) -> Option<u64> {
        self.note_data(outpoint).and_then(|nd| nd.value)
    }

    pub fn note_memo(&self, outpoint: &OutPoint) -> Option<MemoBytes> {
        self.note_data(outpoint).and_then(|nd| nd.memo.clone())
    }

    /// Returns the newest witnesses of `outpoints` and their shared anchor.
    pub fn final_witnesses(
        &self,
        outpoints: &[OutPoint],
    ) -> Result<(Vec<Option<IncrementalWitness<Node>>>, Option<Node>), Error> {
        Ok(self.witness_cache.final_witnesses(&self.txs, outpoints)?)
    }

    /// The wallet-wide outgoing viewing key, derived from the seed on first use.
    pub fn common_ovk(&mut self) -> Result<OutgoingViewingKey, Error> {
        self.keys.common_ovk(&mut self.db)
    }
}
