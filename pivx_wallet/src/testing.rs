//! Utilities for testing wallet code: an in-memory chain, fake transactions, and
//! collaborators that record what the wallet hands them.

use group::GroupEncoding;
use rand::{rngs::OsRng, RngCore};

use pivx_primitives::{
    block::{Block, BlockHash, BlockHeaderData},
    consensus::{BlockHeight, LocalNetwork, NetworkUpgrade, Parameters, H0},
    legacy::{Script, TransparentAddress},
    memo::MemoBytes,
    merkle_tree::CommitmentTree,
    sapling::{
        note_encryption::{SaplingNoteEncryption, ENC_CIPHERTEXT_SIZE, OUT_CIPHERTEXT_SIZE},
        prover::mock::MockTxProver,
        Node, Nullifier, PaymentAddress, Rseed,
    },
    transaction::{
        builder::{dummy_p2pkh_script_sig, Builder, NoTransparentInputs, TransparentSigner},
        components::{
            Amount, OutPoint, OutputDescription, SaplingBundle, SpendDescription,
            GROTH_PROOF_SIZE, SIGNATURE_SIZE,
        },
        Transaction, TransactionData, TxId,
    },
    zip32::ExtendedSpendingKey,
};

use crate::{
    chain::{ChainOracle, CoinSource, Relay, RelayError, TransparentCoin},
    config::WalletConfig,
    scan::decrypt_output,
    storage::MemoryStore,
    wallet::Wallet,
};

/// The network used throughout the tests, with every upgrade active from genesis.
pub fn network() -> LocalNetwork {
    LocalNetwork::all_active_from(H0)
}

/// An in-memory active chain.
///
/// Each block is stored with the note commitment tree as of its end.
pub struct FakeChain {
    params: LocalNetwork,
    blocks: Vec<(Block, CommitmentTree<Node>)>,
    mined: u32,
}

impl FakeChain {
    pub fn new() -> Self {
        FakeChain::with_params(network())
    }

    pub fn with_params(params: LocalNetwork) -> Self {
        FakeChain {
            params,
            blocks: vec![],
            mined: 0,
        }
    }

    pub fn next_height(&self) -> BlockHeight {
        BlockHeight::from_u32(self.blocks.len() as u32)
    }

    /// The commitment tree as of the current tip.
    pub fn tip_tree(&self) -> CommitmentTree<Node> {
        self.blocks
            .last()
            .map(|(_, tree)| tree.clone())
            .unwrap_or_else(CommitmentTree::empty)
    }

    pub fn sapling_tree(&self, height: BlockHeight) -> CommitmentTree<Node> {
        self.sapling_tree_at(height)
            .expect("height is in the active chain")
    }

    /// Appends a block containing `vtx` to the chain and returns it.
    pub fn mine(&mut self, vtx: Vec<Transaction>) -> Block {
        let height = self.next_height();
        let prev_block = self
            .blocks
            .last()
            .map_or(BlockHash([0; 32]), |(block, _)| block.hash());

        let mut tree = self.tip_tree();
        for output in vtx.iter().flat_map(|tx| tx.shielded_outputs()) {
            tree.append(output.cmu).expect("tree is not full");
        }

        // Blocks mined at the same height after a reorg still get distinct hashes.
        self.mined += 1;
        let header = BlockHeaderData {
            version: 10,
            prev_block,
            merkle_root: [0; 32],
            time: u32::from(height),
            bits: 0,
            nonce: self.mined,
            final_sapling_root: tree.root().to_bytes(),
        }
        .freeze()
        .expect("valid header");

        let block = Block { header, vtx };
        self.blocks.push((block.clone(), tree));
        block
    }

    /// Removes the tip block from the active chain and returns it.
    pub fn disconnect_tip(&mut self) -> Block {
        self.blocks.pop().expect("chain is not empty").0
    }
}

impl Default for FakeChain {
    fn default() -> Self {
        FakeChain::new()
    }
}

impl ChainOracle for FakeChain {
    fn best_tip_height(&self) -> Option<BlockHeight> {
        (self.blocks.len() as u32)
            .checked_sub(1)
            .map(BlockHeight::from_u32)
    }

    fn is_in_active_chain(&self, block_hash: &BlockHash) -> bool {
        self.blocks.iter().any(|(block, _)| block.hash() == *block_hash)
    }

    fn read_block(&self, height: BlockHeight) -> Option<Block> {
        self.blocks
            .get(u32::from(height) as usize)
            .map(|(block, _)| block.clone())
    }

    fn sapling_tree_at(&self, height: BlockHeight) -> Option<CommitmentTree<Node>> {
        self.blocks
            .get(u32::from(height) as usize)
            .map(|(_, tree)| tree.clone())
    }

    fn network_upgrade_active(&self, nu: NetworkUpgrade, height: BlockHeight) -> bool {
        self.params.is_nu_active(nu, height)
    }
}

fn fake_output(cmu: Node) -> OutputDescription {
    OutputDescription {
        cv: [0; 32],
        cmu,
        ephemeral_key: [0; 32],
        enc_ciphertext: [0; ENC_CIPHERTEXT_SIZE],
        out_ciphertext: [0; OUT_CIPHERTEXT_SIZE],
        zkproof: [0; GROTH_PROOF_SIZE],
    }
}

fn freeze(bundle: Option<SaplingBundle>, lock_time: u32) -> Transaction {
    TransactionData {
        sapling_bundle: bundle,
        lock_time,
        ..Default::default()
    }
    .freeze()
    .expect("valid transaction")
}

/// A transaction whose outputs carry the given note commitments and nothing else.
pub fn fake_commitment_tx(cmus: &[Node]) -> Transaction {
    freeze(
        Some(SaplingBundle {
            value_balance: Amount::zero(),
            shielded_spends: vec![],
            shielded_outputs: cmus.iter().copied().map(fake_output).collect(),
            binding_sig: Some([0; SIGNATURE_SIZE]),
        }),
        0,
    )
}

/// A transaction revealing the given nullifiers. `tag` distinguishes transactions
/// spending the same nullifiers.
pub fn fake_spend_tx(nullifiers: &[Nullifier], tag: u32) -> Transaction {
    let spends = nullifiers
        .iter()
        .map(|nf| SpendDescription {
            cv: [0; 32],
            anchor: Node::new([0; 32]),
            nullifier: *nf,
            rk: [0; 32],
            zkproof: [0; GROTH_PROOF_SIZE],
            spend_auth_sig: Some([0; SIGNATURE_SIZE]),
        })
        .collect();
    freeze(
        Some(SaplingBundle {
            value_balance: Amount::zero(),
            shielded_spends: spends,
            shielded_outputs: vec![],
            binding_sig: Some([0; SIGNATURE_SIZE]),
        }),
        tag,
    )
}

/// A transaction with a correctly encrypted output for each `(to, value, memo)`.
///
/// The outputs cannot be recovered by their sender, and the proofs are meaningless.
pub fn fake_shielded_tx(outputs: &[(PaymentAddress, u64, MemoBytes)]) -> Transaction {
    let mut rng = OsRng;
    let shielded_outputs = outputs
        .iter()
        .map(|(to, value, memo)| {
            let mut rseed = [0; 32];
            rng.fill_bytes(&mut rseed);
            let note = to
                .create_note(*value, Rseed::AfterZip212(rseed))
                .expect("valid payment address");
            let cmu = note.cmu();
            let encryptor = SaplingNoteEncryption::new(None, note, *to, memo.clone(), &mut rng);

            OutputDescription {
                ephemeral_key: encryptor.epk().to_bytes(),
                enc_ciphertext: encryptor.encrypt_note_plaintext(),
                ..fake_output(cmu)
            }
        })
        .collect();
    let total: u64 = outputs.iter().map(|(_, value, _)| value).sum();

    freeze(
        Some(SaplingBundle {
            value_balance: Amount::from_i64(-(total as i64)).expect("valid total"),
            shielded_spends: vec![],
            shielded_outputs,
            binding_sig: Some([0; SIGNATURE_SIZE]),
        }),
        0,
    )
}

/// An empty wallet on the test network.
pub fn new_wallet() -> Wallet<LocalNetwork, MemoryStore> {
    Wallet::load(network(), WalletConfig::default(), MemoryStore::new())
        .expect("empty store loads")
}

/// Mines a block containing `vtx` and applies it to `wallet`.
pub fn connect(
    wallet: &mut Wallet<LocalNetwork, MemoryStore>,
    chain: &mut FakeChain,
    vtx: Vec<Transaction>,
) -> Block {
    let height = chain.next_height();
    let block = chain.mine(vtx);
    wallet
        .block_connected(chain, &block, height)
        .expect("block applies");
    block
}

/// Builds a transaction spending the wallet notes at `spends`, all held under
/// `extsk`, into new notes paying `outputs`.
pub fn spend_notes(
    wallet: &Wallet<LocalNetwork, MemoryStore>,
    extsk: &ExtendedSpendingKey,
    spends: &[OutPoint],
    outputs: &[(PaymentAddress, u64)],
    fee: u64,
) -> Transaction {
    let (witnesses, anchor) = wallet.final_witnesses(spends).expect("consistent witnesses");
    let anchor = anchor.expect("spent notes are witnessed");
    let target_height = wallet
        .params()
        .activation_height(NetworkUpgrade::V5_0)
        .unwrap_or(H0);

    let mut builder = Builder::new(*wallet.params(), target_height, wallet.config().fee_rate());
    for (outpoint, witness) in spends.iter().zip(witnesses) {
        let wtx = wallet.get_tx(outpoint.hash()).expect("wallet transaction");
        let output = &wtx.tx.shielded_outputs()[outpoint.n() as usize];
        let (_, note, to, _) = decrypt_output(wallet.keys().ivks(), output).expect("wallet note");
        builder
            .add_sapling_spend(
                extsk.expsk.clone(),
                *to.diversifier(),
                note,
                anchor,
                witness.expect("witnessed note"),
            )
            .expect("valid spend");
    }
    for (to, value) in outputs {
        builder
            .add_sapling_output(
                Some(extsk.expsk.ovk),
                *to,
                Amount::from_u64(*value).expect("valid value"),
                MemoBytes::empty(),
            )
            .expect("valid output");
    }
    builder.set_fee(Amount::from_u64(fee).expect("valid fee"));
    builder
        .build(&MockTxProver, &NoTransparentInputs)
        .expect("balanced transaction")
        .0
}

/// A relay that keeps every transaction it accepts, or refuses all of them.
#[derive(Debug, Default)]
pub struct RecordingRelay {
    pub sent: Vec<Transaction>,
    reject: Option<RelayError>,
}

impl RecordingRelay {
    pub fn rejecting(error: RelayError) -> Self {
        RecordingRelay {
            sent: vec![],
            reject: Some(error),
        }
    }
}

impl Relay for RecordingRelay {
    fn broadcast(&mut self, tx: &Transaction) -> Result<(), RelayError> {
        match &self.reject {
            Some(e) => Err(e.clone()),
            None => {
                self.sent.push(tx.clone());
                Ok(())
            }
        }
    }
}

/// A fixed set of confirmed transparent coins, signed with placeholder signatures.
#[derive(Debug, Default)]
pub struct FixedCoinSource {
    coins: Vec<TransparentCoin>,
    change: Option<TransparentAddress>,
}

impl FixedCoinSource {
    /// One coin for each `(address, value)`, each in its own funding transaction.
    pub fn new(coins: Vec<(TransparentAddress, Amount)>, change: Option<TransparentAddress>) -> Self {
        let coins = coins
            .into_iter()
            .enumerate()
            .map(|(i, (addr, value))| TransparentCoin {
                outpoint: OutPoint::new(TxId::from_bytes([i as u8 + 1; 32]), 0),
                script_pubkey: addr.script(),
                value,
            })
            .collect();
        FixedCoinSource { coins, change }
    }
}

impl TransparentSigner for FixedCoinSource {
    fn sign(&self, _: &TransactionData, _: usize, _: &Script, _: Amount) -> Result<Script, ()> {
        Ok(dummy_p2pkh_script_sig())
    }
}

impl CoinSource for FixedCoinSource {
    fn available_coins(
        &self,
        from: Option<&TransparentAddress>,
        _include_delegated: bool,
        _min_depth: u32,
    ) -> Vec<TransparentCoin> {
        self.coins
            .iter()
            .filter(|coin| from.map_or(true, |addr| coin.address().as_ref() == Some(addr)))
            .cloned()
            .collect()
    }

    fn get_coin(&self, outpoint: &OutPoint) -> Option<TransparentCoin> {
        self.coins.iter().find(|coin| coin.outpoint == *outpoint).cloned()
    }

    fn change_address(&self) -> Option<TransparentAddress> {
        self.change
    }
}
