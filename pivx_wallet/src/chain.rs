//! Interfaces to the node components the wallet depends on.
//!
//! The wallet never reaches into node state directly. Block data comes from a
//! [`ChainOracle`], transparent coins and their signatures from a [`CoinSource`], and
//! finished transactions leave through a [`Relay`].

use std::error;
use std::fmt;

use pivx_primitives::{
    block::{Block, BlockHash},
    consensus::{BlockHeight, NetworkUpgrade},
    legacy::{Script, TransparentAddress},
    merkle_tree::CommitmentTree,
    sapling::Node,
    transaction::{
        builder::TransparentSigner,
        components::{Amount, OutPoint},
        Transaction,
    },
};

/// Read access to the node's view of the best chain.
pub trait ChainOracle {
    /// Height of the active chain tip, or `None` before the genesis block is connected.
    fn best_tip_height(&self) -> Option<BlockHeight>;

    /// Whether the block with the given hash is part of the active chain.
    fn is_in_active_chain(&self, block_hash: &BlockHash) -> bool;

    /// Returns the active-chain block at `height`.
    fn read_block(&self, height: BlockHeight) -> Option<Block>;

    /// Returns the note commitment tree as of the end of the active-chain block at
    /// `height`.
    fn sapling_tree_at(&self, height: BlockHeight) -> Option<CommitmentTree<Node>>;

    fn network_upgrade_active(&self, nu: NetworkUpgrade, height: BlockHeight) -> bool;
}

/// A transparent coin that can fund a transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransparentCoin {
    pub outpoint: OutPoint,
    pub script_pubkey: Script,
    pub value: Amount,
}

impl TransparentCoin {
    pub fn address(&self) -> Option<TransparentAddress> {
        self.script_pubkey.address()
    }
}

/// The transparent half of the wallet, which owns transparent keys and coins.
pub trait CoinSource: TransparentSigner {
    /// Returns the spendable coins with at least `min_depth` confirmations, optionally
    /// restricted to those paying `from`.
    fn available_coins(
        &self,
        from: Option<&TransparentAddress>,
        include_delegated: bool,
        min_depth: u32,
    ) -> Vec<TransparentCoin>;

    /// Looks up a single spendable coin for explicit coin control.
    fn get_coin(&self, outpoint: &OutPoint) -> Option<TransparentCoin>;

    /// Returns a fresh address for transparent change.
    fn change_address(&self) -> Option<TransparentAddress>;
}

/// Reasons the relay refuses a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// An input or nullifier is already spent by a transaction the node knows about.
    DoubleSpend,
    Rejected(String),
}

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RelayError::DoubleSpend => write!(f, "Transaction conflicts with a known spend"),
            RelayError::Rejected(reason) => write!(f, "Transaction rejected: {}", reason),
        }
    }
}

impl error::Error for RelayError {}

/// Submits transactions to the node's mempool and the network.
pub trait Relay {
    fn broadcast(&mut self, tx: &Transaction) -> Result<(), RelayError>;
}
