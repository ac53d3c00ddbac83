//! Transactions as the wallet records them.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::collections::{BTreeMap, VecDeque};
use std::io::{self, Read, Write};

use pivx_primitives::{
    block::BlockHash,
    consensus::BlockHeight,
    memo::{MemoBytes, MEMO_SIZE},
    merkle_tree::IncrementalWitness,
    sapling::{Node, Nullifier, PaymentAddress, SaplingIvk},
    serialize::{Optional, Vector},
    transaction::{components::OutPoint, Transaction, TxId},
};

use crate::chain::ChainOracle;

fn invalid(msg: &'static str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

/// Wallet bookkeeping for one shielded output of a transaction.
///
/// Outputs the wallet can decrypt with one of its incoming viewing keys are "mine" and
/// carry `ivk`. Outputs the wallet only recovered as their sender leave it unset and
/// never hold witnesses.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct NoteData {
    pub ivk: Option<SaplingIvk>,
    /// Set once a witness fixes the note's position in the commitment tree.
    pub nullifier: Option<Nullifier>,
    /// Witnesses for the most recent blocks, newest first.
    pub witnesses: VecDeque<IncrementalWitness<Node>>,
    /// The height of the block the newest witness corresponds to.
    pub witness_height: Option<BlockHeight>,
    pub value: Option<u64>,
    pub address: Option<PaymentAddress>,
    /// `None` when the note carries no memo.
    pub memo: Option<MemoBytes>,
}

impl NoteData {
    /// Note data for an output decrypted with `ivk`.
    pub fn received(ivk: SaplingIvk, value: u64, address: PaymentAddress, memo: MemoBytes) -> Self {
        NoteData {
            ivk: Some(ivk),
            value: Some(value),
            address: Some(address),
            memo: (!memo.is_empty()).then_some(memo),
            ..Default::default()
        }
    }

    /// Note data for an output the wallet sent to someone else.
    pub fn sent(value: u64, address: PaymentAddress, memo: MemoBytes) -> Self {
        NoteData {
            value: Some(value),
            address: Some(address),
            memo: (!memo.is_empty()).then_some(memo),
            ..Default::default()
        }
    }

    pub fn is_mine(&self) -> bool {
        self.ivk.is_some()
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let ivk = Optional::read(&mut reader, |r| {
            let mut repr = [0u8; 32];
            r.read_exact(&mut repr)?;
            SaplingIvk::from_repr(repr).ok_or_else(|| invalid("invalid incoming viewing key"))
        })?;
        let nullifier = Optional::read(&mut reader, |r| {
            let mut nf = [0u8; 32];
            r.read_exact(&mut nf)?;
            Ok(Nullifier(nf))
        })?;
        let witnesses = Vector::read(&mut reader, |r| IncrementalWitness::<Node>::read(r))?.into();
        let witness_height = Optional::read(&mut reader, |r| {
            r.read_u32::<LittleEndian>().map(BlockHeight::from_u32)
        })?;
        let value = Optional::read(&mut reader, |r| r.read_u64::<LittleEndian>())?;
        let address = Optional::read(&mut reader, |r| {
            let mut bytes = [0u8; 43];
            r.read_exact(&mut bytes)?;
            PaymentAddress::from_bytes(&bytes).ok_or_else(|| invalid("invalid payment address"))
        })?;
        let memo = Optional::read(&mut reader, |r| {
            let mut bytes = [0u8; MEMO_SIZE];
            r.read_exact(&mut bytes)?;
            MemoBytes::from_bytes(&bytes).map_err(|_| invalid("invalid memo"))
        })?;

        Ok(NoteData {
            ivk,
            nullifier,
            witnesses,
            witness_height,
            value,
            address,
            memo,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        Optional::write(&mut writer, self.ivk.as_ref(), |w, ivk| {
            w.write_all(&ivk.to_repr())
        })?;
        Optional::write(&mut writer, self.nullifier, |w, nf| w.write_all(&nf.0))?;
        let witnesses: Vec<_> = self.witnesses.iter().collect();
        Vector::write(&mut writer, &witnesses, |w, witness| witness.write(w))?;
        Optional::write(&mut writer, self.witness_height, |w, height| {
            w.write_u32::<LittleEndian>(height.into())
        })?;
        Optional::write(&mut writer, self.value, |w, value| {
            w.write_u64::<LittleEndian>(value)
        })?;
        Optional::write(&mut writer, self.address.as_ref(), |w, addr| {
            w.write_all(&addr.to_bytes())
        })?;
        Optional::write(&mut writer, self.memo.as_ref(), |w, memo| {
            w.write_all(memo.as_array())
        })
    }
}

/// Where a wallet transaction stands relative to the chain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Included in a block. The block may since have left the active chain.
    Mined {
        block_hash: BlockHash,
        height: BlockHeight,
        index: u32,
    },
    /// Not yet in a block.
    Unconfirmed,
    /// Spends a nullifier that a transaction in the active chain also spends.
    Conflicted,
    /// Given up on by the wallet, e.g. after the relay rejected it.
    Abandoned,
}

impl TxStatus {
    /// The status of an already recorded transaction that is seen again as `incoming`.
    ///
    /// Only a mined sighting replaces block information. A mempool sighting revives an
    /// abandoned transaction but never demotes a mined or conflicted one.
    pub fn merge(self, incoming: TxStatus) -> TxStatus {
        match (self, incoming) {
            (_, TxStatus::Mined { .. }) => incoming,
            (TxStatus::Abandoned, TxStatus::Unconfirmed) => TxStatus::Unconfirmed,
            (existing, _) => existing,
        }
    }

    fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        match reader.read_u8()? {
            0 => {
                let mut hash = [0u8; 32];
                reader.read_exact(&mut hash)?;
                let height = BlockHeight::from_u32(reader.read_u32::<LittleEndian>()?);
                let index = reader.read_u32::<LittleEndian>()?;
                Ok(TxStatus::Mined {
                    block_hash: BlockHash(hash),
                    height,
                    index,
                })
            }
            1 => Ok(TxStatus::Unconfirmed),
            2 => Ok(TxStatus::Conflicted),
            3 => Ok(TxStatus::Abandoned),
            _ => Err(invalid("unknown transaction status")),
        }
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        match self {
            TxStatus::Mined {
                block_hash,
                height,
                index,
            } => {
                writer.write_u8(0)?;
                writer.write_all(&block_hash.0)?;
                writer.write_u32::<LittleEndian>((*height).into())?;
                writer.write_u32::<LittleEndian>(*index)
            }
            TxStatus::Unconfirmed => writer.write_u8(1),
            TxStatus::Conflicted => writer.write_u8(2),
            TxStatus::Abandoned => writer.write_u8(3),
        }
    }
}

/// A transaction relevant to the wallet, with its chain status and the wallet's data
/// about its shielded outputs.
#[derive(Clone, Debug)]
pub struct WalletTx {
    pub tx: Transaction,
    pub status: TxStatus,
    /// Unix timestamp of when the wallet first saw the transaction.
    pub time_received: i64,
    /// Whether the transaction spends wallet funds.
    pub from_me: bool,
    pub sapling_note_data: BTreeMap<OutPoint, NoteData>,
}

impl WalletTx {
    pub fn new(tx: Transaction, status: TxStatus, time_received: i64) -> Self {
        WalletTx {
            tx,
            status,
            time_received,
            from_me: false,
            sapling_note_data: BTreeMap::new(),
        }
    }

    pub fn txid(&self) -> TxId {
        self.tx.txid()
    }

    /// The number of confirmations of the transaction.
    ///
    /// Mined transactions whose block is no longer in the active chain, and
    /// transactions not yet mined, have depth 0. Conflicted and abandoned transactions
    /// have depth -1.
    pub fn depth<C: ChainOracle>(&self, chain: &C) -> i32 {
        match self.status {
            TxStatus::Mined {
                block_hash, height, ..
            } => match chain.best_tip_height() {
                Some(tip) if tip >= height && chain.is_in_active_chain(&block_hash) => {
                    (u32::from(tip) - u32::from(height) + 1) as i32
                }
                _ => 0,
            },
            TxStatus::Unconfirmed => 0,
            TxStatus::Conflicted | TxStatus::Abandoned => -1,
        }
    }

    /// Whether the transaction is mined in a block of the active chain.
    pub fn is_in_main_chain<C: ChainOracle>(&self, chain: &C) -> bool {
        self.depth(chain) > 0
    }

    pub fn mined_height(&self) -> Option<BlockHeight> {
        match self.status {
            TxStatus::Mined { height, .. } => Some(height),
            _ => None,
        }
    }

    /// Iterates over the outputs the wallet can decrypt.
    pub fn my_notes(&self) -> impl Iterator<Item = (&OutPoint, &NoteData)> {
        self.sapling_note_data.iter().filter(|(_, nd)| nd.is_mine())
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let tx = Transaction::read(&mut reader)?;
        let status = TxStatus::read(&mut reader)?;
        let time_received = reader.read_i64::<LittleEndian>()?;
        let from_me = reader.read_u8()? != 0;
        let sapling_note_data = Vector::read(&mut reader, |r| {
            let outpoint = OutPoint::read(&mut *r)?;
            let nd = NoteData::read(&mut *r)?;
            Ok((outpoint, nd))
        })?
        .into_iter()
        .collect();

        Ok(WalletTx {
            tx,
            status,
            time_received,
            from_me,
            sapling_note_data,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.tx.write(&mut writer)?;
        self.status.write(&mut writer)?;
        writer.write_i64::<LittleEndian>(self.time_received)?;
        writer.write_u8(u8::from(self.from_me))?;
        let notes: Vec<_> = self.sapling_note_data.iter().collect();
        Vector::write(&mut writer, &notes, |w, (outpoint, nd)| {
            outpoint.write(&mut *w)?;
            nd.write(&mut *w)
        })
    }
}

#[cfg(test)]
mod tests {
    use pivx_primitives::{
        block::BlockHash,
        consensus::BlockHeight,
        memo::MemoBytes,
        merkle_tree::{CommitmentTree, IncrementalWitness},
        sapling::{Node, Nullifier},
        transaction::{components::OutPoint, TransactionData},
        zip32::ExtendedSpendingKey,
    };

    use super::{NoteData, TxStatus, WalletTx};
    use crate::testing::FakeChain;

    fn note_data() -> NoteData {
        let extsk = ExtendedSpendingKey::master(&[1; 32]);
        let (_, addr) = extsk.default_address();
        let ivk = pivx_primitives::zip32::ExtendedFullViewingKey::from(&extsk)
            .fvk
            .vk
            .ivk();

        let mut tree = CommitmentTree::empty();
        tree.append(Node::new([3; 32])).unwrap();
        let mut nd = NoteData::received(ivk, 5000, addr, MemoBytes::from_bytes(b"hi").unwrap());
        nd.witnesses.push_front(IncrementalWitness::from_tree(&tree));
        nd.witness_height = Some(BlockHeight::from_u32(12));
        nd.nullifier = Some(Nullifier([4; 32]));
        nd
    }

    #[test]
    fn empty_memo_is_not_cached() {
        let nd = note_data();
        let sent = NoteData::sent(1, nd.address.unwrap(), MemoBytes::empty());
        assert!(!sent.is_mine());
        assert_eq!(sent.memo, None);
        assert!(nd.memo.is_some());
    }

    #[test]
    fn wallet_tx_encoding() {
        let tx = TransactionData::default().freeze().unwrap();
        let mut wtx = WalletTx::new(
            tx,
            TxStatus::Mined {
                block_hash: BlockHash([8; 32]),
                height: BlockHeight::from_u32(12),
                index: 1,
            },
            1_700_000_000,
        );
        wtx.from_me = true;
        wtx.sapling_note_data
            .insert(OutPoint::new(wtx.txid(), 0), note_data());

        let mut encoded = vec![];
        wtx.write(&mut encoded).unwrap();
        let decoded = WalletTx::read(&encoded[..]).unwrap();
        assert_eq!(decoded.txid(), wtx.txid());
        assert_eq!(decoded.status, wtx.status);
        assert!(decoded.from_me);
        assert_eq!(decoded.sapling_note_data, wtx.sapling_note_data);
    }

    #[test]
    fn depth_follows_status() {
        let mut chain = FakeChain::new();
        let block = chain.mine(vec![]);
        chain.mine(vec![]);

        let tx = TransactionData::default().freeze().unwrap();
        let mut wtx = WalletTx::new(
            tx,
            TxStatus::Mined {
                block_hash: block.hash(),
                height: BlockHeight::from_u32(0),
                index: 0,
            },
            0,
        );
        assert_eq!(wtx.depth(&chain), 2);

        wtx.status = TxStatus::Mined {
            block_hash: BlockHash([1; 32]),
            height: BlockHeight::from_u32(0),
            index: 0,
        };
        assert_eq!(wtx.depth(&chain), 0);

        wtx.status = TxStatus::Unconfirmed;
        assert_eq!(wtx.depth(&chain), 0);
        wtx.status = TxStatus::Abandoned;
        assert_eq!(wtx.depth(&chain), -1);
    }
}
