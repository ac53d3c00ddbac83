//! Structs representing the transparent components within PIVX transactions.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use crate::{legacy::Script, transaction::TxId};

use super::amount::Amount;

/// Serialized size of a signed pay-to-pubkey-hash input.
pub const P2PKH_TXIN_SIZE: usize = 148;
/// Serialized size of a pay-to-pubkey-hash output.
pub const P2PKH_TXOUT_SIZE: usize = 34;

/// A reference to an output of a previous transaction.
///
/// The same shape also keys shielded outputs, where `n` is the index of the output
/// description within the transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutPoint {
    hash: TxId,
    n: u32,
}

impl OutPoint {
    pub fn new(hash: TxId, n: u32) -> Self {
        OutPoint { hash, n }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let hash = TxId::read(&mut reader)?;
        let n = reader.read_u32::<LittleEndian>()?;
        Ok(OutPoint { hash, n })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.hash.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.n)
    }

    pub fn n(&self) -> u32 {
        self.n
    }

    pub fn hash(&self) -> &TxId {
        &self.hash
    }

    /// Returns `true` if this is the null outpoint used by coinbase inputs.
    pub fn is_null(&self) -> bool {
        self.hash.as_ref() == &[0u8; 32] && self.n == u32::MAX
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxIn {
    pub prevout: OutPoint,
    pub script_sig: Script,
    pub sequence: u32,
}

impl TxIn {
    /// Creates an unsigned input spending `prevout`.
    pub fn new(prevout: OutPoint) -> Self {
        TxIn {
            prevout,
            script_sig: Script::default(),
            sequence: u32::MAX,
        }
    }

    pub fn read<R: Read>(mut reader: &mut R) -> io::Result<Self> {
        let prevout = OutPoint::read(&mut reader)?;
        let script_sig = Script::read(&mut reader)?;
        let sequence = reader.read_u32::<LittleEndian>()?;

        Ok(TxIn {
            prevout,
            script_sig,
            sequence,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.prevout.write(&mut writer)?;
        self.script_sig.write(&mut writer)?;
        writer.write_u32::<LittleEndian>(self.sequence)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: Amount,
    pub script_pubkey: Script,
}

impl TxOut {
    pub fn read<R: Read>(mut reader: &mut R) -> io::Result<Self> {
        let value = {
            let mut tmp = [0u8; 8];
            reader.read_exact(&mut tmp)?;
            Amount::from_nonnegative_i64_le_bytes(tmp)
        }
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "value out of range"))?;
        let script_pubkey = Script::read(&mut reader)?;

        Ok(TxOut {
            value,
            script_pubkey,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.value.to_i64_le_bytes())?;
        self.script_pubkey.write(&mut writer)
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::{OutPoint, TxIn, TxOut};
    use crate::{
        legacy::{testing::arb_transparent_addr, Script},
        transaction::{components::amount::testing::arb_nonnegative_amount, TxId},
    };

    prop_compose! {
        pub fn arb_outpoint()(hash in prop::array::uniform32(any::<u8>()), n in 0u32..100) -> OutPoint {
            OutPoint::new(TxId::from_bytes(hash), n)
        }
    }

    prop_compose! {
        pub fn arb_txin()(
            prevout in arb_outpoint(),
            script_sig in vec(any::<u8>(), 0..100).prop_map(Script),
            sequence in any::<u32>(),
        ) -> TxIn {
            TxIn { prevout, script_sig, sequence }
        }
    }

    prop_compose! {
        pub fn arb_txout()(value in arb_nonnegative_amount(), addr in arb_transparent_addr()) -> TxOut {
            TxOut { value, script_pubkey: addr.script() }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TxOut, P2PKH_TXOUT_SIZE};
    use crate::{legacy::TransparentAddress, transaction::components::Amount};

    #[test]
    fn p2pkh_output_size() {
        let out = TxOut {
            value: Amount::from_u64(1).unwrap(),
            script_pubkey: TransparentAddress::PublicKey([7; 20]).script(),
        };
        let mut buf = vec![];
        out.write(&mut buf).unwrap();
        assert_eq!(buf.len(), P2PKH_TXOUT_SIZE);
        assert_eq!(TxOut::read(&mut &buf[..]).unwrap(), out);
    }
}
