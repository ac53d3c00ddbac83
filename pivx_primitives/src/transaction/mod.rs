//! Structs and methods for handling PIVX transactions.

pub mod builder;
pub mod components;
pub mod fees;
pub mod sighash;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use sha2::{Digest, Sha256};
use std::fmt;
use memuse::DynamicUsage;
use std::io::{self, Read, Write};
use std::ops::Deref;

use crate::{
    sapling::Nullifier,
    serialize::{Optional, Vector},
};

use self::components::{Amount, OutputDescription, SaplingBundle, SpendDescription, TxIn, TxOut};

/// The identifier of a transaction: the double SHA-256 hash of its serialization.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TxId([u8; 32]);

memuse::impl_no_dynamic_usage!(TxId);

impl fmt::Debug for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The (byte-flipped) hex string is more useful than the raw bytes, because we can
        // look that up in RPC methods and block explorers.
        let txid_str = self.to_string();
        f.debug_tuple("TxId").field(&txid_str).finish()
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut data = self.0;
        data.reverse();
        formatter.write_str(&hex::encode(data))
    }
}

impl AsRef<[u8; 32]> for TxId {
    fn as_ref(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<TxId> for [u8; 32] {
    fn from(value: TxId) -> Self {
        value.0
    }
}

impl TxId {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        TxId(bytes)
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut hash = [0u8; 32];
        reader.read_exact(&mut hash)?;
        Ok(TxId::from_bytes(hash))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.0)?;
        Ok(())
    }
}

/// Transaction format versions.
pub mod version {
    /// Transparent-only transactions.
    pub const LEGACY: u16 = 1;
    /// Transactions that may carry a shielded bundle.
    pub const SAPLING: u16 = 3;
}

/// Transaction types. Anything other than [`NORMAL`] carries an extra payload.
///
/// [`NORMAL`]: tx_type::NORMAL
pub mod tx_type {
    pub const NORMAL: u16 = 0;
    pub const PROREG: u16 = 1;
}

/// A PIVX transaction.
#[derive(Clone, Debug)]
pub struct Transaction {
    txid: TxId,
    data: TransactionData,
}

impl Deref for Transaction {
    type Target = TransactionData;

    fn deref(&self) -> &TransactionData {
        &self.data
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Transaction) -> bool {
        self.txid == other.txid
    }
}

impl Eq for Transaction {}

/// The contents of a transaction, before its id has been computed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransactionData {
    pub version: u16,
    pub tx_type: u16,
    pub vin: Vec<TxIn>,
    pub vout: Vec<TxOut>,
    pub lock_time: u32,
    pub sapling_bundle: Option<SaplingBundle>,
    /// Type-specific payload of special transactions.
    pub extra_payload: Option<Vec<u8>>,
}

impl Default for TransactionData {
    fn default() -> Self {
        TransactionData {
            version: version::SAPLING,
            tx_type: tx_type::NORMAL,
            vin: vec![],
            vout: vec![],
            lock_time: 0,
            sapling_bundle: None,
            extra_payload: None,
        }
    }
}

impl TransactionData {
    pub fn freeze(self) -> io::Result<Transaction> {
        Transaction::from_data(self)
    }

    pub fn is_sapling_version(&self) -> bool {
        self.version >= version::SAPLING
    }

    pub fn is_normal_type(&self) -> bool {
        self.tx_type == tx_type::NORMAL
    }

    /// Returns `true` if this transaction has at least one spend or output description.
    pub fn has_sapling_data(&self) -> bool {
        self.sapling_bundle
            .as_ref()
            .map(|b| b.has_descriptions())
            .unwrap_or(false)
    }

    pub fn shielded_spends(&self) -> &[SpendDescription] {
        self.sapling_bundle
            .as_ref()
            .map(|b| &b.shielded_spends[..])
            .unwrap_or(&[])
    }

    pub fn shielded_outputs(&self) -> &[OutputDescription] {
        self.sapling_bundle
            .as_ref()
            .map(|b| &b.shielded_outputs[..])
            .unwrap_or(&[])
    }

    /// Nullifiers revealed by this transaction's shielded spends.
    pub fn nullifiers(&self) -> impl Iterator<Item = &Nullifier> {
        self.shielded_spends().iter().map(|s| &s.nullifier)
    }

    pub fn value_balance(&self) -> Amount {
        self.sapling_bundle
            .as_ref()
            .map(|b| b.value_balance)
            .unwrap_or_else(Amount::zero)
    }

    pub fn is_coinbase(&self) -> bool {
        self.vin.len() == 1 && self.vin[0].prevout.is_null()
    }

    /// A coinstake spends at least one real input and marks itself with an empty first
    /// output.
    pub fn is_coinstake(&self) -> bool {
        !self.vin.is_empty()
            && !self.vin[0].prevout.is_null()
            && self.vout.len() >= 2
            && self.vout[0].value == Amount::zero()
            && self.vout[0].script_pubkey.0.is_empty()
    }

    /// Sum of the transparent outputs, or `None` on overflow.
    pub fn transparent_value_out(&self) -> Option<Amount> {
        self.vout.iter().map(|o| o.value).sum()
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.write_inner(&mut writer, |w, b| b.write(w))
    }

    pub(crate) fn write_inner<W: Write, F>(&self, mut writer: W, write_bundle: F) -> io::Result<()>
    where
        F: Fn(&mut W, &SaplingBundle) -> io::Result<()>,
    {
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u16::<LittleEndian>(self.tx_type)?;
        Vector::write(&mut writer, &self.vin, |w, e| e.write(w))?;
        Vector::write(&mut writer, &self.vout, |w, e| e.write(w))?;
        writer.write_u32::<LittleEndian>(self.lock_time)?;

        if self.is_sapling_version() {
            Optional::write(&mut writer, self.sapling_bundle.as_ref(), |w, b| {
                write_bundle(w, b)
            })?;
            if !self.is_normal_type() {
                Optional::write(&mut writer, self.extra_payload.as_ref(), |w, p| {
                    Vector::write(w, p, |w, b| w.write_u8(*b))
                })?;
            }
        } else if self.sapling_bundle.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Shielded data requires a Sapling transaction version",
            ));
        }

        Ok(())
    }
}

impl Transaction {
    fn from_data(data: TransactionData) -> io::Result<Self> {
        let mut tx = Transaction {
            txid: TxId([0; 32]),
            data,
        };
        let mut raw = vec![];
        tx.write(&mut raw)?;
        tx.txid.0.copy_from_slice(&Sha256::digest(Sha256::digest(&raw)));
        Ok(tx)
    }

    pub fn txid(&self) -> TxId {
        self.txid
    }

    pub fn into_data(self) -> TransactionData {
        self.data
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let version = reader.read_u16::<LittleEndian>()?;
        let tx_type = reader.read_u16::<LittleEndian>()?;
        let vin = Vector::read(&mut reader, |r| TxIn::read(r))?;
        let vout = Vector::read(&mut reader, |r| TxOut::read(r))?;
        let lock_time = reader.read_u32::<LittleEndian>()?;

        let (sapling_bundle, extra_payload) = if version >= version::SAPLING {
            let bundle = Optional::read(&mut reader, |r| SaplingBundle::read(r))?;
            let payload = if tx_type != tx_type::NORMAL {
                Optional::read(&mut reader, |r| Vector::read(r, |r| r.read_u8()))?
            } else {
                None
            };
            (bundle, payload)
        } else {
            (None, None)
        };

        Transaction::from_data(TransactionData {
            version,
            tx_type,
            vin,
            vout,
            lock_time,
            sapling_bundle,
            extra_payload,
        })
    }

    pub fn write<W: Write>(&self, writer: W) -> io::Result<()> {
        self.data.write(writer)
    }

    /// Length of the serialized transaction, which the fee policy is computed from.
    pub fn serialized_size(&self) -> usize {
        let mut counter = ByteCounter(0);
        // Writing to a counter only fails if the transaction could not have been frozen.
        self.write(&mut counter)
            .expect("frozen transactions are serializable");
        counter.0
    }
}

struct ByteCounter(usize);

impl Write for ByteCounter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::{
        components::transparent::testing::{arb_txin, arb_txout},
        version, Transaction, TransactionData, TxId,
    };

    pub fn arb_txid() -> impl Strategy<Value = TxId> {
        prop::array::uniform32(any::<u8>()).prop_map(TxId::from_bytes)
    }

    prop_compose! {
        pub fn arb_txdata()(
            vin in vec(arb_txin(), 0..5),
            vout in vec(arb_txout(), 0..5),
            lock_time in any::<u32>(),
        ) -> TransactionData {
            TransactionData {
                version: version::SAPLING,
                vin,
                vout,
                lock_time,
                ..Default::default()
            }
        }
    }

    prop_compose! {
        pub fn arb_tx()(tx_data in arb_txdata()) -> Transaction {
            tx_data.freeze().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        components::{Amount, OutPoint, SaplingBundle, TxIn, TxOut},
        testing::arb_tx,
        tx_type, version, Transaction, TransactionData, TxId,
    };
    use crate::legacy::{Script, TransparentAddress};

    proptest! {
        #[test]
        fn tx_serialization_roundtrip(tx in arb_tx()) {
            let mut data = vec![];
            tx.write(&mut data).unwrap();
            prop_assert_eq!(data.len(), tx.serialized_size());

            let tx2 = Transaction::read(&data[..]).unwrap();
            prop_assert_eq!(tx2.txid(), tx.txid());
            prop_assert_eq!(&*tx2, &*tx);
        }
    }

    #[test]
    fn txid_display_is_reversed() {
        let mut bytes = [0u8; 32];
        bytes[31] = 0x01;
        let txid = TxId::from_bytes(bytes);
        assert!(txid.to_string().starts_with("01"));
        assert_eq!(format!("{:?}", txid), format!("TxId(\"{}\")", txid));
    }

    #[test]
    fn empty_bundle_is_still_encoded() {
        let with_bundle = TransactionData {
            sapling_bundle: Some(SaplingBundle {
                value_balance: Amount::zero(),
                shielded_spends: vec![],
                shielded_outputs: vec![],
                binding_sig: None,
            }),
            ..Default::default()
        }
        .freeze()
        .unwrap();
        let without_bundle = TransactionData::default().freeze().unwrap();

        assert_ne!(with_bundle.txid(), without_bundle.txid());
        assert!(!with_bundle.has_sapling_data());
        assert_eq!(with_bundle.serialized_size(), without_bundle.serialized_size() + 10);
    }

    #[test]
    fn legacy_version_rejects_shielded_data() {
        let data = TransactionData {
            version: version::LEGACY,
            sapling_bundle: Some(SaplingBundle {
                value_balance: Amount::zero(),
                shielded_spends: vec![],
                shielded_outputs: vec![],
                binding_sig: None,
            }),
            ..Default::default()
        };
        assert!(data.freeze().is_err());
    }

    #[test]
    fn special_tx_payload() {
        let tx = TransactionData {
            tx_type: tx_type::PROREG,
            extra_payload: Some(vec![1, 2, 3]),
            ..Default::default()
        }
        .freeze()
        .unwrap();
        let mut data = vec![];
        tx.write(&mut data).unwrap();
        let parsed = Transaction::read(&data[..]).unwrap();
        assert_eq!(parsed.extra_payload, Some(vec![1, 2, 3]));
    }

    #[test]
    fn coinbase_and_coinstake() {
        let coinbase = TransactionData {
            vin: vec![TxIn::new(OutPoint::new(TxId::from_bytes([0; 32]), u32::MAX))],
            vout: vec![TxOut {
                value: Amount::from_u64(250_000_000).unwrap(),
                script_pubkey: TransparentAddress::PublicKey([1; 20]).script(),
            }],
            ..Default::default()
        };
        assert!(coinbase.is_coinbase());
        assert!(!coinbase.is_coinstake());

        let coinstake = TransactionData {
            vin: vec![TxIn::new(OutPoint::new(TxId::from_bytes([5; 32]), 0))],
            vout: vec![
                TxOut {
                    value: Amount::zero(),
                    script_pubkey: Script::default(),
                },
                TxOut {
                    value: Amount::from_u64(100).unwrap(),
                    script_pubkey: TransparentAddress::PublicKey([1; 20]).script(),
                },
            ],
            ..Default::default()
        };
        assert!(coinstake.is_coinstake());
        assert!(!coinstake.is_coinbase());
    }
}
