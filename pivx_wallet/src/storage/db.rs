//! Typed wallet records on top of a [`KeyValueStore`].
//!
//! Every record key is the length-prefixed record name followed by an optional
//! identifier, so that no record name is a prefix of another.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

use pivx_primitives::{
    sapling::{keys::OutgoingViewingKey, PaymentAddress, SaplingIvk},
    serialize::Vector,
    transaction::TxId,
    zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
};

use super::{Error, KeyValueStore};
use crate::{
    keys::{
        crypter::MasterKeyRecord,
        hd_chain::{HdChain, KeyMetadata, SeedId},
    },
    wallet::WalletTx,
};

const HD_CHAIN: &str = "hdchain";
const HD_SEED: &str = "hdseed";
const CRYPTED_HD_SEED: &str = "chdseed";
const SAPLING_KEY: &str = "zkey";
const CRYPTED_SAPLING_KEY: &str = "czkey";
const SAPLING_VIEWING_KEY: &str = "zvkey";
const SAPLING_KEY_METADATA: &str = "zkeymeta";
const SAPLING_ADDRESS: &str = "zaddr";
const COMMON_OVK: &str = "commonovk";
const MASTER_KEY: &str = "mkey";
const WALLET_TX: &str = "tx";
const WITNESS_CACHE_SIZE: &str = "witnesscachesize";

fn record_key(name: &str, id: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(1 + name.len() + id.len());
    key.push(name.len() as u8);
    key.extend_from_slice(name.as_bytes());
    key.extend_from_slice(id);
    key
}

fn corrupted(name: &str, e: impl std::fmt::Display) -> Error {
    Error::CorruptedData(format!("{} record: {}", name, e))
}

fn read_ivk(name: &str, id: &[u8]) -> Result<SaplingIvk, Error> {
    id.try_into()
        .ok()
        .and_then(SaplingIvk::from_repr)
        .ok_or_else(|| corrupted(name, "invalid incoming viewing key"))
}

/// A crypted spending key together with its (plaintext) viewing key.
pub struct CryptedSaplingKey {
    pub extfvk: ExtendedFullViewingKey,
    pub crypted: Vec<u8>,
}

impl CryptedSaplingKey {
    fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let extfvk = ExtendedFullViewingKey::read(&mut reader)?;
        let crypted = Vector::read(&mut reader, |r| r.read_u8())?;
        Ok(CryptedSaplingKey { extfvk, crypted })
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        self.extfvk.write(&mut writer)?;
        Vector::write(&mut writer, &self.crypted, |w, b| w.write_u8(*b))
    }
}

/// The wallet's durable state.
pub struct WalletDb<S> {
    store: S,
}

impl<S: KeyValueStore> WalletDb<S> {
    pub fn new(store: S) -> Self {
        WalletDb { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn into_inner(self) -> S {
        self.store
    }

    fn put_record<F>(&mut self, name: &str, id: &[u8], write: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Vec<u8>) -> io::Result<()>,
    {
        let mut value = vec![];
        write(&mut value)?;
        self.store.put(&record_key(name, id), &value)
    }

    fn get_record<T, F>(&self, name: &str, id: &[u8], read: F) -> Result<Option<T>, Error>
    where
        F: FnOnce(&[u8]) -> io::Result<T>,
    {
        self.store
            .get(&record_key(name, id))?
            .map(|value| read(&value[..]).map_err(|e| corrupted(name, e)))
            .transpose()
    }

    fn records<T, F>(&self, name: &str, read: F) -> Result<Vec<(Vec<u8>, T)>, Error>
    where
        F: Fn(&[u8]) -> io::Result<T>,
    {
        let prefix = record_key(name, &[]);
        self.store
            .iterate(&prefix)?
            .into_iter()
            .map(|(key, value)| {
                let record = read(&value[..]).map_err(|e| corrupted(name, e))?;
                Ok((key[prefix.len()..].to_vec(), record))
            })
            .collect()
    }

    //
    // HD chain and seed
    //

    pub fn write_hd_chain(&mut self, chain: &HdChain) -> Result<(), Error> {
        self.put_record(HD_CHAIN, &[], |w| chain.write(w))
    }

    pub fn read_hd_chain(&self) -> Result<Option<HdChain>, Error> {
        self.get_record(HD_CHAIN, &[], |r| HdChain::read(r))
    }

    pub fn write_hd_seed(&mut self, seed_id: &SeedId, seed: &[u8]) -> Result<(), Error> {
        self.put_record(HD_SEED, &seed_id.0, |w| w.write_all(seed))
    }

    pub fn read_hd_seed(&self, seed_id: &SeedId) -> Result<Option<Vec<u8>>, Error> {
        self.get_record(HD_SEED, &seed_id.0, |r| Ok(r.to_vec()))
    }

    pub fn erase_hd_seed(&mut self, seed_id: &SeedId) -> Result<(), Error> {
        self.store.delete(&record_key(HD_SEED, &seed_id.0))
    }

    pub fn write_crypted_hd_seed(&mut self, seed_id: &SeedId, crypted: &[u8]) -> Result<(), Error> {
        self.put_record(CRYPTED_HD_SEED, &seed_id.0, |w| w.write_all(crypted))
    }

    pub fn read_crypted_hd_seed(&self, seed_id: &SeedId) -> Result<Option<Vec<u8>>, Error> {
        self.get_record(CRYPTED_HD_SEED, &seed_id.0, |r| Ok(r.to_vec()))
    }

    //
    // Shielded keys
    //

    pub fn write_sapling_key(
        &mut self,
        ivk: &SaplingIvk,
        extsk: &ExtendedSpendingKey,
        meta: &KeyMetadata,
    ) -> Result<(), Error> {
        self.write_key_metadata(ivk, meta)?;
        self.put_record(SAPLING_KEY, &ivk.to_repr(), |w| extsk.write(w))
    }

    pub fn erase_sapling_key(&mut self, ivk: &SaplingIvk) -> Result<(), Error> {
        self.store.delete(&record_key(SAPLING_KEY, &ivk.to_repr()))
    }

    pub fn load_sapling_keys(&self) -> Result<Vec<(SaplingIvk, ExtendedSpendingKey)>, Error> {
        self.records(SAPLING_KEY, |r| ExtendedSpendingKey::read(r))?
            .into_iter()
            .map(|(id, extsk)| Ok((read_ivk(SAPLING_KEY, &id)?, extsk)))
            .collect()
    }

    pub fn write_crypted_sapling_key(
        &mut self,
        ivk: &SaplingIvk,
        extfvk: &ExtendedFullViewingKey,
        crypted: &[u8],
        meta: &KeyMetadata,
    ) -> Result<(), Error> {
        self.write_key_metadata(ivk, meta)?;
        let record = CryptedSaplingKey {
            extfvk: extfvk.clone(),
            crypted: crypted.to_vec(),
        };
        self.put_record(CRYPTED_SAPLING_KEY, &ivk.to_repr(), |w| record.write(w))
    }

    pub fn load_crypted_sapling_keys(&self) -> Result<Vec<(SaplingIvk, CryptedSaplingKey)>, Error> {
        self.records(CRYPTED_SAPLING_KEY, |r| CryptedSaplingKey::read(r))?
            .into_iter()
            .map(|(id, key)| Ok((read_ivk(CRYPTED_SAPLING_KEY, &id)?, key)))
            .collect()
    }

    pub fn write_sapling_viewing_key(
        &mut self,
        ivk: &SaplingIvk,
        extfvk: &ExtendedFullViewingKey,
    ) -> Result<(), Error> {
        self.put_record(SAPLING_VIEWING_KEY, &ivk.to_repr(), |w| extfvk.write(w))
    }

    pub fn load_sapling_viewing_keys(
        &self,
    ) -> Result<Vec<(SaplingIvk, ExtendedFullViewingKey)>, Error> {
        self.records(SAPLING_VIEWING_KEY, |r| ExtendedFullViewingKey::read(r))?
            .into_iter()
            .map(|(id, extfvk)| Ok((read_ivk(SAPLING_VIEWING_KEY, &id)?, extfvk)))
            .collect()
    }

    pub fn write_key_metadata(&mut self, ivk: &SaplingIvk, meta: &KeyMetadata) -> Result<(), Error> {
        self.put_record(SAPLING_KEY_METADATA, &ivk.to_repr(), |w| meta.write(w))
    }

    pub fn load_key_metadata(&self) -> Result<Vec<(SaplingIvk, KeyMetadata)>, Error> {
        self.records(SAPLING_KEY_METADATA, |r| KeyMetadata::read(r))?
            .into_iter()
            .map(|(id, meta)| Ok((read_ivk(SAPLING_KEY_METADATA, &id)?, meta)))
            .collect()
    }

    pub fn write_sapling_payment_address(
        &mut self,
        addr: &PaymentAddress,
        ivk: &SaplingIvk,
    ) -> Result<(), Error> {
        self.put_record(SAPLING_ADDRESS, &addr.to_bytes(), |w| {
            w.write_all(&ivk.to_repr())
        })
    }

    pub fn load_sapling_payment_addresses(
        &self,
    ) -> Result<Vec<(PaymentAddress, SaplingIvk)>, Error> {
        self.records(SAPLING_ADDRESS, |r| {
            let mut repr = [0u8; 32];
            (&r[..]).read_exact(&mut repr)?;
            Ok(repr)
        })?
        .into_iter()
        .map(|(id, repr)| {
            let addr = <[u8; 43]>::try_from(&id[..])
                .ok()
                .and_then(|bytes| PaymentAddress::from_bytes(&bytes))
                .ok_or_else(|| corrupted(SAPLING_ADDRESS, "invalid payment address"))?;
            Ok((addr, read_ivk(SAPLING_ADDRESS, &repr)?))
        })
        .collect()
    }

    pub fn write_common_ovk(&mut self, ovk: &OutgoingViewingKey) -> Result<(), Error> {
        self.put_record(COMMON_OVK, &[], |w| w.write_all(&ovk.0))
    }

    pub fn read_common_ovk(&self) -> Result<Option<OutgoingViewingKey>, Error> {
        self.get_record(COMMON_OVK, &[], |mut r| {
            let mut ovk = [0u8; 32];
            r.read_exact(&mut ovk)?;
            Ok(OutgoingViewingKey(ovk))
        })
    }

    pub fn write_master_key(&mut self, record: &MasterKeyRecord) -> Result<(), Error> {
        self.put_record(MASTER_KEY, &[], |w| record.write(w))
    }

    pub fn read_master_key(&self) -> Result<Option<MasterKeyRecord>, Error> {
        self.get_record(MASTER_KEY, &[], |r| MasterKeyRecord::read(r))
    }

    //
    // Transactions and witness cache
    //

    pub fn write_tx(&mut self, wtx: &WalletTx) -> Result<(), Error> {
        self.put_record(WALLET_TX, wtx.txid().as_ref(), |w| wtx.write(w))
    }

    pub fn erase_tx(&mut self, txid: &TxId) -> Result<(), Error> {
        self.store.delete(&record_key(WALLET_TX, txid.as_ref()))
    }

    pub fn load_txs(&self) -> Result<Vec<WalletTx>, Error> {
        Ok(self
            .records(WALLET_TX, |r| WalletTx::read(r))?
            .into_iter()
            .map(|(_, wtx)| wtx)
            .collect())
    }

    pub fn write_witness_cache_size(&mut self, size: u32) -> Result<(), Error> {
        self.put_record(WITNESS_CACHE_SIZE, &[], |w| {
            w.write_u32::<LittleEndian>(size)
        })
    }

    pub fn read_witness_cache_size(&self) -> Result<Option<u32>, Error> {
        self.get_record(WITNESS_CACHE_SIZE, &[], |mut r| {
            r.read_u32::<LittleEndian>()
        })
    }
}

#[cfg(test)]
mod tests {
    use pivx_primitives::{
        sapling::keys::OutgoingViewingKey,
        zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use super::{record_key, WalletDb};
    use crate::{
        keys::hd_chain::{ChainType, HdChain, KeyMetadata, SeedId},
        storage::{Error, KeyValueStore, MemoryStore, SqliteStore},
    };

    #[test]
    fn record_names_do_not_collide() {
        // "zkey" is a prefix of "zkeymeta" as a string, but not as a record key.
        assert!(!record_key("zkeymeta", &[]).starts_with(&record_key("zkey", &[])));
    }

    #[test]
    fn keys_roundtrip_through_sqlite() {
        let mut db = WalletDb::new(SqliteStore::open_in_memory().unwrap());

        let extsk = ExtendedSpendingKey::master(&[5; 32]);
        let ivk = ExtendedFullViewingKey::from(&extsk).fvk.vk.ivk();
        let (_, addr) = extsk.default_address();

        db.write_sapling_key(&ivk, &extsk, &KeyMetadata::new(1_600_000_000))
            .unwrap();
        db.write_sapling_payment_address(&addr, &ivk).unwrap();
        db.write_common_ovk(&OutgoingViewingKey([9; 32])).unwrap();

        let chain = HdChain::new(SeedId::from_seed(&[5; 32]), ChainType::Shielded);
        db.write_hd_chain(&chain).unwrap();

        assert_eq!(db.load_sapling_keys().unwrap(), vec![(ivk.clone(), extsk)]);
        assert_eq!(
            db.load_sapling_payment_addresses().unwrap(),
            vec![(addr, ivk.clone())]
        );
        assert_eq!(
            db.load_key_metadata().unwrap(),
            vec![(ivk.clone(), KeyMetadata::new(1_600_000_000))]
        );
        assert_eq!(db.read_hd_chain().unwrap(), Some(chain));
        assert_eq!(
            db.read_common_ovk().unwrap().map(|ovk| ovk.0),
            Some([9; 32])
        );

        db.erase_sapling_key(&ivk).unwrap();
        assert!(db.load_sapling_keys().unwrap().is_empty());
    }

    #[test]
    fn corrupted_record_is_reported() {
        let mut store = MemoryStore::new();
        store.put(&record_key("hdchain", &[]), &[1, 2, 3]).unwrap();
        let db = WalletDb::new(store);
        assert_matches!(db.read_hd_chain(), Err(Error::CorruptedData(_)));
    }
}
