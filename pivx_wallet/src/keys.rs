//! The shielded key store.
//!
//! [`KeyManager`] derives shielded keys from the wallet's HD seed along the fixed path
//! `m/32'/coin_type'/account'`, imports external spending and viewing keys, and keeps
//! spending keys and the seed encrypted at rest once the wallet is encrypted. Viewing
//! keys are never encrypted, so notes can be discovered while the wallet is locked.

use blake2b_simd::Params as Blake2bParams;
use rand_core::{CryptoRng, RngCore};
use secrecy::{ExposeSecret, SecretVec};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use pivx_primitives::{
    consensus::{NetworkUpgrade, Parameters, H0},
    constants::{SAPLING_ACTIVATION_TIME_FLOOR, ZIP32_PURPOSE},
    keys::prf_expand,
    sapling::{keys::OutgoingViewingKey, PaymentAddress, SaplingIvk},
    zip32::{account_path, ExtendedFullViewingKey, ExtendedSpendingKey},
};

use crate::{
    error::Error,
    storage::{KeyValueStore, WalletDb},
};

pub mod crypter;
pub mod hd_chain;

use crypter::{MasterKey, MasterKeyRecord, DEFAULT_KDF_ITERATIONS};
use hd_chain::{ChainType, HdChain, KeyMetadata, SeedId};

const COMMON_OVK_PERSONALIZATION: &[u8; 16] = b"ZcTaddrToSapling";

/// The outcome of adding an externally supplied key to the wallet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyAddResult {
    /// A viewing key was imported for which the spending key is already held.
    SpendingKeyExists,
    KeyAlreadyExists,
    KeyAdded,
    /// The key could not be stored, e.g. because the encrypted wallet is locked.
    KeyNotAdded,
}

/// Derives the wallet-wide outgoing viewing key used for outputs funded by
/// transparent inputs.
pub fn common_ovk_from_seed(seed: &[u8]) -> OutgoingViewingKey {
    let expanded = prf_expand(seed, &[0x7f]);
    let hash = Blake2bParams::new()
        .hash_length(32)
        .personal(COMMON_OVK_PERSONALIZATION)
        .hash(expanded.as_bytes());
    let mut ovk = [0u8; 32];
    ovk.copy_from_slice(hash.as_bytes());
    OutgoingViewingKey(ovk)
}

fn now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

fn ivk_of(extfvk: &ExtendedFullViewingKey) -> SaplingIvk {
    extfvk.fvk.vk.ivk()
}

/// Shielded key material held by the wallet.
#[derive(Default)]
pub struct KeyManager {
    hd_chain: Option<HdChain>,
    seed: Option<SecretVec<u8>>,
    crypted_seed: Option<Vec<u8>>,
    master_key_record: Option<MasterKeyRecord>,
    master_key: Option<MasterKey>,
    spending_keys: BTreeMap<SaplingIvk, ExtendedSpendingKey>,
    crypted_spending_keys: BTreeMap<SaplingIvk, Vec<u8>>,
    full_viewing_keys: BTreeMap<SaplingIvk, ExtendedFullViewingKey>,
    addresses: BTreeMap<PaymentAddress, SaplingIvk>,
    metadata: BTreeMap<SaplingIvk, KeyMetadata>,
    common_ovk: Option<OutgoingViewingKey>,
}

impl KeyManager {
    /// Loads the key store from the database. An encrypted wallet starts out locked.
    pub fn load<S: KeyValueStore>(db: &WalletDb<S>) -> Result<Self, Error> {
        let mut keys = KeyManager {
            hd_chain: db.read_hd_chain()?,
            master_key_record: db.read_master_key()?,
            common_ovk: db.read_common_ovk()?,
            ..Default::default()
        };

        if let Some(chain) = &keys.hd_chain {
            keys.seed = db.read_hd_seed(&chain.seed_id)?.map(SecretVec::new);
            keys.crypted_seed = db.read_crypted_hd_seed(&chain.seed_id)?;
        }

        for (ivk, extsk) in db.load_sapling_keys()? {
            keys.full_viewing_keys
                .insert(ivk.clone(), ExtendedFullViewingKey::from(&extsk));
            keys.spending_keys.insert(ivk, extsk);
        }
        for (ivk, record) in db.load_crypted_sapling_keys()? {
            keys.full_viewing_keys.insert(ivk.clone(), record.extfvk);
            keys.crypted_spending_keys.insert(ivk, record.crypted);
        }
        for (ivk, extfvk) in db.load_sapling_viewing_keys()? {
            keys.full_viewing_keys.entry(ivk).or_insert(extfvk);
        }
        keys.addresses = db.load_sapling_payment_addresses()?.into_iter().collect();
        keys.metadata = db.load_key_metadata()?.into_iter().collect();

        debug!(
            keys = keys.full_viewing_keys.len(),
            addresses = keys.addresses.len(),
            crypted = keys.is_crypted(),
            "Loaded shielded key store"
        );
        Ok(keys)
    }

    //
    // Encryption
    //

    pub fn is_crypted(&self) -> bool {
        self.master_key_record.is_some()
    }

    pub fn is_locked(&self) -> bool {
        self.is_crypted() && self.master_key.is_none()
    }

    /// Encrypts every spending key and the seed under `passphrase`, and locks the wallet.
    pub fn encrypt_keys<S: KeyValueStore, R: RngCore + CryptoRng>(
        &mut self,
        db: &mut WalletDb<S>,
        rng: &mut R,
        passphrase: &[u8],
    ) -> Result<(), Error> {
        if self.is_crypted() {
            return Err(Error::AlreadyEncrypted);
        }

        let (record, master) = MasterKeyRecord::generate(rng, passphrase, DEFAULT_KDF_ITERATIONS);

        // Nothing in memory changes until every record is written, so a store failure
        // leaves the wallet usable unencrypted.
        let crypted_keys: Vec<_> = self
            .spending_keys
            .iter()
            .map(|(ivk, extsk)| {
                let extfvk = ExtendedFullViewingKey::from(extsk);
                let crypted = crypter::encrypt_secret(
                    &master,
                    extfvk.fingerprint().as_bytes(),
                    &extsk.to_bytes(),
                );
                let meta = self
                    .metadata
                    .get(ivk)
                    .cloned()
                    .unwrap_or_else(|| KeyMetadata::new(now()));
                (ivk.clone(), extfvk, crypted, meta)
            })
            .collect();
        let crypted_seed = match (&self.hd_chain, &self.seed) {
            (Some(chain), Some(seed)) => Some((
                chain.seed_id,
                crypter::encrypt_secret(&master, &chain.seed_id.0, seed.expose_secret()),
            )),
            _ => None,
        };

        for (ivk, extfvk, crypted, meta) in &crypted_keys {
            db.write_crypted_sapling_key(ivk, extfvk, crypted, meta)?;
        }
        if let Some((seed_id, crypted)) = &crypted_seed {
            db.write_crypted_hd_seed(seed_id, crypted)?;
        }
        db.write_master_key(&record)?;
        for (ivk, ..) in &crypted_keys {
            db.erase_sapling_key(ivk)?;
        }
        if let Some((seed_id, _)) = &crypted_seed {
            db.erase_hd_seed(seed_id)?;
        }

        self.spending_keys.clear();
        self.crypted_spending_keys.extend(
            crypted_keys
                .into_iter()
                .map(|(ivk, _, crypted, _)| (ivk, crypted)),
        );
        if let Some((_, crypted)) = crypted_seed {
            self.seed = None;
            self.crypted_seed = Some(crypted);
        }

        self.master_key_record = Some(record);
        self.master_key = None;
        info!(
            keys = self.crypted_spending_keys.len(),
            "Encrypted wallet keys"
        );
        Ok(())
    }

    /// Forgets the master key. Spending keys and the seed become unavailable.
    pub fn lock(&mut self) {
        self.master_key = None;
    }

    /// Recovers the master key from `passphrase`.
    pub fn unlock(&mut self, passphrase: &[u8]) -> Result<(), Error> {
        let record = match &self.master_key_record {
            Some(record) => record,
            None => return Ok(()),
        };

        let master = record
            .unlock(passphrase)
            .ok_or(Error::IncorrectPassphrase)?;

        // The check value matched; every crypted key must open under this master key.
        for (ivk, crypted) in &self.crypted_spending_keys {
            let iv = self
                .full_viewing_keys
                .get(ivk)
                .map(|extfvk| *extfvk.fingerprint().as_bytes())
                .unwrap_or_default();
            if crypter::decrypt_secret(&master, &iv, crypted).is_none() {
                warn!("Wallet is corrupted: crypted spending key does not decrypt");
                return Err(Error::IncorrectPassphrase);
            }
        }

        self.master_key = Some(master);
        Ok(())
    }

    fn master_key(&self) -> Result<Option<&MasterKey>, Error> {
        match (&self.master_key_record, &self.master_key) {
            (None, _) => Ok(None),
            (Some(_), None) => Err(Error::WalletLocked),
            (Some(_), Some(master)) => Ok(Some(master)),
        }
    }

    //
    // HD seed
    //

    pub fn hd_chain(&self) -> Option<&HdChain> {
        self.hd_chain.as_ref()
    }

    /// Returns the HD seed.
    pub fn seed(&self) -> Result<SecretVec<u8>, Error> {
        let chain = self.hd_chain.as_ref().ok_or(Error::SeedNotFound)?;
        match self.master_key()? {
            None => self
                .seed
                .as_ref()
                .map(|seed| SecretVec::new(seed.expose_secret().clone()))
                .ok_or(Error::SeedNotFound),
            Some(master) => {
                let crypted = self.crypted_seed.as_ref().ok_or(Error::SeedNotFound)?;
                crypter::decrypt_secret(master, &chain.seed_id.0, crypted)
                    .map(SecretVec::new)
                    .ok_or(Error::SeedNotFound)
            }
        }
    }

    /// Installs `seed` as the wallet's HD seed, with fresh derivation counters.
    ///
    /// Fails if a seed is already installed, unless `force` is set.
    pub fn set_hd_seed<S: KeyValueStore>(
        &mut self,
        db: &mut WalletDb<S>,
        seed: SecretVec<u8>,
        force: bool,
    ) -> Result<SeedId, Error> {
        if self.hd_chain.is_some() && !force {
            return Err(Error::HdChainExists);
        }

        let seed_id = SeedId::from_seed(seed.expose_secret());
        match self.master_key()? {
            None => {
                db.write_hd_seed(&seed_id, seed.expose_secret())?;
                self.seed = Some(seed);
                self.crypted_seed = None;
            }
            Some(master) => {
                let crypted = crypter::encrypt_secret(master, &seed_id.0, seed.expose_secret());
                db.write_crypted_hd_seed(&seed_id, &crypted)?;
                self.crypted_seed = Some(crypted);
                self.seed = None;
            }
        }

        let chain = HdChain::new(seed_id, ChainType::Shielded);
        db.write_hd_chain(&chain)?;
        self.hd_chain = Some(chain);

        self.common_ovk = None;
        self.common_ovk(db)?;

        info!(%seed_id, "Installed new HD seed");
        Ok(seed_id)
    }

    /// Generates a random 32-byte seed and installs it.
    pub fn generate_hd_seed<S: KeyValueStore, R: RngCore + CryptoRng>(
        &mut self,
        db: &mut WalletDb<S>,
        rng: &mut R,
    ) -> Result<SeedId, Error> {
        let mut seed = vec![0u8; 32];
        rng.fill_bytes(&mut seed);
        self.set_hd_seed(db, SecretVec::new(seed), false)
    }

    /// Returns the wallet-wide outgoing viewing key, deriving and persisting it from
    /// the seed on first use.
    pub fn common_ovk<S: KeyValueStore>(
        &mut self,
        db: &mut WalletDb<S>,
    ) -> Result<OutgoingViewingKey, Error> {
        if let Some(ovk) = self.common_ovk {
            return Ok(ovk);
        }
        if let Some(ovk) = db.read_common_ovk()? {
            self.common_ovk = Some(ovk);
            return Ok(ovk);
        }

        let seed = self.seed()?;
        let ovk = common_ovk_from_seed(seed.expose_secret());
        db.write_common_ovk(&ovk)?;
        self.common_ovk = Some(ovk);
        Ok(ovk)
    }

    /// Returns the cached wallet-wide outgoing viewing key without touching the seed.
    pub fn cached_common_ovk(&self) -> Option<OutgoingViewingKey> {
        self.common_ovk
    }

    /// Derives the next unused shielded account key from the seed and returns its
    /// default address.
    ///
    /// The advanced derivation counter is persisted before the key is stored.
    pub fn generate_address<P: Parameters, S: KeyValueStore>(
        &mut self,
        params: &P,
        db: &mut WalletDb<S>,
    ) -> Result<PaymentAddress, Error> {
        // A locked seed is as unusable as a missing one.
        let seed = self.seed().map_err(|e| match e {
            Error::WalletLocked => Error::SeedNotFound,
            e => e,
        })?;
        let mut chain = self.hd_chain.clone().ok_or(Error::SeedNotFound)?;
        let master = ExtendedSpendingKey::master(seed.expose_secret());
        let coin_type = params.coin_type();

        let (account, extsk) = loop {
            let account = chain.external_counter;
            let extsk = ExtendedSpendingKey::from_path(&master, &account_path(coin_type, account));
            chain.external_counter += 1;
            if !self.have_spending_key(&ivk_of(&ExtendedFullViewingKey::from(&extsk))) {
                break (account, extsk);
            }
        };

        db.write_hd_chain(&chain)?;
        self.hd_chain = Some(chain.clone());

        let meta = KeyMetadata {
            create_time: now(),
            hd_keypath: Some(format!("m/{}'/{}'/{}'", ZIP32_PURPOSE, coin_type, account)),
            seed_id: Some(chain.seed_id),
        };
        let (_, addr) = extsk.default_address();
        self.add_spending_key(db, extsk, meta)?;

        info!(account, "Generated new shielded key");
        Ok(addr)
    }

    fn add_spending_key<S: KeyValueStore>(
        &mut self,
        db: &mut WalletDb<S>,
        extsk: ExtendedSpendingKey,
        meta: KeyMetadata,
    ) -> Result<(), Error> {
        let extfvk = ExtendedFullViewingKey::from(&extsk);
        let ivk = ivk_of(&extfvk);
        let (_, addr) = extfvk.default_address();

        match self.master_key()? {
            None => {
                db.write_sapling_key(&ivk, &extsk, &meta)?;
                self.spending_keys.insert(ivk.clone(), extsk);
            }
            Some(master) => {
                let crypted = crypter::encrypt_secret(
                    master,
                    extfvk.fingerprint().as_bytes(),
                    &extsk.to_bytes(),
                );
                db.write_crypted_sapling_key(&ivk, &extfvk, &crypted, &meta)?;
                self.crypted_spending_keys.insert(ivk.clone(), crypted);
            }
        }
        db.write_sapling_payment_address(&addr, &ivk)?;

        self.full_viewing_keys.insert(ivk.clone(), extfvk);
        self.addresses.insert(addr, ivk.clone());
        self.metadata.insert(ivk, meta);
        Ok(())
    }

    /// Imports an externally supplied spending key.
    ///
    /// The recorded creation time is never earlier than the shielded pool's activation.
    pub fn import_spending_key<P: Parameters, S: KeyValueStore>(
        &mut self,
        params: &P,
        db: &mut WalletDb<S>,
        extsk: ExtendedSpendingKey,
        creation_time: i64,
    ) -> Result<KeyAddResult, Error> {
        let ivk = ivk_of(&ExtendedFullViewingKey::from(&extsk));
        if self.have_spending_key(&ivk) {
            return Ok(KeyAddResult::KeyAlreadyExists);
        }
        if self.is_locked() {
            warn!("Cannot import a spending key while the wallet is locked");
            return Ok(KeyAddResult::KeyNotAdded);
        }

        let create_time = if params.activation_height(NetworkUpgrade::V5_0) == Some(H0) {
            creation_time
        } else {
            creation_time.max(SAPLING_ACTIVATION_TIME_FLOOR)
        };

        self.add_spending_key(db, extsk, KeyMetadata::new(create_time))?;
        info!(create_time, "Imported shielded spending key");
        Ok(KeyAddResult::KeyAdded)
    }

    /// Imports a watch-only viewing key.
    pub fn import_viewing_key<S: KeyValueStore>(
        &mut self,
        db: &mut WalletDb<S>,
        extfvk: ExtendedFullViewingKey,
    ) -> Result<KeyAddResult, Error> {
        let ivk = ivk_of(&extfvk);
        if self.have_spending_key(&ivk) {
            return Ok(KeyAddResult::SpendingKeyExists);
        }
        if self.full_viewing_keys.contains_key(&ivk) {
            return Ok(KeyAddResult::KeyAlreadyExists);
        }

        let (_, addr) = extfvk.default_address();
        db.write_sapling_viewing_key(&ivk, &extfvk)?;
        db.write_sapling_payment_address(&addr, &ivk)?;
        self.full_viewing_keys.insert(ivk.clone(), extfvk);
        self.addresses.insert(addr, ivk);

        info!("Imported shielded viewing key");
        Ok(KeyAddResult::KeyAdded)
    }

    /// Records a diversified address discovered for a key the wallet already holds.
    pub fn add_address<S: KeyValueStore>(
        &mut self,
        db: &mut WalletDb<S>,
        addr: PaymentAddress,
        ivk: SaplingIvk,
    ) -> Result<(), Error> {
        if self.addresses.contains_key(&addr) {
            return Ok(());
        }
        db.write_sapling_payment_address(&addr, &ivk)?;
        self.addresses.insert(addr, ivk);
        Ok(())
    }

    //
    // Lookups
    //

    /// Iterates over the incoming viewing keys of every held key, in a fixed order.
    pub fn ivks(&self) -> impl Iterator<Item = &SaplingIvk> {
        self.full_viewing_keys.keys()
    }

    pub fn ivk_for_address(&self, addr: &PaymentAddress) -> Option<&SaplingIvk> {
        self.addresses.get(addr)
    }

    pub fn full_viewing_key(&self, ivk: &SaplingIvk) -> Option<&ExtendedFullViewingKey> {
        self.full_viewing_keys.get(ivk)
    }

    pub fn viewing_key_for(&self, addr: &PaymentAddress) -> Option<&ExtendedFullViewingKey> {
        self.ivk_for_address(addr)
            .and_then(|ivk| self.full_viewing_key(ivk))
    }

    pub fn have_spending_key(&self, ivk: &SaplingIvk) -> bool {
        self.spending_keys.contains_key(ivk) || self.crypted_spending_keys.contains_key(ivk)
    }

    pub fn has_spending_key(&self, addr: &PaymentAddress) -> bool {
        self.ivk_for_address(addr)
            .map_or(false, |ivk| self.have_spending_key(ivk))
    }

    /// Returns the spending key for `ivk`, or `None` if only the viewing key is held.
    pub fn spending_key(&self, ivk: &SaplingIvk) -> Result<Option<ExtendedSpendingKey>, Error> {
        match self.master_key()? {
            None => Ok(self.spending_keys.get(ivk).cloned()),
            Some(master) => {
                let (crypted, extfvk) = match (
                    self.crypted_spending_keys.get(ivk),
                    self.full_viewing_keys.get(ivk),
                ) {
                    (Some(crypted), Some(extfvk)) => (crypted, extfvk),
                    _ => return Ok(None),
                };
                crypter::decrypt_secret(master, extfvk.fingerprint().as_bytes(), crypted)
                    .and_then(|bytes| ExtendedSpendingKey::read(&bytes[..]).ok())
                    .map(Some)
                    .ok_or(Error::InvalidSpendingKey)
            }
        }
    }

    pub fn spending_key_for(
        &self,
        addr: &PaymentAddress,
    ) -> Result<Option<ExtendedSpendingKey>, Error> {
        match self.ivk_for_address(addr) {
            Some(ivk) => self.spending_key(ivk),
            None => Ok(None),
        }
    }

    /// Returns every known address derived from `ivk`.
    pub fn addresses_for_ivk<'a>(
        &'a self,
        ivk: &'a SaplingIvk,
    ) -> impl Iterator<Item = &'a PaymentAddress> + 'a {
        self.addresses
            .iter()
            .filter(move |(_, a_ivk)| *a_ivk == ivk)
            .map(|(addr, _)| addr)
    }

    pub fn addresses(&self) -> impl Iterator<Item = (&PaymentAddress, &SaplingIvk)> {
        self.addresses.iter()
    }

    pub fn metadata(&self, ivk: &SaplingIvk) -> Option<&KeyMetadata> {
        self.metadata.get(ivk)
    }
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaChaRng;
    use rand_core::SeedableRng;
    use secrecy::{ExposeSecret, SecretVec};

    use pivx_primitives::{
        consensus::{BlockHeight, LocalNetwork, Parameters},
        constants::SAPLING_ACTIVATION_TIME_FLOOR,
        zip32::{account_path, ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use std::cell::Cell;
    use std::io;
    use std::rc::Rc;

    use super::{common_ovk_from_seed, KeyAddResult, KeyManager};
    use crate::{
        error::Error,
        storage::{self, KeyValueStore, MemoryStore, WalletDb},
    };

    /// A store that fails every write once its budget is spent.
    struct FlakyStore {
        inner: MemoryStore,
        writes_left: Rc<Cell<usize>>,
    }

    impl KeyValueStore for FlakyStore {
        fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), storage::Error> {
            match self.writes_left.get() {
                0 => Err(storage::Error::Io(io::Error::new(
                    io::ErrorKind::Other,
                    "disk full",
                ))),
                n => {
                    self.writes_left.set(n - 1);
                    self.inner.put(key, value)
                }
            }
        }

        fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, storage::Error> {
            self.inner.get(key)
        }

        fn delete(&mut self, key: &[u8]) -> Result<(), storage::Error> {
            self.inner.delete(key)
        }

        fn iterate(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>, storage::Error> {
            self.inner.iterate(prefix)
        }
    }

    fn params() -> LocalNetwork {
        LocalNetwork::all_active_from(BlockHeight::from_u32(100))
    }

    fn seeded() -> (KeyManager, WalletDb<MemoryStore>) {
        let mut db = WalletDb::new(MemoryStore::new());
        let mut keys = KeyManager::default();
        keys.set_hd_seed(&mut db, SecretVec::new(vec![7; 32]), false)
            .unwrap();
        (keys, db)
    }

    #[test]
    fn generate_requires_seed() {
        let mut db = WalletDb::new(MemoryStore::new());
        let mut keys = KeyManager::default();
        assert_matches!(
            keys.generate_address(&params(), &mut db),
            Err(Error::SeedNotFound)
        );
    }

    #[test]
    fn generate_follows_account_path() {
        let params = params();
        let (mut keys, mut db) = seeded();

        let addr0 = keys.generate_address(&params, &mut db).unwrap();
        let addr1 = keys.generate_address(&params, &mut db).unwrap();
        assert_ne!(addr0, addr1);

        let master = ExtendedSpendingKey::master(&[7; 32]);
        let expected =
            ExtendedSpendingKey::from_path(&master, &account_path(params.coin_type(), 1));
        assert_eq!(expected.default_address().1, addr1);

        assert!(keys.has_spending_key(&addr0));
        assert_eq!(keys.hd_chain().unwrap().external_counter, 2);
        assert_eq!(db.read_hd_chain().unwrap().unwrap().external_counter, 2);

        let ivk = keys.ivk_for_address(&addr1).unwrap();
        assert_eq!(
            keys.metadata(ivk).unwrap().hd_keypath.as_deref(),
            Some("m/32'/119'/1'")
        );
    }

    #[test]
    fn generate_skips_imported_accounts() {
        let params = params();
        let (mut keys, mut db) = seeded();

        let master = ExtendedSpendingKey::master(&[7; 32]);
        let account0 =
            ExtendedSpendingKey::from_path(&master, &account_path(params.coin_type(), 0));
        assert_eq!(
            keys.import_spending_key(&params, &mut db, account0.clone(), 0)
                .unwrap(),
            KeyAddResult::KeyAdded
        );

        let addr = keys.generate_address(&params, &mut db).unwrap();
        assert_ne!(addr, account0.default_address().1);
        assert_eq!(keys.hd_chain().unwrap().external_counter, 2);
    }

    #[test]
    fn import_outcomes() {
        let params = params();
        let (mut keys, mut db) = seeded();
        let extsk = ExtendedSpendingKey::master(&[9; 32]);
        let extfvk = ExtendedFullViewingKey::from(&extsk);

        assert_eq!(
            keys.import_viewing_key(&mut db, extfvk.clone()).unwrap(),
            KeyAddResult::KeyAdded
        );
        assert_eq!(
            keys.import_viewing_key(&mut db, extfvk.clone()).unwrap(),
            KeyAddResult::KeyAlreadyExists
        );
        let (_, addr) = extfvk.default_address();
        assert!(keys.viewing_key_for(&addr).is_some());
        assert!(!keys.has_spending_key(&addr));
        assert_eq!(keys.spending_key_for(&addr).unwrap(), None);

        assert_eq!(
            keys.import_spending_key(&params, &mut db, extsk.clone(), 0)
                .unwrap(),
            KeyAddResult::KeyAdded
        );
        assert_eq!(
            keys.import_spending_key(&params, &mut db, extsk.clone(), 0)
                .unwrap(),
            KeyAddResult::KeyAlreadyExists
        );
        assert_eq!(
            keys.import_viewing_key(&mut db, extfvk).unwrap(),
            KeyAddResult::SpendingKeyExists
        );
        assert_eq!(keys.spending_key_for(&addr).unwrap(), Some(extsk));

        let ivk = keys.ivk_for_address(&addr).unwrap();
        assert_eq!(
            keys.metadata(ivk).unwrap().create_time,
            SAPLING_ACTIVATION_TIME_FLOOR
        );
    }

    #[test]
    fn seed_cannot_be_replaced_without_force() {
        let (mut keys, mut db) = seeded();
        assert_matches!(
            keys.set_hd_seed(&mut db, SecretVec::new(vec![8; 32]), false),
            Err(Error::HdChainExists)
        );

        let before = keys.cached_common_ovk().unwrap();
        assert_eq!(before, common_ovk_from_seed(&[7; 32]));
        keys.set_hd_seed(&mut db, SecretVec::new(vec![8; 32]), true)
            .unwrap();
        assert_ne!(keys.cached_common_ovk().unwrap(), before);
        assert_eq!(db.read_common_ovk().unwrap(), keys.cached_common_ovk());
    }

    #[test]
    fn encrypted_keys_need_unlock() {
        let params = params();
        let (mut keys, mut db) = seeded();
        let addr = keys.generate_address(&params, &mut db).unwrap();
        let extsk = keys.spending_key_for(&addr).unwrap().unwrap();

        let mut rng = ChaChaRng::seed_from_u64(0);
        keys.encrypt_keys(&mut db, &mut rng, b"passphrase").unwrap();
        assert!(keys.is_locked());
        assert_matches!(
            keys.encrypt_keys(&mut db, &mut rng, b"again"),
            Err(Error::AlreadyEncrypted)
        );

        // Viewing keys remain available while locked.
        assert!(keys.has_spending_key(&addr));
        assert!(keys.viewing_key_for(&addr).is_some());
        assert_matches!(keys.spending_key_for(&addr), Err(Error::WalletLocked));
        assert!(matches!(keys.seed(), Err(Error::WalletLocked)));
        assert_matches!(
            keys.generate_address(&params, &mut db),
            Err(Error::SeedNotFound)
        );
        assert!(db.load_sapling_keys().unwrap().is_empty());

        assert_matches!(keys.unlock(b"wrong"), Err(Error::IncorrectPassphrase));
        keys.unlock(b"passphrase").unwrap();
        assert_eq!(keys.spending_key_for(&addr).unwrap(), Some(extsk));
        assert_eq!(keys.seed().unwrap().expose_secret(), &vec![7; 32]);

        // Keys generated while unlocked are stored encrypted.
        let addr2 = keys.generate_address(&params, &mut db).unwrap();
        keys.lock();
        assert!(keys.has_spending_key(&addr2));

        let mut reloaded = KeyManager::load(&db).unwrap();
        assert!(reloaded.is_locked());
        reloaded.unlock(b"passphrase").unwrap();
        assert!(reloaded.spending_key_for(&addr2).unwrap().is_some());
    }

    #[test]
    fn failed_encryption_keeps_keys_usable() {
        let params = params();
        let writes_left = Rc::new(Cell::new(usize::MAX));
        let mut db = WalletDb::new(FlakyStore {
            inner: MemoryStore::new(),
            writes_left: writes_left.clone(),
        });
        let mut keys = KeyManager::default();
        keys.set_hd_seed(&mut db, SecretVec::new(vec![7; 32]), false)
            .unwrap();
        let addr1 = keys.generate_address(&params, &mut db).unwrap();
        let addr2 = keys.generate_address(&params, &mut db).unwrap();

        // Enough for the first key's records but not the second's.
        writes_left.set(3);
        let mut rng = ChaChaRng::seed_from_u64(0);
        assert_matches!(
            keys.encrypt_keys(&mut db, &mut rng, b"passphrase"),
            Err(Error::Storage(_))
        );
        assert!(!keys.is_crypted());
        assert!(db.read_master_key().unwrap().is_none());
        assert!(keys.spending_key_for(&addr1).unwrap().is_some());
        assert!(keys.spending_key_for(&addr2).unwrap().is_some());
        assert_eq!(keys.seed().unwrap().expose_secret(), &vec![7; 32]);

        writes_left.set(usize::MAX);
        keys.encrypt_keys(&mut db, &mut rng, b"passphrase").unwrap();
        assert!(keys.is_locked());
        assert!(db.load_sapling_keys().unwrap().is_empty());
        keys.unlock(b"passphrase").unwrap();
        assert!(keys.spending_key_for(&addr1).unwrap().is_some());
        assert!(keys.spending_key_for(&addr2).unwrap().is_some());
    }
}
