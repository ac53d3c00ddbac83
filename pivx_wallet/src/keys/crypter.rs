//! Encryption of wallet secrets at rest.
//!
//! A random 32-byte master key seals every secret with ChaCha20-Poly1305. The master
//! key itself is sealed under a key stretched from the wallet passphrase.

use blake2b_simd::Params as Blake2bParams;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Key, Nonce,
};
use rand_core::{CryptoRng, RngCore};
use secrecy::{ExposeSecret, Secret};
use std::io::{self, Read, Write};
use subtle::ConstantTimeEq;

use pivx_primitives::serialize::Vector;

const KDF_PERSONALIZATION: &[u8; 16] = b"PIVX_WalletKDF__";
const CHECK_PERSONALIZATION: &[u8; 16] = b"PIVX_WalletCheck";

pub const MASTER_KEY_SIZE: usize = 32;
pub const SALT_SIZE: usize = 16;

/// Number of KDF rounds used for newly encrypted wallets.
pub const DEFAULT_KDF_ITERATIONS: u32 = 25_000;

pub type MasterKey = Secret<[u8; MASTER_KEY_SIZE]>;

/// The persisted form of the wallet master key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MasterKeyRecord {
    pub salt: [u8; SALT_SIZE],
    pub iterations: u32,
    /// The master key sealed under the passphrase-derived key.
    pub crypted_key: Vec<u8>,
    /// A hash of the master key, compared on unlock.
    pub check: [u8; 32],
}

impl MasterKeyRecord {
    /// Generates a fresh master key and seals it under `passphrase`.
    pub fn generate<R: RngCore + CryptoRng>(
        rng: &mut R,
        passphrase: &[u8],
        iterations: u32,
    ) -> (Self, MasterKey) {
        let mut master = [0u8; MASTER_KEY_SIZE];
        rng.fill_bytes(&mut master);
        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);

        let derived = derive_key(passphrase, &salt, iterations);
        let crypted_key = seal(derived.expose_secret(), &[0; 12], &master)
            .expect("sealing a 32-byte key cannot fail");
        let check = check_value(&master);

        (
            MasterKeyRecord {
                salt,
                iterations,
                crypted_key,
                check,
            },
            Secret::new(master),
        )
    }

    /// Recovers the master key, or `None` if `passphrase` is wrong.
    pub fn unlock(&self, passphrase: &[u8]) -> Option<MasterKey> {
        let derived = derive_key(passphrase, &self.salt, self.iterations);
        let plaintext = open(derived.expose_secret(), &[0; 12], &self.crypted_key)?;
        let master: [u8; MASTER_KEY_SIZE] = plaintext.try_into().ok()?;

        if bool::from(check_value(&master).ct_eq(&self.check)) {
            Some(Secret::new(master))
        } else {
            None
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut salt = [0u8; SALT_SIZE];
        reader.read_exact(&mut salt)?;
        let iterations = reader.read_u32::<LittleEndian>()?;
        let crypted_key = Vector::read(&mut reader, |r| r.read_u8())?;
        let mut check = [0u8; 32];
        reader.read_exact(&mut check)?;
        Ok(MasterKeyRecord {
            salt,
            iterations,
            crypted_key,
            check,
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.salt)?;
        writer.write_u32::<LittleEndian>(self.iterations)?;
        Vector::write(&mut writer, &self.crypted_key, |w, b| w.write_u8(*b))?;
        writer.write_all(&self.check)
    }
}

/// Stretches `passphrase` into a 32-byte key with iterated BLAKE2b.
fn derive_key(passphrase: &[u8], salt: &[u8; SALT_SIZE], iterations: u32) -> MasterKey {
    let params = {
        let mut params = Blake2bParams::new();
        params.hash_length(32).personal(KDF_PERSONALIZATION);
        params
    };

    let mut state = params.to_state();
    state.update(passphrase);
    state.update(salt);
    let mut key = [0u8; 32];
    key.copy_from_slice(state.finalize().as_bytes());

    for _ in 1..iterations.max(1) {
        let mut state = params.to_state();
        state.update(&key);
        state.update(salt);
        key.copy_from_slice(state.finalize().as_bytes());
    }

    Secret::new(key)
}

fn check_value(master: &[u8; MASTER_KEY_SIZE]) -> [u8; 32] {
    let mut check = [0u8; 32];
    check.copy_from_slice(
        Blake2bParams::new()
            .hash_length(32)
            .personal(CHECK_PERSONALIZATION)
            .hash(master)
            .as_bytes(),
    );
    check
}

fn seal(key: &[u8; 32], nonce: &[u8; 12], plaintext: &[u8]) -> Option<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .ok()
}

fn open(key: &[u8; 32], nonce: &[u8; 12], ciphertext: &[u8]) -> Option<Vec<u8>> {
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .ok()
}

fn nonce_from(iv: &[u8]) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    let len = iv.len().min(12);
    nonce[..len].copy_from_slice(&iv[..len]);
    nonce
}

/// Seals `secret` under the master key. `iv` identifies the secret (a key fingerprint
/// or seed id) and determines the nonce.
pub fn encrypt_secret(master: &MasterKey, iv: &[u8], secret: &[u8]) -> Vec<u8> {
    seal(master.expose_secret(), &nonce_from(iv), secret)
        .expect("ChaCha20-Poly1305 accepts plaintexts of any wallet secret size")
}

/// Opens a secret sealed by [`encrypt_secret`] with the same `iv`.
pub fn decrypt_secret(master: &MasterKey, iv: &[u8], crypted: &[u8]) -> Option<Vec<u8>> {
    open(master.expose_secret(), &nonce_from(iv), crypted)
}

#[cfg(test)]
mod tests {
    use rand_chacha::ChaChaRng;
    use rand_core::SeedableRng;
    use secrecy::ExposeSecret;

    use super::{decrypt_secret, encrypt_secret, MasterKeyRecord};

    #[test]
    fn master_key_roundtrip() {
        let mut rng = ChaChaRng::seed_from_u64(0);
        let (record, master) = MasterKeyRecord::generate(&mut rng, b"correct horse", 10);

        let unlocked = record.unlock(b"correct horse").unwrap();
        assert_eq!(unlocked.expose_secret(), master.expose_secret());
        assert!(record.unlock(b"battery staple").is_none());

        let mut encoded = vec![];
        record.write(&mut encoded).unwrap();
        assert_eq!(MasterKeyRecord::read(&encoded[..]).unwrap(), record);
    }

    #[test]
    fn secrets_are_bound_to_their_iv() {
        let mut rng = ChaChaRng::seed_from_u64(1);
        let (_, master) = MasterKeyRecord::generate(&mut rng, b"pass", 1);

        let crypted = encrypt_secret(&master, &[7; 32], b"spending key bytes");
        assert_ne!(&crypted[..18], b"spending key bytes");
        assert_eq!(
            decrypt_secret(&master, &[7; 32], &crypted).as_deref(),
            Some(&b"spending key bytes"[..])
        );
        assert!(decrypt_secret(&master, &[8; 32], &crypted).is_none());
    }
}
