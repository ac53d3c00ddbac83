//! Implementation of in-band secret distribution for shielded outputs.

use blake2b_simd::{Hash as Blake2bHash, Params as Blake2bParams};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chacha20poly1305::{
    aead::{AeadInPlace, KeyInit},
    ChaCha20Poly1305, Key, Nonce, Tag,
};
use ff::PrimeField;
use group::GroupEncoding;
use rand_core::{CryptoRng, RngCore};
use std::convert::TryInto;

use super::{
    spec::{ka_agree, ka_derive_public},
    Diversifier, Node, Note, OutgoingViewingKey, PaymentAddress, Rseed, SaplingIvk,
};
use crate::memo::MemoBytes;

pub const KDF_SAPLING_PERSONALIZATION: &[u8; 16] = b"Zcash_SaplingKDF";
pub const PRF_OCK_PERSONALIZATION: &[u8; 16] = b"Zcash_Derive_ock";

const COMPACT_NOTE_SIZE: usize = 1 + // version
    11 + // diversifier
    8  + // value
    32; // rseed
pub const NOTE_PLAINTEXT_SIZE: usize = COMPACT_NOTE_SIZE + 512;
const OUT_PLAINTEXT_SIZE: usize = 32 + // pk_d
    32; // esk
const AEAD_TAG_SIZE: usize = 16;
pub const ENC_CIPHERTEXT_SIZE: usize = NOTE_PLAINTEXT_SIZE + AEAD_TAG_SIZE;
pub const OUT_CIPHERTEXT_SIZE: usize = OUT_PLAINTEXT_SIZE + AEAD_TAG_SIZE;

/// KDF for note encryption: BLAKE2b-256 over the shared secret and ephemeral key.
fn kdf_sapling(dhsecret: &jubjub::SubgroupPoint, epk: &[u8; 32]) -> Blake2bHash {
    Blake2bParams::new()
        .hash_length(32)
        .personal(KDF_SAPLING_PERSONALIZATION)
        .to_state()
        .update(&dhsecret.to_bytes())
        .update(epk)
        .finalize()
}

/// A symmetric key that can be used to recover a single shielded output.
pub struct OutgoingCipherKey([u8; 32]);

impl From<[u8; 32]> for OutgoingCipherKey {
    fn from(ock: [u8; 32]) -> Self {
        OutgoingCipherKey(ock)
    }
}

impl AsRef<[u8]> for OutgoingCipherKey {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// PRF^ock, binding the sender's ovk to a single output.
pub fn prf_ock(
    ovk: &OutgoingViewingKey,
    cv: &[u8; 32],
    cmu: &Node,
    epk: &[u8; 32],
) -> OutgoingCipherKey {
    let mut ock = [0u8; 32];
    ock.copy_from_slice(
        Blake2bParams::new()
            .hash_length(32)
            .personal(PRF_OCK_PERSONALIZATION)
            .to_state()
            .update(&ovk.0)
            .update(cv)
            .update(&cmu.to_bytes())
            .update(epk)
            .finalize()
            .as_bytes(),
    );
    OutgoingCipherKey(ock)
}

fn seal(key: &[u8], buf: &mut [u8]) -> [u8; AEAD_TAG_SIZE] {
    let tag = ChaCha20Poly1305::new(Key::from_slice(key))
        .encrypt_in_place_detached(Nonce::from_slice(&[0u8; 12]), &[], buf)
        // Only fails for plaintexts larger than 2^38 bytes.
        .expect("plaintext is a fixed small size");
    let mut out = [0u8; AEAD_TAG_SIZE];
    out.copy_from_slice(&tag);
    out
}

fn open(key: &[u8], ciphertext: &[u8], buf: &mut [u8]) -> Option<()> {
    let (body, tag) = ciphertext.split_at(buf.len());
    buf.copy_from_slice(body);
    ChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt_in_place_detached(
            Nonce::from_slice(&[0u8; 12]),
            &[],
            buf,
            Tag::from_slice(tag),
        )
        .ok()
}

/// An API for encrypting shielded notes.
///
/// Enforces that a fresh ephemeral key is used for every note, and that the two
/// ciphertexts of an output are consistent with each other.
pub struct SaplingNoteEncryption<R: RngCore> {
    epk: jubjub::SubgroupPoint,
    esk: jubjub::Fr,
    note: Note,
    to: PaymentAddress,
    memo: MemoBytes,
    /// `None` represents the `ovk = ⊥` case.
    ovk: Option<OutgoingViewingKey>,
    rng: R,
}

impl<R: RngCore + CryptoRng> SaplingNoteEncryption<R> {
    /// Creates a new encryption context for the given note.
    ///
    /// Setting `ovk` to `None` represents the `ovk = ⊥` case, where the note cannot be
    /// recovered by the sender.
    pub fn new(
        ovk: Option<OutgoingViewingKey>,
        note: Note,
        to: PaymentAddress,
        memo: MemoBytes,
        mut rng: R,
    ) -> Self {
        let esk = note.generate_or_derive_esk(&mut rng);
        let epk = ka_derive_public(&esk, &note.g_d);

        SaplingNoteEncryption {
            epk,
            esk,
            note,
            to,
            memo,
            ovk,
            rng,
        }
    }
}

impl<R: RngCore> SaplingNoteEncryption<R> {
    /// Exposes the ephemeral secret key being used to encrypt this note.
    pub fn esk(&self) -> &jubjub::Fr {
        &self.esk
    }

    /// Exposes the ephemeral public key being used to encrypt this note.
    pub fn epk(&self) -> &jubjub::SubgroupPoint {
        &self.epk
    }

    /// Generates `encCiphertext` for this note.
    pub fn encrypt_note_plaintext(&self) -> [u8; ENC_CIPHERTEXT_SIZE] {
        let shared_secret = ka_agree(&self.esk, self.to.pk_d());
        let key = kdf_sapling(&shared_secret, &self.epk.to_bytes());

        let mut input = [0; NOTE_PLAINTEXT_SIZE];
        input[0] = match self.note.rseed {
            Rseed::BeforeZip212(_) => 1,
            Rseed::AfterZip212(_) => 2,
        };
        input[1..12].copy_from_slice(&self.to.diversifier().0);
        (&mut input[12..20])
            .write_u64::<LittleEndian>(self.note.value)
            .expect("slice has room for a u64");
        input[20..COMPACT_NOTE_SIZE].copy_from_slice(&self.note.rseed.to_bytes());
        input[COMPACT_NOTE_SIZE..NOTE_PLAINTEXT_SIZE].copy_from_slice(self.memo.as_array());

        let tag = seal(key.as_bytes(), &mut input);

        let mut output = [0u8; ENC_CIPHERTEXT_SIZE];
        output[..NOTE_PLAINTEXT_SIZE].copy_from_slice(&input);
        output[NOTE_PLAINTEXT_SIZE..].copy_from_slice(&tag);
        output
    }

    /// Generates `outCiphertext` for this note.
    pub fn encrypt_outgoing_plaintext(
        &mut self,
        cv: &[u8; 32],
        cmu: &Node,
    ) -> [u8; OUT_CIPHERTEXT_SIZE] {
        let (ock, mut input) = if let Some(ovk) = &self.ovk {
            let ock = prf_ock(ovk, cv, cmu, &self.epk.to_bytes());

            let mut input = [0u8; OUT_PLAINTEXT_SIZE];
            input[0..32].copy_from_slice(&self.note.pk_d.to_bytes());
            input[32..OUT_PLAINTEXT_SIZE].copy_from_slice(self.esk.to_repr().as_ref());

            (ock, input)
        } else {
            // ovk = ⊥
            let mut ock = OutgoingCipherKey([0; 32]);
            let mut input = [0u8; OUT_PLAINTEXT_SIZE];

            self.rng.fill_bytes(&mut ock.0);
            self.rng.fill_bytes(&mut input);

            (ock, input)
        };

        let tag = seal(ock.as_ref(), &mut input);

        let mut output = [0u8; OUT_CIPHERTEXT_SIZE];
        output[..OUT_PLAINTEXT_SIZE].copy_from_slice(&input);
        output[OUT_PLAINTEXT_SIZE..].copy_from_slice(&tag);
        output
    }
}

/// Only the two defined plaintext lead bytes are accepted.
pub fn plaintext_version_is_valid(leadbyte: u8) -> bool {
    leadbyte == 0x01 || leadbyte == 0x02
}

fn parse_rseed(leadbyte: u8, r: [u8; 32]) -> Option<Rseed> {
    if leadbyte == 0x01 {
        Option::<jubjub::Fr>::from(jubjub::Fr::from_repr(r)).map(Rseed::BeforeZip212)
    } else {
        Some(Rseed::AfterZip212(r))
    }
}

fn parse_note_plaintext(
    ivk: &SaplingIvk,
    epk: &[u8; 32],
    cmu: &Node,
    plaintext: &[u8; NOTE_PLAINTEXT_SIZE],
) -> Option<(Note, PaymentAddress, MemoBytes)> {
    if !plaintext_version_is_valid(plaintext[0]) {
        return None;
    }

    let mut d = [0u8; 11];
    d.copy_from_slice(&plaintext[1..12]);

    let v = (&plaintext[12..20]).read_u64::<LittleEndian>().ok()?;
    let r: [u8; 32] = plaintext[20..COMPACT_NOTE_SIZE].try_into().ok()?;
    let rseed = parse_rseed(plaintext[0], r)?;

    let to = ivk.to_payment_address(Diversifier(d))?;
    let note = to.create_note(v, rseed)?;

    if note.cmu() != *cmu {
        // Published commitment doesn't match calculated commitment
        return None;
    }

    if let Some(derived_esk) = note.derive_esk() {
        if ka_derive_public(&derived_esk, &note.g_d).to_bytes() != *epk {
            return None;
        }
    }

    let memo = MemoBytes::from_bytes(&plaintext[COMPACT_NOTE_SIZE..]).ok()?;
    Some((note, to, memo))
}

/// Trial decryption of the full note plaintext by the recipient.
///
/// Attempts to decrypt and validate the given `enc_ciphertext` using the given `ivk`.
/// If successful, the corresponding note and memo are returned, along with the
/// `PaymentAddress` to which the note was sent.
pub fn try_sapling_note_decryption(
    ivk: &SaplingIvk,
    epk: &[u8; 32],
    cmu: &Node,
    enc_ciphertext: &[u8; ENC_CIPHERTEXT_SIZE],
) -> Option<(Note, PaymentAddress, MemoBytes)> {
    let epk_point =
        Option::<jubjub::SubgroupPoint>::from(jubjub::SubgroupPoint::from_bytes(epk))?;

    let shared_secret = ka_agree(&ivk.0, &epk_point);
    let key = kdf_sapling(&shared_secret, epk);

    let mut plaintext = [0; NOTE_PLAINTEXT_SIZE];
    open(key.as_bytes(), enc_ciphertext, &mut plaintext)?;

    parse_note_plaintext(ivk, epk, cmu, &plaintext)
}

/// Recovery of the full note plaintext by the sender, given the output's `ock`.
pub fn try_sapling_output_recovery_with_ock(
    ock: &OutgoingCipherKey,
    cmu: &Node,
    epk: &[u8; 32],
    enc_ciphertext: &[u8; ENC_CIPHERTEXT_SIZE],
    out_ciphertext: &[u8; OUT_CIPHERTEXT_SIZE],
) -> Option<(Note, PaymentAddress, MemoBytes)> {
    let mut op = [0; OUT_PLAINTEXT_SIZE];
    open(ock.as_ref(), out_ciphertext, &mut op)?;

    let pk_d = Option::<jubjub::SubgroupPoint>::from(jubjub::SubgroupPoint::from_bytes(
        op[0..32].try_into().ok()?,
    ))?;
    let esk = Option::<jubjub::Fr>::from(jubjub::Fr::from_repr(
        op[32..OUT_PLAINTEXT_SIZE].try_into().ok()?,
    ))?;

    let shared_secret = ka_agree(&esk, &pk_d);
    let key = kdf_sapling(&shared_secret, epk);

    let mut plaintext = [0; NOTE_PLAINTEXT_SIZE];
    open(key.as_bytes(), enc_ciphertext, &mut plaintext)?;

    if !plaintext_version_is_valid(plaintext[0]) {
        return None;
    }

    let mut d = [0u8; 11];
    d.copy_from_slice(&plaintext[1..12]);

    let v = (&plaintext[12..20]).read_u64::<LittleEndian>().ok()?;
    let r: [u8; 32] = plaintext[20..COMPACT_NOTE_SIZE].try_into().ok()?;
    let rseed = parse_rseed(plaintext[0], r)?;

    let memo = MemoBytes::from_bytes(&plaintext[COMPACT_NOTE_SIZE..]).ok()?;

    let diversifier = Diversifier(d);
    if ka_derive_public(&esk, &diversifier.g_d()?).to_bytes() != *epk {
        // Published epk doesn't match calculated epk
        return None;
    }

    let to = PaymentAddress::from_parts(diversifier, pk_d)?;
    let note = to.create_note(v, rseed)?;

    if note.cmu() != *cmu {
        // Published commitment doesn't match calculated commitment
        return None;
    }

    if let Some(derived_esk) = note.derive_esk() {
        if derived_esk != esk {
            return None;
        }
    }

    Some((note, to, memo))
}

/// Recovery of the full note plaintext by the sender.
///
/// Attempts to decrypt and validate the given `enc_ciphertext` using the given `ovk`.
/// If successful, the corresponding note and memo are returned, along with the
/// `PaymentAddress` to which the note was sent.
pub fn try_sapling_output_recovery(
    ovk: &OutgoingViewingKey,
    cv: &[u8; 32],
    cmu: &Node,
    epk: &[u8; 32],
    enc_ciphertext: &[u8; ENC_CIPHERTEXT_SIZE],
    out_ciphertext: &[u8; OUT_CIPHERTEXT_SIZE],
) -> Option<(Note, PaymentAddress, MemoBytes)> {
    try_sapling_output_recovery_with_ock(
        &prf_ock(ovk, cv, cmu, epk),
        cmu,
        epk,
        enc_ciphertext,
        out_ciphertext,
    )
}
