//! Hash and group functions underlying the shielded key and note formats.
//!
//! Every function here is deterministic in its inputs and domain-separated by its
//! own BLAKE2 personalization, so distinct roles never collide.

use blake2b_simd::Params as Blake2bParams;
use blake2s_simd::Params as Blake2sParams;
use group::{ff::PrimeField, Group, GroupEncoding};

use crate::constants::{
    CRH_IVK_PERSONALIZATION, GENERATOR_PERSONALIZATION, GH_PERSONALIZATION,
    NOTE_COMMITMENT_PERSONALIZATION, PRF_NF_PERSONALIZATION, VALUE_COMMITMENT_PERSONALIZATION,
};

lazy_static! {
    /// The generator used to derive spend authorizing keys.
    pub static ref SPENDING_KEY_GENERATOR: jubjub::SubgroupPoint =
        jubjub::SubgroupPoint::generator();

    /// The generator used to derive nullifier deriving keys.
    pub static ref PROOF_GENERATION_KEY_GENERATOR: jubjub::SubgroupPoint =
        jubjub::SubgroupPoint::generator() * hash_to_scalar(GENERATOR_PERSONALIZATION, &[&b"nk"[..]]);
}

/// Maps arbitrary input to a scalar by wide reduction of a BLAKE2b-512 digest.
pub(crate) fn hash_to_scalar(personalization: &[u8; 16], parts: &[&[u8]]) -> jubjub::Fr {
    let mut state = Blake2bParams::new()
        .hash_length(64)
        .personal(personalization)
        .to_state();
    for part in parts {
        state.update(part);
    }
    jubjub::Fr::from_bytes_wide(state.finalize().as_array())
}

/// $CRH^\mathsf{ivk}(ak, nk)$, truncated to 251 bits so that it is a canonical scalar.
pub(crate) fn crh_ivk(ak: [u8; 32], nk: [u8; 32]) -> jubjub::Fr {
    let mut h = [0u8; 64];
    h[..32].copy_from_slice(
        Blake2sParams::new()
            .hash_length(32)
            .personal(CRH_IVK_PERSONALIZATION)
            .to_state()
            .update(&ak)
            .update(&nk)
            .finalize()
            .as_bytes(),
    );

    // Drop the most significant five bits, so it can be interpreted as a scalar.
    h[31] &= 0b0000_0111;

    // The value is below the field modulus, so the wide reduction is the identity.
    jubjub::Fr::from_bytes_wide(&h)
}

/// Maps a diversifier to its diversified base point.
///
/// Returns `None` for diversifiers whose hash lands on the identity.
pub(crate) fn diversify_hash(d: &[u8; 11]) -> Option<jubjub::SubgroupPoint> {
    let g_d = jubjub::SubgroupPoint::generator() * hash_to_scalar(GH_PERSONALIZATION, &[&d[..]]);
    if bool::from(g_d.is_identity()) {
        None
    } else {
        Some(g_d)
    }
}

/// Commits to a note's recipient, value and trapdoor.
pub(crate) fn note_commitment(
    g_d: &jubjub::SubgroupPoint,
    pk_d: &jubjub::SubgroupPoint,
    value: u64,
    rcm: &jubjub::Fr,
) -> [u8; 32] {
    let mut h = [0u8; 32];
    h.copy_from_slice(
        Blake2bParams::new()
            .hash_length(32)
            .personal(NOTE_COMMITMENT_PERSONALIZATION)
            .to_state()
            .update(&g_d.to_bytes())
            .update(&pk_d.to_bytes())
            .update(&value.to_le_bytes())
            .update(rcm.to_repr().as_ref())
            .finalize()
            .as_bytes(),
    );
    h
}

/// Commits to a value under the trapdoor `rcv`.
pub fn value_commitment(value: i64, rcv: &jubjub::Fr) -> [u8; 32] {
    let mut h = [0u8; 32];
    h.copy_from_slice(
        Blake2bParams::new()
            .hash_length(32)
            .personal(VALUE_COMMITMENT_PERSONALIZATION)
            .to_state()
            .update(&value.to_le_bytes())
            .update(rcv.to_repr().as_ref())
            .finalize()
            .as_bytes(),
    );
    h
}

/// $PRF^\mathsf{nf}_{nk}(cm, pos)$
pub(crate) fn prf_nf(nk: &jubjub::SubgroupPoint, cm: &[u8; 32], position: u64) -> [u8; 32] {
    let mut h = [0u8; 32];
    h.copy_from_slice(
        Blake2sParams::new()
            .hash_length(32)
            .personal(PRF_NF_PERSONALIZATION)
            .to_state()
            .update(&nk.to_bytes())
            .update(cm)
            .update(&position.to_le_bytes())
            .finalize()
            .as_bytes(),
    );
    h
}

/// $KA.DerivePublic(esk, g_d)$
pub(crate) fn ka_derive_public(
    esk: &jubjub::Fr,
    g_d: &jubjub::SubgroupPoint,
) -> jubjub::SubgroupPoint {
    g_d * esk
}

/// $KA.Agree(sk, P)$
pub(crate) fn ka_agree(sk: &jubjub::Fr, p: &jubjub::SubgroupPoint) -> jubjub::SubgroupPoint {
    p * sk
}

#[cfg(test)]
mod tests {
    use group::ff::{Field, PrimeField};
    use rand_core::OsRng;

    use super::{crh_ivk, diversify_hash, ka_agree, ka_derive_public, prf_nf};

    #[test]
    fn ivk_is_canonical() {
        for i in 0..20u8 {
            let ivk = crh_ivk([i; 32], [i.wrapping_add(1); 32]);
            assert_eq!(ivk.to_repr()[31] & 0b1111_1000, 0);
        }
    }

    #[test]
    fn key_agreement_is_symmetric() {
        let g_d = diversify_hash(&[3; 11]).unwrap();
        let ivk = jubjub::Fr::random(OsRng);
        let esk = jubjub::Fr::random(OsRng);

        let pk_d = ka_derive_public(&ivk, &g_d);
        let epk = ka_derive_public(&esk, &g_d);
        assert_eq!(ka_agree(&esk, &pk_d), ka_agree(&ivk, &epk));
    }

    #[test]
    fn nullifier_prf_binds_position() {
        let nk = diversify_hash(&[9; 11]).unwrap();
        let cm = [5u8; 32];
        assert_ne!(prf_nf(&nk, &cm, 0), prf_nf(&nk, &cm, 1));
        assert_ne!(prf_nf(&nk, &cm, 0), prf_nf(&nk, &[6u8; 32], 0));
    }
}
