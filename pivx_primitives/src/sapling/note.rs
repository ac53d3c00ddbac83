use ff::{Field, PrimeField};
use rand_core::{CryptoRng, RngCore};

use super::{
    spec::{note_commitment, prf_nf},
    Node, Nullifier, NullifierDerivingKey,
};
use crate::keys::prf_expand;

/// Enum for note randomness.
///
/// Legacy notes carry the commitment trapdoor `rcm` directly. Notes created by this
/// crate carry a 32-byte `rseed`, from which both `rcm` and the ephemeral secret key
/// `esk` are derived.
#[derive(Copy, Clone, Debug)]
pub enum Rseed {
    BeforeZip212(jubjub::Fr),
    AfterZip212([u8; 32]),
}

impl Rseed {
    pub(crate) fn rcm(&self) -> jubjub::Fr {
        match self {
            Rseed::BeforeZip212(rcm) => *rcm,
            Rseed::AfterZip212(rseed) => {
                jubjub::Fr::from_bytes_wide(prf_expand(rseed, &[0x04]).as_array())
            }
        }
    }

    /// Returns the 32 bytes that are stored in a note plaintext for this randomness.
    pub fn to_bytes(&self) -> [u8; 32] {
        match self {
            Rseed::BeforeZip212(rcm) => rcm.to_repr(),
            Rseed::AfterZip212(rseed) => *rseed,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Note {
    /// The value of the note
    pub value: u64,
    /// The diversified base of the address, GH(d)
    pub g_d: jubjub::SubgroupPoint,
    /// The public key of the address, g_d^ivk
    pub pk_d: jubjub::SubgroupPoint,
    /// rseed
    pub rseed: Rseed,
}

impl PartialEq for Note {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
            && self.g_d == other.g_d
            && self.pk_d == other.pk_d
            && self.rcm() == other.rcm()
    }
}

impl Eq for Note {}

impl Note {
    /// Computes the nullifier given the nullifier deriving key and
    /// note position
    pub fn nf(&self, nk: &NullifierDerivingKey, position: u64) -> Nullifier {
        Nullifier(prf_nf(&nk.0, &self.cmu_bytes(), position))
    }

    fn cmu_bytes(&self) -> [u8; 32] {
        note_commitment(&self.g_d, &self.pk_d, self.value, &self.rcm())
    }

    /// Computes the note commitment, as it is appended to the commitment tree.
    pub fn cmu(&self) -> Node {
        Node::new(self.cmu_bytes())
    }

    pub fn rcm(&self) -> jubjub::Fr {
        self.rseed.rcm()
    }

    pub fn generate_or_derive_esk<R: RngCore + CryptoRng>(&self, rng: &mut R) -> jubjub::Fr {
        self.generate_or_derive_esk_internal(rng)
    }

    pub(crate) fn generate_or_derive_esk_internal<R: RngCore>(&self, rng: &mut R) -> jubjub::Fr {
        match self.derive_esk() {
            None => jubjub::Fr::random(rng),
            Some(esk) => esk,
        }
    }

    /// Returns the derived `esk` if this note carries an `rseed`.
    pub fn derive_esk(&self) -> Option<jubjub::Fr> {
        match self.rseed {
            Rseed::BeforeZip212(_) => None,
            Rseed::AfterZip212(rseed) => Some(jubjub::Fr::from_bytes_wide(
                prf_expand(&rseed, &[0x05]).as_array(),
            )),
        }
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::*;

    use super::{super::testing::arb_payment_address, Note, Rseed};

    prop_compose! {
        pub fn arb_note(value: u64)(
            addr in arb_payment_address(),
            rseed in prop::array::uniform32(prop::num::u8::ANY).prop_map(Rseed::AfterZip212)
        ) -> Note {
            // arb_payment_address only yields addresses with a valid diversifier
            addr.create_note(value, rseed).unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{testing::arb_note, Rseed};
    use crate::sapling::keys::testing::arb_full_viewing_key;

    proptest! {
        #[test]
        fn nullifiers_are_unique_per_position(
            note in arb_note(1000),
            fvk in arb_full_viewing_key(),
            pos in 0u64..(1 << 32),
        ) {
            prop_assert_ne!(note.nf(&fvk.vk.nk, pos), note.nf(&fvk.vk.nk, pos + 1));
        }

        #[test]
        fn nullifiers_depend_on_commitment(
            a in arb_note(1000),
            b in arb_note(1000),
            fvk in arb_full_viewing_key(),
        ) {
            prop_assume!(a.cmu() != b.cmu());
            prop_assert_ne!(a.nf(&fvk.vk.nk, 7), b.nf(&fvk.vk.nk, 7));
        }
    }

    #[test]
    fn rseed_rcm_is_stable() {
        let rseed = Rseed::AfterZip212([3; 32]);
        assert_eq!(rseed.rcm(), rseed.rcm());
        assert_eq!(rseed.to_bytes(), [3; 32]);
    }
}
