//! Structs and constants specific to the Sapling-style shielded pool.

pub mod keys;
pub mod note;
pub mod note_encryption;
pub mod prover;
pub mod spec;

use blake2b_simd::Params as Blake2bParams;
use group::GroupEncoding;
use std::convert::TryInto;
use std::fmt;
use std::io::{self, Read, Write};

use crate::constants::MERKLE_HASH_PERSONALIZATION;
use crate::merkle_tree::Hashable;

pub use self::keys::{
    Diversifier, ExpandedSpendingKey, FullViewingKey, NullifierDerivingKey, OutgoingViewingKey,
    ProofGenerationKey, SaplingIvk, ViewingKey,
};
pub use self::note::{Note, Rseed};

pub const SAPLING_COMMITMENT_TREE_DEPTH: usize = 32;

/// Compute a parent node in the shielded commitment tree given its two children.
pub fn merkle_hash(depth: usize, lhs: &[u8; 32], rhs: &[u8; 32]) -> [u8; 32] {
    let mut personal = [0u8; 16];
    personal[..15].copy_from_slice(MERKLE_HASH_PERSONALIZATION);
    personal[15] = depth as u8;

    let mut result = [0u8; 32];
    result.copy_from_slice(
        Blake2bParams::new()
            .hash_length(32)
            .personal(&personal)
            .to_state()
            .update(lhs)
            .update(rhs)
            .finalize()
            .as_bytes(),
    );
    result
}

/// A node within the shielded commitment tree.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Node {
    repr: [u8; 32],
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("repr", &hex::encode(self.repr))
            .finish()
    }
}

impl Node {
    pub fn new(repr: [u8; 32]) -> Self {
        Node { repr }
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.repr
    }
}

impl Hashable for Node {
    fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut repr = [0u8; 32];
        reader.read_exact(&mut repr)?;
        Ok(Node::new(repr))
    }

    fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(self.repr.as_ref())
    }

    fn combine(depth: usize, lhs: &Self, rhs: &Self) -> Self {
        Node {
            repr: merkle_hash(depth, &lhs.repr, &rhs.repr),
        }
    }

    fn blank() -> Self {
        let mut repr = [0u8; 32];
        repr[0] = 1;
        Node { repr }
    }

    fn empty_root(depth: usize) -> Self {
        EMPTY_ROOTS[depth]
    }
}

lazy_static! {
    static ref EMPTY_ROOTS: Vec<Node> = {
        let mut v = vec![Node::blank()];
        for d in 0..SAPLING_COMMITMENT_TREE_DEPTH {
            let next = Node::combine(d, &v[d], &v[d]);
            v.push(next);
        }
        v
    };
}

/// Typesafe wrapper for nullifier values.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Nullifier(pub [u8; 32]);

impl fmt::Debug for Nullifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Nullifier")
            .field(&hex::encode(self.0))
            .finish()
    }
}

impl Nullifier {
    pub fn from_slice(bytes: &[u8]) -> Result<Nullifier, std::array::TryFromSliceError> {
        bytes.try_into().map(Nullifier)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl AsRef<[u8]> for Nullifier {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// A shielded payment address.
///
/// # Invariants
///
/// `pk_d` is guaranteed to be prime-order (i.e. in the prime-order subgroup of Jubjub,
/// and not the identity).
#[derive(Clone, Copy, Debug)]
pub struct PaymentAddress {
    pk_d: jubjub::SubgroupPoint,
    diversifier: Diversifier,
}

impl PartialEq for PaymentAddress {
    fn eq(&self, other: &Self) -> bool {
        self.pk_d == other.pk_d && self.diversifier == other.diversifier
    }
}

impl Eq for PaymentAddress {}

impl PartialOrd for PaymentAddress {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PaymentAddress {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.to_bytes().cmp(&other.to_bytes())
    }
}

impl std::hash::Hash for PaymentAddress {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state)
    }
}

impl PaymentAddress {
    /// Constructs a PaymentAddress from a diversifier and a Jubjub point.
    ///
    /// Returns None if `diversifier` is not valid for shielded addresses, or if `pk_d`
    /// is the identity.
    pub fn from_parts(diversifier: Diversifier, pk_d: jubjub::SubgroupPoint) -> Option<Self> {
        if bool::from(group::Group::is_identity(&pk_d)) {
            None
        } else {
            diversifier.g_d().map(|_| PaymentAddress { pk_d, diversifier })
        }
    }

    /// Parses a PaymentAddress from bytes.
    pub fn from_bytes(bytes: &[u8; 43]) -> Option<Self> {
        let diversifier = {
            let mut tmp = [0; 11];
            tmp.copy_from_slice(&bytes[0..11]);
            Diversifier(tmp)
        };

        let mut pk_d_bytes = [0u8; 32];
        pk_d_bytes.copy_from_slice(&bytes[11..43]);
        Option::<jubjub::SubgroupPoint>::from(jubjub::SubgroupPoint::from_bytes(&pk_d_bytes))
            .and_then(|pk_d| PaymentAddress::from_parts(diversifier, pk_d))
    }

    /// Returns the byte encoding of this `PaymentAddress`.
    pub fn to_bytes(&self) -> [u8; 43] {
        let mut bytes = [0; 43];
        bytes[0..11].copy_from_slice(&self.diversifier.0);
        bytes[11..].copy_from_slice(&self.pk_d.to_bytes());
        bytes
    }

    /// Returns the [`Diversifier`] for this `PaymentAddress`.
    pub fn diversifier(&self) -> &Diversifier {
        &self.diversifier
    }

    /// Returns `pk_d` for this `PaymentAddress`.
    pub fn pk_d(&self) -> &jubjub::SubgroupPoint {
        &self.pk_d
    }

    pub fn g_d(&self) -> Option<jubjub::SubgroupPoint> {
        self.diversifier.g_d()
    }

    pub fn create_note(&self, value: u64, rseed: Rseed) -> Option<Note> {
        self.g_d().map(|g_d| Note {
            value,
            rseed,
            g_d,
            pk_d: self.pk_d,
        })
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::prelude::*;

    use super::{
        keys::{testing::arb_incoming_viewing_key, Diversifier},
        Node, Nullifier, PaymentAddress,
    };

    prop_compose! {
        pub fn arb_node()(value in prop::array::uniform32(prop::num::u8::ANY)) -> Node {
            Node::new(value)
        }
    }

    prop_compose! {
        pub fn arb_nullifier()(value in prop::array::uniform32(prop::num::u8::ANY)) -> Nullifier {
            Nullifier(value)
        }
    }

    pub fn arb_payment_address() -> impl Strategy<Value = PaymentAddress> {
        (
            arb_incoming_viewing_key(),
            prop::array::uniform11(prop::num::u8::ANY),
        )
            .prop_filter_map("invalid diversifier", |(ivk, d)| {
                ivk.to_payment_address(Diversifier(d))
            })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{testing::arb_payment_address, Node, PaymentAddress, EMPTY_ROOTS};
    use crate::merkle_tree::Hashable;

    #[test]
    fn empty_roots_are_chained() {
        assert_eq!(EMPTY_ROOTS.len(), 33);
        for d in 0..32 {
            assert_eq!(
                EMPTY_ROOTS[d + 1],
                Node::combine(d, &EMPTY_ROOTS[d], &EMPTY_ROOTS[d])
            );
        }
    }

    #[test]
    fn merkle_hash_is_depth_separated() {
        let a = Node::new([1; 32]);
        let b = Node::new([2; 32]);
        assert_ne!(Node::combine(0, &a, &b), Node::combine(1, &a, &b));
        assert_ne!(Node::combine(0, &a, &b), Node::combine(0, &b, &a));
    }

    #[test]
    fn invalid_address_bytes() {
        // An all-zero pk_d is not the encoding of a prime-order point.
        assert_eq!(PaymentAddress::from_bytes(&[0u8; 43]), None);
    }

    proptest! {
        #[test]
        fn payment_address_bytes(addr in arb_payment_address()) {
            prop_assert_eq!(PaymentAddress::from_bytes(&addr.to_bytes()), Some(addr));
        }
    }
}
