//! Shielded key components.
//!
//! A spending key expands into `(ask, nsk, ovk)`; the public half `(ak, nk, ovk)` is the
//! full viewing key, from which the incoming viewing key `ivk` and every diversified
//! payment address are derived.

use std::cmp::Ordering;
use std::convert::TryInto;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::io::{self, Read, Write};

use ff::PrimeField;
use group::{Group, GroupEncoding};
use subtle::CtOption;

use super::{
    spec::{crh_ivk, diversify_hash, PROOF_GENERATION_KEY_GENERATOR, SPENDING_KEY_GENERATOR},
    PaymentAddress,
};
use crate::keys::prf_expand;

/// Errors that can occur in the decoding of shielded spending keys.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodingError {
    /// The length of the byte slice provided for decoding was incorrect.
    LengthInvalid { expected: usize, actual: usize },
    /// Could not decode the `ask` bytes to a jubjub field element.
    InvalidAsk,
    /// Could not decode the `nsk` bytes to a jubjub field element.
    InvalidNsk,
}

impl fmt::Display for DecodingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodingError::LengthInvalid { expected, actual } => write!(
                f,
                "Invalid key length: expected {} bytes, got {}",
                expected, actual
            ),
            DecodingError::InvalidAsk => write!(f, "ask not in field"),
            DecodingError::InvalidNsk => write!(f, "nsk not in field"),
        }
    }
}

impl std::error::Error for DecodingError {}

/// An outgoing viewing key
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OutgoingViewingKey(pub [u8; 32]);

/// A shielded expanded spending key
#[derive(Clone)]
pub struct ExpandedSpendingKey {
    pub ask: jubjub::Fr,
    pub nsk: jubjub::Fr,
    pub ovk: OutgoingViewingKey,
}

impl fmt::Debug for ExpandedSpendingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Spending keys cannot be Debug-formatted.")
    }
}

impl PartialEq for ExpandedSpendingKey {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for ExpandedSpendingKey {}

impl ExpandedSpendingKey {
    pub fn from_spending_key(sk: &[u8]) -> Self {
        let ask = jubjub::Fr::from_bytes_wide(prf_expand(sk, &[0x00]).as_array());
        let nsk = jubjub::Fr::from_bytes_wide(prf_expand(sk, &[0x01]).as_array());
        let mut ovk = OutgoingViewingKey([0u8; 32]);
        ovk.0
            .copy_from_slice(&prf_expand(sk, &[0x02]).as_bytes()[..32]);
        ExpandedSpendingKey { ask, nsk, ovk }
    }

    pub fn proof_generation_key(&self) -> ProofGenerationKey {
        ProofGenerationKey {
            ak: *SPENDING_KEY_GENERATOR * self.ask,
            nsk: self.nsk,
        }
    }

    /// Decodes the expanded spending key from its serialized representation.
    pub fn from_bytes(b: &[u8]) -> Result<Self, DecodingError> {
        let b: &[u8; 96] = b.try_into().map_err(|_| DecodingError::LengthInvalid {
            expected: 96,
            actual: b.len(),
        })?;

        let mut repr = [0u8; 32];
        repr.copy_from_slice(&b[0..32]);
        let ask = Option::<jubjub::Fr>::from(jubjub::Fr::from_repr(repr))
            .ok_or(DecodingError::InvalidAsk)?;
        repr.copy_from_slice(&b[32..64]);
        let nsk = Option::<jubjub::Fr>::from(jubjub::Fr::from_repr(repr))
            .ok_or(DecodingError::InvalidNsk)?;
        let mut ovk = OutgoingViewingKey([0u8; 32]);
        ovk.0.copy_from_slice(&b[64..96]);

        Ok(ExpandedSpendingKey { ask, nsk, ovk })
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let mut repr = [0u8; 96];
        reader.read_exact(repr.as_mut())?;
        Self::from_bytes(&repr).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    /// Encodes the expanded spending key to its serialized representation.
    pub fn to_bytes(&self) -> [u8; 96] {
        let mut result = [0u8; 96];
        result[0..32].copy_from_slice(&self.ask.to_repr());
        result[32..64].copy_from_slice(&self.nsk.to_repr());
        result[64..96].copy_from_slice(&self.ovk.0);
        result
    }
}

#[derive(Clone)]
pub struct ProofGenerationKey {
    pub ak: jubjub::SubgroupPoint,
    pub nsk: jubjub::Fr,
}

impl ProofGenerationKey {
    pub fn to_viewing_key(&self) -> ViewingKey {
        ViewingKey {
            ak: self.ak,
            nk: NullifierDerivingKey(*PROOF_GENERATION_KEY_GENERATOR * self.nsk),
        }
    }
}

/// A key used to derive the nullifier for a shielded note.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct NullifierDerivingKey(pub jubjub::SubgroupPoint);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewingKey {
    pub ak: jubjub::SubgroupPoint,
    pub nk: NullifierDerivingKey,
}

impl ViewingKey {
    pub fn rk(&self, ar: jubjub::Fr) -> jubjub::SubgroupPoint {
        self.ak + *SPENDING_KEY_GENERATOR * ar
    }

    pub fn ivk(&self) -> SaplingIvk {
        SaplingIvk(crh_ivk(self.ak.to_bytes(), self.nk.0.to_bytes()))
    }

    pub fn to_payment_address(&self, diversifier: Diversifier) -> Option<PaymentAddress> {
        self.ivk().to_payment_address(diversifier)
    }
}

/// A key that provides the capability to view incoming and outgoing transactions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullViewingKey {
    pub vk: ViewingKey,
    pub ovk: OutgoingViewingKey,
}

impl FullViewingKey {
    pub fn from_expanded_spending_key(expsk: &ExpandedSpendingKey) -> Self {
        FullViewingKey {
            vk: expsk.proof_generation_key().to_viewing_key(),
            ovk: expsk.ovk,
        }
    }

    pub fn read<R: Read>(mut reader: R) -> io::Result<Self> {
        let ak = {
            let mut buf = [0u8; 32];
            reader.read_exact(&mut buf)?;
            jubjub::SubgroupPoint::from_bytes(&buf)
                .and_then(|p| CtOption::new(p, !p.is_identity()))
        };
        let nk = {
            let mut buf = [0u8; 32];
            reader.read_exact(&mut buf)?;
            jubjub::SubgroupPoint::from_bytes(&buf)
        };
        let ak = Option::<jubjub::SubgroupPoint>::from(ak).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "ak not of prime order")
        })?;
        let nk = Option::<jubjub::SubgroupPoint>::from(nk).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "nk not in prime-order subgroup")
        })?;

        let mut ovk = [0u8; 32];
        reader.read_exact(&mut ovk)?;

        Ok(FullViewingKey {
            vk: ViewingKey {
                ak,
                nk: NullifierDerivingKey(nk),
            },
            ovk: OutgoingViewingKey(ovk),
        })
    }

    pub fn write<W: Write>(&self, mut writer: W) -> io::Result<()> {
        writer.write_all(&self.vk.ak.to_bytes())?;
        writer.write_all(&self.vk.nk.0.to_bytes())?;
        writer.write_all(&self.ovk.0)?;

        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; 96] {
        let mut result = [0u8; 96];
        result[0..32].copy_from_slice(&self.vk.ak.to_bytes());
        result[32..64].copy_from_slice(&self.vk.nk.0.to_bytes());
        result[64..96].copy_from_slice(&self.ovk.0);
        result
    }
}

/// An incoming viewing key: enough to trial-decrypt notes, not enough to spend them.
#[derive(Debug, Clone)]
pub struct SaplingIvk(pub jubjub::Fr);

impl SaplingIvk {
    pub fn to_payment_address(&self, diversifier: Diversifier) -> Option<PaymentAddress> {
        diversifier.g_d().and_then(|g_d| {
            let pk_d = g_d * self.0;

            PaymentAddress::from_parts(diversifier, pk_d)
        })
    }

    pub fn to_repr(&self) -> [u8; 32] {
        self.0.to_repr()
    }

    pub fn from_repr(repr: [u8; 32]) -> Option<Self> {
        Option::<jubjub::Fr>::from(jubjub::Fr::from_repr(repr)).map(SaplingIvk)
    }
}

impl PartialEq for SaplingIvk {
    fn eq(&self, other: &Self) -> bool {
        self.to_repr() == other.to_repr()
    }
}

impl Eq for SaplingIvk {}

impl PartialOrd for SaplingIvk {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SaplingIvk {
    fn cmp(&self, other: &Self) -> Ordering {
        self.to_repr().cmp(&other.to_repr())
    }
}

impl Hash for SaplingIvk {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_repr().hash(state)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Diversifier(pub [u8; 11]);

impl Diversifier {
    pub fn g_d(&self) -> Option<jubjub::SubgroupPoint> {
        diversify_hash(&self.0)
    }
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing {
    use proptest::collection::vec;
    use proptest::prelude::*;

    use super::{ExpandedSpendingKey, FullViewingKey, SaplingIvk};

    prop_compose! {
        pub fn arb_expanded_spending_key()(v in vec(any::<u8>(), 32..252)) -> ExpandedSpendingKey {
            ExpandedSpendingKey::from_spending_key(&v)
        }
    }

    prop_compose! {
        pub fn arb_full_viewing_key()(sk in arb_expanded_spending_key()) -> FullViewingKey {
            FullViewingKey::from_expanded_spending_key(&sk)
        }
    }

    prop_compose! {
        pub fn arb_incoming_viewing_key()(fvk in arb_full_viewing_key()) -> SaplingIvk {
            fvk.vk.ivk()
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use group::{Group, GroupEncoding};
    use proptest::prelude::*;

    use super::{
        testing::arb_expanded_spending_key, DecodingError, ExpandedSpendingKey, FullViewingKey,
        SaplingIvk,
    };
    use crate::sapling::spec::SPENDING_KEY_GENERATOR;

    #[test]
    fn ak_must_be_prime_order() {
        let mut buf = [0; 96];
        let identity = jubjub::SubgroupPoint::identity();

        // Set both ak and nk to the identity.
        buf[0..32].copy_from_slice(&identity.to_bytes());
        buf[32..64].copy_from_slice(&identity.to_bytes());

        // ak is not allowed to be the identity.
        assert_eq!(
            FullViewingKey::read(&buf[..]).unwrap_err().to_string(),
            "ak not of prime order"
        );

        // Set ak to a basepoint.
        buf[0..32].copy_from_slice(&SPENDING_KEY_GENERATOR.to_bytes());

        // nk is allowed to be the identity.
        assert!(FullViewingKey::read(&buf[..]).is_ok());
    }

    #[test]
    fn expsk_length_is_checked() {
        assert_matches!(
            ExpandedSpendingKey::from_bytes(&[0u8; 95]),
            Err(DecodingError::LengthInvalid {
                expected: 96,
                actual: 95
            })
        );
    }

    proptest! {
        #[test]
        fn expsk_serialization(expsk in arb_expanded_spending_key()) {
            let parsed = ExpandedSpendingKey::from_bytes(&expsk.to_bytes()).unwrap();
            prop_assert_eq!(parsed, expsk.clone());

            let fvk = FullViewingKey::from_expanded_spending_key(&expsk);
            let fvk_parsed = FullViewingKey::read(&fvk.to_bytes()[..]).unwrap();
            prop_assert_eq!(fvk_parsed.vk.ivk(), fvk.vk.ivk());
            prop_assert_eq!(SaplingIvk::from_repr(fvk.vk.ivk().to_repr()), Some(fvk.vk.ivk()));
        }
    }
}
