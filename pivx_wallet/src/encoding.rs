//! Encoding and decoding functions for PIVX key and address structs.
//!
//! Human-Readable Prefixes (HRPs) for Bech32 encodings and Base58Check version bytes
//! are supplied by the [`Parameters`] of the network in use.

use bech32::{self, FromBase32, ToBase32, Variant};
use bs58::{self, decode::Error as Bs58Error};
use std::fmt;
use std::io::{self, Write};

use pivx_primitives::{
    consensus::Parameters,
    legacy::TransparentAddress,
    sapling::PaymentAddress,
    zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
};

fn bech32_encode<F>(hrp: &str, write: F) -> String
where
    F: Fn(&mut dyn Write) -> io::Result<()>,
{
    let mut data: Vec<u8> = vec![];
    write(&mut data).expect("Should be able to write to a Vec");
    bech32::encode(hrp, data.to_base32(), Variant::Bech32).expect("hrp is invalid")
}

/// Errors that can occur while decoding a key or an address.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecodeError {
    Bech32Error(bech32::Error),
    IncorrectVariant(Variant),
    ReadError,
    HrpMismatch { expected: String, actual: String },
    Base58(Bs58Error),
    UnsupportedAddressType(String),
}

impl From<bech32::Error> for DecodeError {
    fn from(err: bech32::Error) -> Self {
        DecodeError::Bech32Error(err)
    }
}

impl From<Bs58Error> for DecodeError {
    fn from(err: Bs58Error) -> Self {
        DecodeError::Base58(err)
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            DecodeError::Bech32Error(e) => write!(f, "{}", e),
            DecodeError::IncorrectVariant(variant) => write!(
                f,
                "Incorrect bech32 encoding (wrong variant: {:?})",
                variant
            ),
            DecodeError::ReadError => {
                write!(f, "Failed to decode key from its binary representation.")
            }
            DecodeError::HrpMismatch { expected, actual } => write!(
                f,
                "Key was encoded for a different network: expected {}, got {}.",
                expected, actual
            ),
            DecodeError::Base58(e) => write!(f, "{}", e),
            DecodeError::UnsupportedAddressType(s) => write!(
                f,
                "Could not recognize {} as a supported p2sh or p2pkh address.",
                s
            ),
        }
    }
}

impl std::error::Error for DecodeError {}

fn bech32_decode<T, F>(hrp: &str, s: &str, read: F) -> Result<T, DecodeError>
where
    F: Fn(Vec<u8>) -> Option<T>,
{
    let (decoded_hrp, data, variant) = bech32::decode(s)?;
    if variant != Variant::Bech32 {
        Err(DecodeError::IncorrectVariant(variant))
    } else if decoded_hrp != hrp {
        Err(DecodeError::HrpMismatch {
            expected: hrp.to_string(),
            actual: decoded_hrp,
        })
    } else {
        read(Vec::<u8>::from_base32(&data)?).ok_or(DecodeError::ReadError)
    }
}

/// Writes an [`ExtendedSpendingKey`] as a Bech32-encoded string.
pub fn encode_extended_spending_key(hrp: &str, extsk: &ExtendedSpendingKey) -> String {
    bech32_encode(hrp, |w| extsk.write(w))
}

/// Decodes an [`ExtendedSpendingKey`] from a Bech32-encoded string.
pub fn decode_extended_spending_key(
    hrp: &str,
    s: &str,
) -> Result<ExtendedSpendingKey, DecodeError> {
    bech32_decode(hrp, s, |data| ExtendedSpendingKey::read(&data[..]).ok())
}

/// Writes an [`ExtendedFullViewingKey`] as a Bech32-encoded string.
pub fn encode_extended_full_viewing_key(hrp: &str, extfvk: &ExtendedFullViewingKey) -> String {
    bech32_encode(hrp, |w| extfvk.write(w))
}

/// Decodes an [`ExtendedFullViewingKey`] from a Bech32-encoded string.
pub fn decode_extended_full_viewing_key(
    hrp: &str,
    s: &str,
) -> Result<ExtendedFullViewingKey, DecodeError> {
    bech32_decode(hrp, s, |data| ExtendedFullViewingKey::read(&data[..]).ok())
}

/// Writes a [`PaymentAddress`] as a Bech32-encoded string.
pub fn encode_payment_address(hrp: &str, addr: &PaymentAddress) -> String {
    bech32_encode(hrp, |w| w.write_all(&addr.to_bytes()))
}

/// Decodes a [`PaymentAddress`] from a Bech32-encoded string.
pub fn decode_payment_address(hrp: &str, s: &str) -> Result<PaymentAddress, DecodeError> {
    bech32_decode(hrp, s, |data| {
        if data.len() != 43 {
            return None;
        }

        let mut bytes = [0; 43];
        bytes.copy_from_slice(&data);
        PaymentAddress::from_bytes(&bytes)
    })
}

/// Writes a [`TransparentAddress`] as a Base58Check-encoded string.
pub fn encode_transparent_address(
    pubkey_version: &[u8],
    script_version: &[u8],
    addr: &TransparentAddress,
) -> String {
    let (version, hash) = match addr {
        TransparentAddress::PublicKey(key_id) => (pubkey_version, key_id),
        TransparentAddress::Script(script_id) => (script_version, script_id),
    };
    let mut decoded = Vec::with_capacity(version.len() + 20);
    decoded.extend_from_slice(version);
    decoded.extend_from_slice(hash);
    bs58::encode(decoded).with_check().into_string()
}

/// Decodes a [`TransparentAddress`] from a Base58Check-encoded string.
///
/// Returns `Ok(None)` when the string is valid Base58Check but carries neither of the
/// given version prefixes.
pub fn decode_transparent_address(
    pubkey_version: &[u8],
    script_version: &[u8],
    s: &str,
) -> Result<Option<TransparentAddress>, Bs58Error> {
    bs58::decode(s).with_check(None).into_vec().map(|decoded| {
        if decoded.starts_with(pubkey_version) {
            decoded[pubkey_version.len()..]
                .try_into()
                .ok()
                .map(TransparentAddress::PublicKey)
        } else if decoded.starts_with(script_version) {
            decoded[script_version.len()..]
                .try_into()
                .ok()
                .map(TransparentAddress::Script)
        } else {
            None
        }
    })
}

/// A payment destination: either a transparent address or a shielded payment address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Destination {
    Transparent(TransparentAddress),
    Shielded(PaymentAddress),
}

impl Destination {
    /// Decodes a destination from its string form.
    ///
    /// Strings carrying the network's Sapling payment address prefix are decoded as
    /// Bech32 shielded addresses; everything else is decoded as Base58Check.
    pub fn decode<P: Parameters>(params: &P, s: &str) -> Result<Self, DecodeError> {
        let hrp = params.hrp_sapling_payment_address();
        let is_bech32 = s
            .to_ascii_lowercase()
            .strip_prefix(hrp)
            .map_or(false, |rest| rest.starts_with('1'));

        if is_bech32 {
            decode_payment_address(hrp, s).map(Destination::Shielded)
        } else {
            decode_transparent_address(
                &params.b58_pubkey_address_prefix(),
                &params.b58_script_address_prefix(),
                s,
            )?
            .map(Destination::Transparent)
            .ok_or_else(|| DecodeError::UnsupportedAddressType(s.to_string()))
        }
    }

    /// Encodes this destination for the given network.
    pub fn encode<P: Parameters>(&self, params: &P) -> String {
        match self {
            Destination::Transparent(addr) => encode_transparent_address(
                &params.b58_pubkey_address_prefix(),
                &params.b58_script_address_prefix(),
                addr,
            ),
            Destination::Shielded(addr) => {
                encode_payment_address(params.hrp_sapling_payment_address(), addr)
            }
        }
    }

    pub fn is_shielded(&self) -> bool {
        matches!(self, Destination::Shielded(_))
    }
}

impl From<PaymentAddress> for Destination {
    fn from(addr: PaymentAddress) -> Self {
        Destination::Shielded(addr)
    }
}

impl From<TransparentAddress> for Destination {
    fn from(addr: TransparentAddress) -> Self {
        Destination::Transparent(addr)
    }
}

#[cfg(test)]
mod tests {
    use pivx_primitives::{
        consensus::{MainNetwork, Parameters, TestNetwork},
        constants,
        legacy::TransparentAddress,
        zip32::{ExtendedFullViewingKey, ExtendedSpendingKey},
    };

    use super::{
        decode_extended_full_viewing_key, decode_extended_spending_key, decode_payment_address,
        decode_transparent_address, encode_extended_full_viewing_key,
        encode_extended_spending_key, encode_payment_address, encode_transparent_address,
        DecodeError, Destination,
    };

    #[test]
    fn extended_spending_key() {
        let extsk = ExtendedSpendingKey::master(&[0; 32][..]);
        let hrp = constants::mainnet::HRP_SAPLING_EXTENDED_SPENDING_KEY;

        let encoded = encode_extended_spending_key(hrp, &extsk);
        assert!(encoded.starts_with(hrp));
        assert_eq!(decode_extended_spending_key(hrp, &encoded).unwrap(), extsk);

        assert_matches!(
            decode_extended_spending_key(
                constants::testnet::HRP_SAPLING_EXTENDED_SPENDING_KEY,
                &encoded
            ),
            Err(DecodeError::HrpMismatch { .. })
        );
    }

    #[test]
    fn extended_full_viewing_key() {
        let extfvk = ExtendedFullViewingKey::from(&ExtendedSpendingKey::master(&[1; 32][..]));
        let hrp = constants::testnet::HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY;

        let encoded = encode_extended_full_viewing_key(hrp, &extfvk);
        assert_eq!(
            decode_extended_full_viewing_key(hrp, &encoded).unwrap(),
            extfvk
        );
    }

    #[test]
    fn payment_address() {
        let (_, addr) = ExtendedSpendingKey::master(&[2; 32][..]).default_address();
        let hrp = constants::mainnet::HRP_SAPLING_PAYMENT_ADDRESS;

        let encoded = encode_payment_address(hrp, &addr);
        assert_eq!(decode_payment_address(hrp, &encoded).unwrap(), addr);

        // Flipping a character breaks the checksum.
        let mut corrupted = encoded.into_bytes();
        let last = corrupted.len() - 1;
        corrupted[last] = if corrupted[last] == b'q' { b'p' } else { b'q' };
        let corrupted = String::from_utf8(corrupted).unwrap();
        assert_matches!(
            decode_payment_address(hrp, &corrupted),
            Err(DecodeError::Bech32Error(_))
        );
    }

    #[test]
    fn transparent_address() {
        let pubkey = constants::mainnet::B58_PUBKEY_ADDRESS_PREFIX;
        let script = constants::mainnet::B58_SCRIPT_ADDRESS_PREFIX;

        for addr in [
            TransparentAddress::PublicKey([7; 20]),
            TransparentAddress::Script([9; 20]),
        ] {
            let encoded = encode_transparent_address(&pubkey, &script, &addr);
            assert_eq!(
                decode_transparent_address(&pubkey, &script, &encoded),
                Ok(Some(addr))
            );
        }

        // Valid Base58Check carrying an unknown version byte.
        let other = bs58::encode([[0xee].as_slice(), &[0; 20]].concat())
            .with_check()
            .into_string();
        assert_eq!(decode_transparent_address(&pubkey, &script, &other), Ok(None));
    }

    #[test]
    fn destination_by_prefix() {
        let params = MainNetwork;
        let (_, addr) = ExtendedSpendingKey::master(&[3; 32][..]).default_address();

        let shielded = Destination::Shielded(addr);
        assert_eq!(
            Destination::decode(&params, &shielded.encode(&params)),
            Ok(shielded)
        );

        let transparent = Destination::Transparent(TransparentAddress::PublicKey([4; 20]));
        assert_eq!(
            Destination::decode(&params, &transparent.encode(&params)),
            Ok(transparent)
        );

        // Encoded for another network.
        assert_matches!(
            Destination::decode(&TestNetwork, &transparent.encode(&params)),
            Err(DecodeError::UnsupportedAddressType(_))
        );
        assert_matches!(
            Destination::decode(&params, "not an address"),
            Err(DecodeError::Base58(_))
        );
        assert!(TestNetwork.hrp_sapling_payment_address() != params.hrp_sapling_payment_address());
    }
}
