//! Constants for the PIVX main network.

/// The mainnet coin type for shielded key derivation.
///
/// Defined in [SLIP 44].
///
/// [SLIP 44]: https://github.com/satoshilabs/slips/blob/master/slip-0044.md
pub const COIN_TYPE: u32 = 119;

/// The HRP for a Bech32-encoded mainnet [`ExtendedSpendingKey`].
///
/// [`ExtendedSpendingKey`]: crate::zip32::ExtendedSpendingKey
pub const HRP_SAPLING_EXTENDED_SPENDING_KEY: &str = "p-secret-spending-key-main";

/// The HRP for a Bech32-encoded mainnet [`ExtendedFullViewingKey`].
///
/// [`ExtendedFullViewingKey`]: crate::zip32::ExtendedFullViewingKey
pub const HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY: &str = "pviews";

/// The HRP for a Bech32-encoded mainnet [`PaymentAddress`].
///
/// [`PaymentAddress`]: crate::sapling::PaymentAddress
pub const HRP_SAPLING_PAYMENT_ADDRESS: &str = "ps";

/// The prefix for a Base58Check-encoded mainnet [`TransparentAddress::PublicKey`].
///
/// [`TransparentAddress::PublicKey`]: crate::legacy::TransparentAddress::PublicKey
pub const B58_PUBKEY_ADDRESS_PREFIX: [u8; 1] = [30];

/// The prefix for a Base58Check-encoded mainnet [`TransparentAddress::Script`].
///
/// [`TransparentAddress::Script`]: crate::legacy::TransparentAddress::Script
pub const B58_SCRIPT_ADDRESS_PREFIX: [u8; 1] = [13];

/// The prefix for a Base58Check-encoded mainnet cold-staking address.
pub const B58_STAKING_ADDRESS_PREFIX: [u8; 1] = [63];
