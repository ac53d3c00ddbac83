//! Constants for the PIVX test network.

/// The testnet coin type for shielded key derivation.
///
/// The wallet derives shielded keys under the same coin type on every network.
pub const COIN_TYPE: u32 = 119;

/// The HRP for a Bech32-encoded testnet [`ExtendedSpendingKey`].
///
/// [`ExtendedSpendingKey`]: crate::zip32::ExtendedSpendingKey
pub const HRP_SAPLING_EXTENDED_SPENDING_KEY: &str = "p-secret-spending-key-test";

/// The HRP for a Bech32-encoded testnet [`ExtendedFullViewingKey`].
///
/// [`ExtendedFullViewingKey`]: crate::zip32::ExtendedFullViewingKey
pub const HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY: &str = "pviewtestsapling";

/// The HRP for a Bech32-encoded testnet [`PaymentAddress`].
///
/// [`PaymentAddress`]: crate::sapling::PaymentAddress
pub const HRP_SAPLING_PAYMENT_ADDRESS: &str = "ptestsapling";

/// The prefix for a Base58Check-encoded testnet [`TransparentAddress::PublicKey`].
///
/// [`TransparentAddress::PublicKey`]: crate::legacy::TransparentAddress::PublicKey
pub const B58_PUBKEY_ADDRESS_PREFIX: [u8; 1] = [139];

/// The prefix for a Base58Check-encoded testnet [`TransparentAddress::Script`].
///
/// [`TransparentAddress::Script`]: crate::legacy::TransparentAddress::Script
pub const B58_SCRIPT_ADDRESS_PREFIX: [u8; 1] = [19];

/// The prefix for a Base58Check-encoded testnet cold-staking address.
pub const B58_STAKING_ADDRESS_PREFIX: [u8; 1] = [73];
