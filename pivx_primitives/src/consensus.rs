//! Consensus parameters.

use std::cmp::{Ord, Ordering};
use std::convert::TryFrom;
use std::fmt;
use std::ops::{Add, Sub};

use memuse::DynamicUsage;

use crate::constants;

/// A wrapper type representing blockchain heights. Safe conversion from
/// various integer types, as well as addition and subtraction, are provided.
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BlockHeight(u32);

memuse::impl_no_dynamic_usage!(BlockHeight);

pub const H0: BlockHeight = BlockHeight(0);

/// The maximum depth of a chain reorganization the node will follow.
///
/// Cached witness histories are sized so that any reorg up to this depth can be
/// undone without rescanning.
pub const MAX_REORG_DEPTH: u32 = 100;

impl BlockHeight {
    pub const fn from_u32(v: u32) -> BlockHeight {
        BlockHeight(v)
    }

    /// Subtracts the provided value from this height, returning `H0` if this would result in
    /// underflow of the wrapped `u32`.
    pub fn saturating_sub(self, v: u32) -> BlockHeight {
        BlockHeight(self.0.saturating_sub(v))
    }
}

impl fmt::Display for BlockHeight {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(formatter)
    }
}

impl Ord for BlockHeight {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl PartialOrd for BlockHeight {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl From<u32> for BlockHeight {
    fn from(value: u32) -> Self {
        BlockHeight(value)
    }
}

impl TryFrom<i32> for BlockHeight {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        u32::try_from(value).map(BlockHeight)
    }
}

impl TryFrom<i64> for BlockHeight {
    type Error = std::num::TryFromIntError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        u32::try_from(value).map(BlockHeight)
    }
}

impl From<BlockHeight> for u32 {
    fn from(value: BlockHeight) -> u32 {
        value.0
    }
}

impl From<BlockHeight> for i64 {
    fn from(value: BlockHeight) -> i64 {
        value.0 as i64
    }
}

impl Add<u32> for BlockHeight {
    type Output = Self;

    fn add(self, other: u32) -> Self {
        BlockHeight(self.0 + other)
    }
}

impl Sub<u32> for BlockHeight {
    type Output = Self;

    fn sub(self, other: u32) -> Self {
        if other > self.0 {
            panic!("Subtraction resulted in negative block height.");
        }

        BlockHeight(self.0 - other)
    }
}

impl Sub for BlockHeight {
    type Output = u32;

    fn sub(self, other: Self) -> u32 {
        self.0 - other.0
    }
}

/// An event that occurs at a specified height on the chain, after which the consensus
/// rules change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NetworkUpgrade {
    /// The v4.0 upgrade (new stake modifier, BIP65 activation).
    V4_0,
    /// The v5.0 upgrade, which introduces the Sapling-style shielded pool.
    V5_0,
    /// The v5.2 upgrade (cold-staking P2CS contracts on shielded transactions).
    V5_2,
    /// The v5.3 upgrade (shielded fee policy update).
    V5_3,
}

memuse::impl_no_dynamic_usage!(NetworkUpgrade);

impl fmt::Display for NetworkUpgrade {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NetworkUpgrade::V4_0 => write!(f, "v4.0"),
            NetworkUpgrade::V5_0 => write!(f, "v5.0"),
            NetworkUpgrade::V5_2 => write!(f, "v5.2"),
            NetworkUpgrade::V5_3 => write!(f, "v5.3"),
        }
    }
}

/// The enumeration of known network upgrades, in activation order.
pub const UPGRADES_IN_ORDER: &[NetworkUpgrade] = &[
    NetworkUpgrade::V4_0,
    NetworkUpgrade::V5_0,
    NetworkUpgrade::V5_2,
    NetworkUpgrade::V5_3,
];

/// PIVX consensus parameters.
pub trait Parameters: Clone {
    /// Returns the activation height for a particular network upgrade,
    /// if an activation height has been set.
    fn activation_height(&self, nu: NetworkUpgrade) -> Option<BlockHeight>;

    /// Returns the ZIP 32 coin type used in shielded key derivation paths.
    fn coin_type(&self) -> u32;

    /// Returns the human-readable prefix for Bech32-encoded Sapling extended spending
    /// keys for the network to which this Parameters value applies.
    fn hrp_sapling_extended_spending_key(&self) -> &str;

    /// Returns the human-readable prefix for Bech32-encoded Sapling extended full
    /// viewing keys for the network to which this Parameters value applies.
    fn hrp_sapling_extended_full_viewing_key(&self) -> &str;

    /// Returns the Bech32-encoded human-readable prefix for Sapling payment addresses
    /// viewing keys for the network to which this Parameters value applies.
    fn hrp_sapling_payment_address(&self) -> &str;

    /// Returns the human-readable prefix for Base58Check-encoded transparent
    /// pay-to-public-key-hash payment addresses for the network to which this Parameters value
    /// applies.
    fn b58_pubkey_address_prefix(&self) -> [u8; 1];

    /// Returns the human-readable prefix for Base58Check-encoded transparent pay-to-script-hash
    /// payment addresses for the network to which this Parameters value applies.
    fn b58_script_address_prefix(&self) -> [u8; 1];

    /// Returns the human-readable prefix for Base58Check-encoded cold-staking
    /// addresses for the network to which this Parameters value applies.
    fn b58_staking_address_prefix(&self) -> [u8; 1];

    /// Determines whether the specified network upgrade is active as of the
    /// provided block height on the network to which this Parameters value applies.
    fn is_nu_active(&self, nu: NetworkUpgrade, height: BlockHeight) -> bool {
        self.activation_height(nu).map_or(false, |h| h <= height)
    }
}

/// Marker struct for the production network.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct MainNetwork;

memuse::impl_no_dynamic_usage!(MainNetwork);

pub const MAIN_NETWORK: MainNetwork = MainNetwork;

impl Parameters for MainNetwork {
    fn activation_height(&self, nu: NetworkUpgrade) -> Option<BlockHeight> {
        match nu {
            NetworkUpgrade::V4_0 => Some(BlockHeight(2_153_200)),
            NetworkUpgrade::V5_0 => Some(BlockHeight(2_700_500)),
            NetworkUpgrade::V5_2 => Some(BlockHeight(2_927_000)),
            NetworkUpgrade::V5_3 => Some(BlockHeight(3_014_000)),
        }
    }

    fn coin_type(&self) -> u32 {
        constants::mainnet::COIN_TYPE
    }

    fn hrp_sapling_extended_spending_key(&self) -> &str {
        constants::mainnet::HRP_SAPLING_EXTENDED_SPENDING_KEY
    }

    fn hrp_sapling_extended_full_viewing_key(&self) -> &str {
        constants::mainnet::HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY
    }

    fn hrp_sapling_payment_address(&self) -> &str {
        constants::mainnet::HRP_SAPLING_PAYMENT_ADDRESS
    }

    fn b58_pubkey_address_prefix(&self) -> [u8; 1] {
        constants::mainnet::B58_PUBKEY_ADDRESS_PREFIX
    }

    fn b58_script_address_prefix(&self) -> [u8; 1] {
        constants::mainnet::B58_SCRIPT_ADDRESS_PREFIX
    }

    fn b58_staking_address_prefix(&self) -> [u8; 1] {
        constants::mainnet::B58_STAKING_ADDRESS_PREFIX
    }
}

/// Marker struct for the test network.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub struct TestNetwork;

memuse::impl_no_dynamic_usage!(TestNetwork);

pub const TEST_NETWORK: TestNetwork = TestNetwork;

impl Parameters for TestNetwork {
    fn activation_height(&self, nu: NetworkUpgrade) -> Option<BlockHeight> {
        match nu {
            NetworkUpgrade::V4_0 => Some(BlockHeight(201)),
            NetworkUpgrade::V5_0 => Some(BlockHeight(201)),
            NetworkUpgrade::V5_2 => Some(BlockHeight(262_525)),
            NetworkUpgrade::V5_3 => Some(BlockHeight(332_300)),
        }
    }

    fn coin_type(&self) -> u32 {
        constants::testnet::COIN_TYPE
    }

    fn hrp_sapling_extended_spending_key(&self) -> &str {
        constants::testnet::HRP_SAPLING_EXTENDED_SPENDING_KEY
    }

    fn hrp_sapling_extended_full_viewing_key(&self) -> &str {
        constants::testnet::HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY
    }

    fn hrp_sapling_payment_address(&self) -> &str {
        constants::testnet::HRP_SAPLING_PAYMENT_ADDRESS
    }

    fn b58_pubkey_address_prefix(&self) -> [u8; 1] {
        constants::testnet::B58_PUBKEY_ADDRESS_PREFIX
    }

    fn b58_script_address_prefix(&self) -> [u8; 1] {
        constants::testnet::B58_SCRIPT_ADDRESS_PREFIX
    }

    fn b58_staking_address_prefix(&self) -> [u8; 1] {
        constants::testnet::B58_STAKING_ADDRESS_PREFIX
    }
}

/// A local network whose upgrade activation heights are chosen by the caller.
///
/// Addresses and keys use the regtest encodings.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LocalNetwork {
    pub v4_0: Option<BlockHeight>,
    pub v5_0: Option<BlockHeight>,
    pub v5_2: Option<BlockHeight>,
    pub v5_3: Option<BlockHeight>,
}

memuse::impl_no_dynamic_usage!(LocalNetwork);

impl LocalNetwork {
    /// A local network on which every known upgrade is active from the given height.
    pub fn all_active_from(height: BlockHeight) -> Self {
        LocalNetwork {
            v4_0: Some(height),
            v5_0: Some(height),
            v5_2: Some(height),
            v5_3: Some(height),
        }
    }
}

impl Parameters for LocalNetwork {
    fn activation_height(&self, nu: NetworkUpgrade) -> Option<BlockHeight> {
        match nu {
            NetworkUpgrade::V4_0 => self.v4_0,
            NetworkUpgrade::V5_0 => self.v5_0,
            NetworkUpgrade::V5_2 => self.v5_2,
            NetworkUpgrade::V5_3 => self.v5_3,
        }
    }

    fn coin_type(&self) -> u32 {
        constants::regtest::COIN_TYPE
    }

    fn hrp_sapling_extended_spending_key(&self) -> &str {
        constants::regtest::HRP_SAPLING_EXTENDED_SPENDING_KEY
    }

    fn hrp_sapling_extended_full_viewing_key(&self) -> &str {
        constants::regtest::HRP_SAPLING_EXTENDED_FULL_VIEWING_KEY
    }

    fn hrp_sapling_payment_address(&self) -> &str {
        constants::regtest::HRP_SAPLING_PAYMENT_ADDRESS
    }

    fn b58_pubkey_address_prefix(&self) -> [u8; 1] {
        constants::regtest::B58_PUBKEY_ADDRESS_PREFIX
    }

    fn b58_script_address_prefix(&self) -> [u8; 1] {
        constants::regtest::B58_SCRIPT_ADDRESS_PREFIX
    }

    fn b58_staking_address_prefix(&self) -> [u8; 1] {
        constants::regtest::B58_STAKING_ADDRESS_PREFIX
    }
}

/// Marker enum for the deployed networks.
#[derive(PartialEq, Eq, Copy, Clone, Debug)]
pub enum Network {
    MainNetwork,
    TestNetwork,
}

memuse::impl_no_dynamic_usage!(Network);

impl Parameters for Network {
    fn activation_height(&self, nu: NetworkUpgrade) -> Option<BlockHeight> {
        match self {
            Network::MainNetwork => MAIN_NETWORK.activation_height(nu),
            Network::TestNetwork => TEST_NETWORK.activation_height(nu),
        }
    }

    fn coin_type(&self) -> u32 {
        match self {
            Network::MainNetwork => MAIN_NETWORK.coin_type(),
            Network::TestNetwork => TEST_NETWORK.coin_type(),
        }
    }

    fn hrp_sapling_extended_spending_key(&self) -> &str {
        match self {
            Network::MainNetwork => MAIN_NETWORK.hrp_sapling_extended_spending_key(),
            Network::TestNetwork => TEST_NETWORK.hrp_sapling_extended_spending_key(),
        }
    }

    fn hrp_sapling_extended_full_viewing_key(&self) -> &str {
        match self {
            Network::MainNetwork => MAIN_NETWORK.hrp_sapling_extended_full_viewing_key(),
            Network::TestNetwork => TEST_NETWORK.hrp_sapling_extended_full_viewing_key(),
        }
    }

    fn hrp_sapling_payment_address(&self) -> &str {
        match self {
            Network::MainNetwork => MAIN_NETWORK.hrp_sapling_payment_address(),
            Network::TestNetwork => TEST_NETWORK.hrp_sapling_payment_address(),
        }
    }

    fn b58_pubkey_address_prefix(&self) -> [u8; 1] {
        match self {
            Network::MainNetwork => MAIN_NETWORK.b58_pubkey_address_prefix(),
            Network::TestNetwork => TEST_NETWORK.b58_pubkey_address_prefix(),
        }
    }

    fn b58_script_address_prefix(&self) -> [u8; 1] {
        match self {
            Network::MainNetwork => MAIN_NETWORK.b58_script_address_prefix(),
            Network::TestNetwork => TEST_NETWORK.b58_script_address_prefix(),
        }
    }

    fn b58_staking_address_prefix(&self) -> [u8; 1] {
        match self {
            Network::MainNetwork => MAIN_NETWORK.b58_staking_address_prefix(),
            Network::TestNetwork => TEST_NETWORK.b58_staking_address_prefix(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{
        BlockHeight, LocalNetwork, NetworkUpgrade, Parameters, MAIN_NETWORK, UPGRADES_IN_ORDER,
    };

    #[test]
    fn nu_ordering() {
        for i in 1..UPGRADES_IN_ORDER.len() {
            let nu_a = UPGRADES_IN_ORDER[i - 1];
            let nu_b = UPGRADES_IN_ORDER[i];
            match (
                MAIN_NETWORK.activation_height(nu_a),
                MAIN_NETWORK.activation_height(nu_b),
            ) {
                (Some(a), Some(b)) if a < b => (),
                (Some(_), None) => (),
                (None, None) => (),
                _ => panic!(
                    "{} should not be before {} in UPGRADES_IN_ORDER",
                    nu_a, nu_b
                ),
            }
        }
    }

    #[test]
    fn nu_is_active() {
        assert!(!MAIN_NETWORK.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(0)));
        assert!(!MAIN_NETWORK.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(2_700_499)));
        assert!(MAIN_NETWORK.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(2_700_500)));
    }

    #[test]
    fn local_network_without_shielding() {
        let params = LocalNetwork::default();
        assert!(!params.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(1_000_000)));

        let params = LocalNetwork::all_active_from(BlockHeight(10));
        assert!(!params.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(9)));
        assert!(params.is_nu_active(NetworkUpgrade::V5_0, BlockHeight(10)));
    }

    #[test]
    fn block_height_arithmetic() {
        assert_eq!(BlockHeight(10) + 2, BlockHeight(12));
        assert_eq!(BlockHeight(10) - BlockHeight(4), 6);
        assert_eq!(BlockHeight(3).saturating_sub(5), BlockHeight(0));
    }
}
