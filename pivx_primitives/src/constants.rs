//! Various constants used by the PIVX shielded pool.

pub mod mainnet;
pub mod regtest;
pub mod testnet;

/// The ZIP 32 purpose constant for shielded key derivation.
pub const ZIP32_PURPOSE: u32 = 32;

/// BLAKE2b Personalization for the seed expansion function.
pub const PRF_EXPAND_PERSONALIZATION: &[u8; 16] = b"Zcash_ExpandSeed";

/// BLAKE2s Personalization for CRH^ivk = BLAKE2s(ak | nk)
pub const CRH_IVK_PERSONALIZATION: &[u8; 8] = b"Zcashivk";

/// BLAKE2s Personalization for PRF^nf = BLAKE2s(nk | rho)
pub const PRF_NF_PERSONALIZATION: &[u8; 8] = b"Zcash_nf";

/// BLAKE2b Personalization for the diversifier hash.
pub const GH_PERSONALIZATION: &[u8; 16] = b"PIVX_gd_DivHash_";

/// BLAKE2b Personalization for deriving the fixed key-agreement generators.
pub const GENERATOR_PERSONALIZATION: &[u8; 16] = b"PIVX_Generators_";

/// BLAKE2b Personalization for note commitments.
pub const NOTE_COMMITMENT_PERSONALIZATION: &[u8; 16] = b"PIVX_NoteCommit_";

/// BLAKE2b Personalization for value commitments.
pub const VALUE_COMMITMENT_PERSONALIZATION: &[u8; 16] = b"PIVX_ValueCommit";

/// BLAKE2b Personalization for the note commitment tree's internal nodes.
pub const MERKLE_HASH_PERSONALIZATION: &[u8; 15] = b"PIVX_MerkleHash";

/// The earliest timestamp a shielded key may claim as its creation time.
///
/// Used to bound rescans after importing a key with an unknown birthday.
pub const SAPLING_ACTIVATION_TIME_FLOOR: i64 = 154_051_200;
