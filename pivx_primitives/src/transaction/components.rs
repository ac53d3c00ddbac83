//! Structs representing the components within PIVX transactions.

pub mod amount;
pub mod sapling;
pub mod transparent;

pub use self::{
    amount::Amount,
    sapling::{OutputDescription, SaplingBundle, SpendDescription},
    transparent::{OutPoint, TxIn, TxOut},
};

// π_A + π_B + π_C
pub const GROTH_PROOF_SIZE: usize = 48 + 96 + 48;

/// Size of a RedJubjub signature.
pub const SIGNATURE_SIZE: usize = 64;
