//! *The shielded-pool wallet engine of a PIVX node.*
//!
//! `pivx_wallet` discovers Sapling notes addressed to the wallet, keeps the witnesses
//! needed to spend them in step with the chain tip, tracks nullifiers to detect spends
//! and conflicts, aggregates balances, and assembles outgoing shielded transactions.
//!
//! The node supplies its collaborators explicitly: a [`chain::ChainOracle`] for block
//! data, a [`storage::KeyValueStore`] for durable state, a [`chain::CoinSource`] for
//! transparent coins and a [`chain::Relay`] for broadcasting. All wallet state lives in
//! a [`wallet::Wallet`] value that the caller owns and serializes access to.

// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]
// Temporary until we have addressed all Result<T, ()> cases.
#![allow(clippy::result_unit_err)]

pub mod balance;
pub mod chain;
pub mod config;
pub mod encoding;
pub mod error;
pub mod keys;
pub mod nullifiers;
pub mod operation;
pub mod scan;
pub mod storage;
pub mod wallet;
pub mod witness;

#[cfg(any(test, feature = "test-dependencies"))]
pub mod testing;

pub use error::Error;
pub use wallet::Wallet;

#[cfg(test)]
#[macro_use]
extern crate assert_matches;
