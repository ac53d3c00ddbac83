//! *General PIVX shielded-pool primitives.*
//!
//! `pivx_primitives` is a library that provides the core structs and functions necessary
//! for working with the Sapling-style shielded pool of a PIVX-family chain: amounts,
//! network parameters, the transaction format, memos, keys, notes, note encryption and
//! the note commitment tree.
//!
//! The zero-knowledge circuits and signature schemes are not implemented here; they are
//! consumed through the [`sapling::prover::TxProver`] trait.

#![cfg_attr(docsrs, feature(doc_cfg))]
// Catch documentation errors caused by code changes.
#![deny(rustdoc::broken_intra_doc_links)]

#[macro_use]
extern crate lazy_static;

pub mod block;
pub mod consensus;
pub mod constants;
pub mod keys;
pub mod legacy;
pub mod memo;
pub mod merkle_tree;
pub mod sapling;
pub mod serialize;
pub mod transaction;
pub mod zip32;
