//! Abstractions over the proving and signing system.
//!
//! The zero-knowledge circuits and the RedJubjub signature scheme live outside this
//! crate. Everything the transaction builder needs from them goes through [`TxProver`].

use crate::{
    merkle_tree::MerklePath,
    sapling::{Diversifier, Node, PaymentAddress, ProofGenerationKey, Rseed},
    transaction::components::{Amount, GROTH_PROOF_SIZE, SIGNATURE_SIZE},
};

/// Interface for creating zero-knowledge proofs and signatures for shielded
/// transactions.
pub trait TxProver {
    /// Type for persisting any necessary context across multiple proofs.
    type SaplingProvingContext;

    /// Instantiate a new proving context.
    fn new_sapling_proving_context(&self) -> Self::SaplingProvingContext;

    /// Create the value commitment, re-randomized key, and proof for a
    /// [`SpendDescription`], while accumulating its value commitment randomness inside
    /// the context for later use.
    ///
    /// [`SpendDescription`]: crate::transaction::components::SpendDescription
    #[allow(clippy::too_many_arguments)]
    fn spend_proof(
        &self,
        ctx: &mut Self::SaplingProvingContext,
        proof_generation_key: ProofGenerationKey,
        diversifier: Diversifier,
        rseed: Rseed,
        ar: jubjub::Fr,
        value: u64,
        anchor: Node,
        merkle_path: MerklePath<Node>,
    ) -> Result<([u8; GROTH_PROOF_SIZE], [u8; 32], [u8; 32]), ()>;

    /// Create the value commitment and proof for an [`OutputDescription`], while
    /// accumulating its value commitment randomness inside the context for later use.
    ///
    /// [`OutputDescription`]: crate::transaction::components::OutputDescription
    fn output_proof(
        &self,
        ctx: &mut Self::SaplingProvingContext,
        esk: jubjub::Fr,
        payment_address: PaymentAddress,
        rcm: jubjub::Fr,
        value: u64,
    ) -> ([u8; GROTH_PROOF_SIZE], [u8; 32]);

    /// Create the spend authorization signature for one spend, over the transaction's
    /// signature hash.
    fn spend_sig(
        &self,
        ask: jubjub::Fr,
        ar: jubjub::Fr,
        sighash: &[u8; 32],
    ) -> Result<[u8; SIGNATURE_SIZE], ()>;

    /// Create the `bindingSig` for a transaction. All calls to
    /// [`TxProver::spend_proof`] and [`TxProver::output_proof`] must be completed before
    /// calling this function.
    fn binding_sig(
        &self,
        ctx: &mut Self::SaplingProvingContext,
        value_balance: Amount,
        sighash: &[u8; 32],
    ) -> Result<[u8; SIGNATURE_SIZE], ()>;
}

#[cfg(any(test, feature = "test-dependencies"))]
pub mod mock {
    use ff::Field;
    use group::GroupEncoding;
    use rand_core::OsRng;

    use crate::{
        merkle_tree::MerklePath,
        sapling::{
            spec::{value_commitment, SPENDING_KEY_GENERATOR},
            Diversifier, Node, PaymentAddress, ProofGenerationKey, Rseed,
        },
        transaction::components::{Amount, GROTH_PROOF_SIZE, SIGNATURE_SIZE},
    };

    use super::TxProver;

    /// A prover that produces well-formed but meaningless proofs and signatures.
    ///
    /// Value commitments are real, so value balance bookkeeping can be checked, but
    /// nothing it produces would verify on a real network.
    pub struct MockTxProver;

    impl TxProver for MockTxProver {
        type SaplingProvingContext = ();

        fn new_sapling_proving_context(&self) -> Self::SaplingProvingContext {}

        fn spend_proof(
            &self,
            _ctx: &mut Self::SaplingProvingContext,
            proof_generation_key: ProofGenerationKey,
            _diversifier: Diversifier,
            _rseed: Rseed,
            ar: jubjub::Fr,
            value: u64,
            _anchor: Node,
            _merkle_path: MerklePath<Node>,
        ) -> Result<([u8; GROTH_PROOF_SIZE], [u8; 32], [u8; 32]), ()> {
            let cv = value_commitment(value as i64, &jubjub::Fr::random(OsRng));
            let rk = proof_generation_key.ak + *SPENDING_KEY_GENERATOR * ar;

            Ok(([0u8; GROTH_PROOF_SIZE], cv, rk.to_bytes()))
        }

        fn output_proof(
            &self,
            _ctx: &mut Self::SaplingProvingContext,
            _esk: jubjub::Fr,
            _payment_address: PaymentAddress,
            _rcm: jubjub::Fr,
            value: u64,
        ) -> ([u8; GROTH_PROOF_SIZE], [u8; 32]) {
            let cv = value_commitment(value as i64, &jubjub::Fr::random(OsRng));

            ([0u8; GROTH_PROOF_SIZE], cv)
        }

        fn spend_sig(
            &self,
            _ask: jubjub::Fr,
            _ar: jubjub::Fr,
            sighash: &[u8; 32],
        ) -> Result<[u8; SIGNATURE_SIZE], ()> {
            let mut sig = [0u8; SIGNATURE_SIZE];
            sig[..32].copy_from_slice(sighash);
            Ok(sig)
        }

        fn binding_sig(
            &self,
            _ctx: &mut Self::SaplingProvingContext,
            _value_balance: Amount,
            sighash: &[u8; 32],
        ) -> Result<[u8; SIGNATURE_SIZE], ()> {
            let mut sig = [0u8; SIGNATURE_SIZE];
            sig[32..].copy_from_slice(sighash);
            Ok(sig)
        }
    }
}
