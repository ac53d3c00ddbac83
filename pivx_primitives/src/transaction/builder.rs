//! Structs for building transactions.

use std::error;
use std::fmt;

use ff::Field;
use group::GroupEncoding;
use rand::{rngs::OsRng, CryptoRng, RngCore};

use crate::{
    consensus::{self, BlockHeight, NetworkUpgrade},
    legacy::{Script, TransparentAddress},
    memo::MemoBytes,
    merkle_tree::IncrementalWitness,
    sapling::{
        note_encryption::{SaplingNoteEncryption, ENC_CIPHERTEXT_SIZE, OUT_CIPHERTEXT_SIZE},
        prover::TxProver,
        Diversifier, ExpandedSpendingKey, Node, Note, Nullifier, OutgoingViewingKey,
        PaymentAddress, Rseed,
    },
    transaction::{
        components::{
            amount::{Amount, BalanceError},
            OutPoint, OutputDescription, SaplingBundle, SpendDescription, TxIn, TxOut,
            GROTH_PROOF_SIZE, SIGNATURE_SIZE,
        },
        fees::{dust_threshold, shielded_dust_threshold, FeeRate},
        sighash::{signature_hash, SignableInput, SIGHASH_ALL},
        version, Transaction, TransactionData,
    },
};

/// Errors that can occur during transaction construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Sapling spends or outputs were added to a transaction targeting a height
    /// before the shielded pool activates.
    NotSaplingVersion,
    /// The anchor of a spend differs from the anchor of previously added spends.
    AnchorMismatch,
    InvalidAmount,
    InvalidAddress,
    /// [`Builder::set_fee`] was never called.
    FeeNotSet,
    NegativeFee,
    /// Inputs do not cover outputs plus fee.
    NegativeChange,
    /// There is change to return but no destination for it.
    NoChangeAddress,
    /// A spend's witness has no authentication path.
    InvalidSpend,
    SpendProof,
    SpendSig,
    BindingSig,
    /// A transparent input could not be signed.
    TransparentSign(usize),
    Balance(BalanceError),
    /// The assembled transaction could not be encoded.
    Encoding(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NotSaplingVersion => write!(
                f,
                "Cannot add shielded spends or outputs to a pre-Sapling transaction"
            ),
            Error::AnchorMismatch => {
                write!(f, "Anchor does not match previously-added Sapling spends")
            }
            Error::InvalidAmount => write!(f, "Invalid amount"),
            Error::InvalidAddress => write!(f, "Invalid address"),
            Error::FeeNotSet => write!(f, "Fee must be set before building"),
            Error::NegativeFee => write!(f, "Fee cannot be negative"),
            Error::NegativeChange => write!(f, "Change cannot be negative"),
            Error::NoChangeAddress => write!(f, "Could not determine change address"),
            Error::InvalidSpend => write!(f, "Spend is invalid"),
            Error::SpendProof => write!(f, "Spend proof failed"),
            Error::SpendSig => write!(f, "Failed to create spendAuthSig"),
            Error::BindingSig => write!(f, "Failed to create bindingSig"),
            Error::TransparentSign(n) => write!(f, "Failed to sign transparent input {}", n),
            Error::Balance(e) => write!(f, "Invalid amount {:?}", e),
            Error::Encoding(e) => write!(f, "Failed to encode transaction: {}", e),
        }
    }
}

impl error::Error for Error {}

impl From<BalanceError> for Error {
    fn from(e: BalanceError) -> Self {
        Error::Balance(e)
    }
}

/// Produces the `script_sig`s of transparent inputs.
///
/// Transparent key management lives outside this crate; the builder only knows the
/// script and value of each coin it spends.
pub trait TransparentSigner {
    /// Signs input `index` of `tx`, which spends a coin of `value` locked by
    /// `script_pubkey`.
    fn sign(
        &self,
        tx: &TransactionData,
        index: usize,
        script_pubkey: &Script,
        value: Amount,
    ) -> Result<Script, ()>;

    /// Returns a placeholder `script_sig` with the size of a real signature for
    /// `script_pubkey`, used when estimating fees.
    fn dummy_sign(&self, _script_pubkey: &Script) -> Result<Script, ()> {
        Ok(dummy_p2pkh_script_sig())
    }
}

/// A signer for transactions without transparent inputs.
pub struct NoTransparentInputs;

impl TransparentSigner for NoTransparentInputs {
    fn sign(&self, _: &TransactionData, _: usize, _: &Script, _: Amount) -> Result<Script, ()> {
        Err(())
    }
}

/// A pay-to-pubkey-hash `script_sig` of maximal size: a 72-byte DER signature push
/// followed by a 33-byte compressed public key push.
pub fn dummy_p2pkh_script_sig() -> Script {
    let mut script = Vec::with_capacity(107);
    script.push(72);
    script.extend_from_slice(&[0u8; 72]);
    script.push(33);
    script.extend_from_slice(&[0u8; 33]);
    Script(script)
}

struct SpendDescriptionInfo {
    expsk: ExpandedSpendingKey,
    diversifier: Diversifier,
    note: Note,
    alpha: jubjub::Fr,
    witness: IncrementalWitness<Node>,
}

#[derive(Clone)]
struct SaplingOutput {
    /// `None` represents the `ovk = ⊥` case.
    ovk: Option<OutgoingViewingKey>,
    to: PaymentAddress,
    note: Note,
    memo: MemoBytes,
}

impl SaplingOutput {
    fn new<R: RngCore>(
        rng: &mut R,
        ovk: Option<OutgoingViewingKey>,
        to: PaymentAddress,
        value: Amount,
        memo: MemoBytes,
    ) -> Result<Self, Error> {
        if value.is_negative() {
            return Err(Error::InvalidAmount);
        }
        let rseed = Rseed::BeforeZip212(jubjub::Fr::random(&mut *rng));
        let note = to
            .create_note(value.into(), rseed)
            .ok_or(Error::InvalidAddress)?;

        Ok(SaplingOutput { ovk, to, note, memo })
    }

    fn build<Pr: TxProver, R: RngCore + CryptoRng>(
        self,
        prover: &Pr,
        ctx: &mut Pr::SaplingProvingContext,
        rng: &mut R,
    ) -> OutputDescription {
        let mut encryptor =
            SaplingNoteEncryption::new(self.ovk, self.note.clone(), self.to, self.memo, rng);

        let (zkproof, cv) = prover.output_proof(
            ctx,
            *encryptor.esk(),
            self.to,
            self.note.rcm(),
            self.note.value,
        );

        let cmu = self.note.cmu();

        let enc_ciphertext = encryptor.encrypt_note_plaintext();
        let out_ciphertext = encryptor.encrypt_outgoing_plaintext(&cv, &cmu);

        OutputDescription {
            cv,
            cmu,
            ephemeral_key: encryptor.epk().to_bytes(),
            enc_ciphertext,
            out_ciphertext,
            zkproof,
        }
    }
}

struct TransparentInputInfo {
    script_pubkey: Script,
    value: Amount,
}

/// The parts of a transaction that are fixed once change has been resolved.
struct Resolved {
    outputs: Vec<SaplingOutput>,
    vout: Vec<TxOut>,
    value_balance: Amount,
}

/// Generates a [`Transaction`] from its inputs and outputs.
///
/// The builder can be built repeatedly: [`Builder::build_for_fee_estimation`] produces
/// a transaction of the final size with placeholder proofs and signatures, so that a
/// caller can adjust the fee with [`Builder::set_fee`] before calling
/// [`Builder::build`].
pub struct Builder<P, R> {
    params: P,
    rng: R,
    target_height: BlockHeight,
    relay_fee: FeeRate,
    version: u16,
    anchor: Option<Node>,
    value_balance: Amount,
    spends: Vec<SpendDescriptionInfo>,
    outputs: Vec<SaplingOutput>,
    vin: Vec<TxIn>,
    t_ins: Vec<TransparentInputInfo>,
    vout: Vec<TxOut>,
    sapling_change_addr: Option<(OutgoingViewingKey, PaymentAddress)>,
    t_change_addr: Option<TransparentAddress>,
    fee: Option<Amount>,
}

impl<P: consensus::Parameters> Builder<P, OsRng> {
    /// Creates a new `Builder` targeted for inclusion in the block with the given height,
    /// using the default OS random.
    pub fn new(params: P, target_height: BlockHeight, relay_fee: FeeRate) -> Self {
        Builder::new_with_rng(params, target_height, relay_fee, OsRng)
    }
}

impl<P: consensus::Parameters, R: RngCore + CryptoRng> Builder<P, R> {
    /// Creates a new `Builder` targeted for inclusion in the block with the given height
    /// and randomness source.
    ///
    /// The transaction version is the shielded one if the shielded pool is active at
    /// `target_height`, and the legacy one otherwise.
    pub fn new_with_rng(params: P, target_height: BlockHeight, relay_fee: FeeRate, rng: R) -> Self {
        let version = if params.is_nu_active(NetworkUpgrade::V5_0, target_height) {
            version::SAPLING
        } else {
            version::LEGACY
        };

        Builder {
            params,
            rng,
            target_height,
            relay_fee,
            version,
            anchor: None,
            value_balance: Amount::zero(),
            spends: vec![],
            outputs: vec![],
            vin: vec![],
            t_ins: vec![],
            vout: vec![],
            sapling_change_addr: None,
            t_change_addr: None,
            fee: None,
        }
    }

    /// Returns the network parameters that the builder has been configured for.
    pub fn params(&self) -> &P {
        &self.params
    }

    /// Returns the target height of the transaction under construction.
    pub fn target_height(&self) -> BlockHeight {
        self.target_height
    }

    /// Net value moved out of the shielded pool by the spends and outputs added so far.
    pub fn value_balance(&self) -> Amount {
        self.value_balance
    }

    pub fn fee(&self) -> Option<Amount> {
        self.fee
    }

    /// Adds a Sapling note to be spent in this transaction.
    ///
    /// Returns an error if `anchor` differs from the anchor of previously added spends.
    pub fn add_sapling_spend(
        &mut self,
        expsk: ExpandedSpendingKey,
        diversifier: Diversifier,
        note: Note,
        anchor: Node,
        witness: IncrementalWitness<Node>,
    ) -> Result<(), Error> {
        if self.version < version::SAPLING {
            return Err(Error::NotSaplingVersion);
        }

        // Consistency check: all anchors must equal the first one
        match self.anchor {
            Some(first) if first != anchor => return Err(Error::AnchorMismatch),
            Some(_) => (),
            None => self.anchor = Some(anchor),
        }

        let value = Amount::from_u64(note.value).map_err(|_| Error::InvalidAmount)?;
        self.value_balance = (self.value_balance + value).ok_or(BalanceError::Overflow)?;

        let alpha = jubjub::Fr::random(&mut self.rng);
        self.spends.push(SpendDescriptionInfo {
            expsk,
            diversifier,
            note,
            alpha,
            witness,
        });

        Ok(())
    }

    /// Adds a Sapling address to send funds to.
    pub fn add_sapling_output(
        &mut self,
        ovk: Option<OutgoingViewingKey>,
        to: PaymentAddress,
        value: Amount,
        memo: MemoBytes,
    ) -> Result<(), Error> {
        if self.version < version::SAPLING {
            return Err(Error::NotSaplingVersion);
        }

        let output = SaplingOutput::new(&mut self.rng, ovk, to, value, memo)?;
        self.value_balance = (self.value_balance - value).ok_or(BalanceError::Underflow)?;
        self.outputs.push(output);

        Ok(())
    }

    /// Adds a transparent coin to be spent in this transaction.
    pub fn add_transparent_input(
        &mut self,
        utxo: OutPoint,
        script_pubkey: Script,
        value: Amount,
    ) -> Result<(), Error> {
        if value.is_negative() {
            return Err(Error::InvalidAmount);
        }

        self.vin.push(TxIn::new(utxo));
        self.t_ins.push(TransparentInputInfo {
            script_pubkey,
            value,
        });

        Ok(())
    }

    /// Adds a transparent address to send funds to.
    pub fn add_transparent_output(
        &mut self,
        to: &TransparentAddress,
        value: Amount,
    ) -> Result<(), Error> {
        if value.is_negative() {
            return Err(Error::InvalidAmount);
        }

        self.vout.push(TxOut {
            value,
            script_pubkey: to.script(),
        });

        Ok(())
    }

    pub fn set_fee(&mut self, fee: Amount) {
        self.fee = Some(fee);
    }

    /// Sends change to the given shielded address, replacing any transparent change
    /// address.
    pub fn send_change_to_shielded(&mut self, ovk: OutgoingViewingKey, to: PaymentAddress) {
        self.sapling_change_addr = Some((ovk, to));
        self.t_change_addr = None;
    }

    /// Sends change to the given transparent address, replacing any shielded change
    /// address.
    pub fn send_change_to_transparent(&mut self, to: TransparentAddress) {
        self.t_change_addr = Some(to);
        self.sapling_change_addr = None;
    }

    /// Computes the change and decides where it goes.
    ///
    /// Change above the dust threshold is sent to the configured shielded change
    /// address, else the configured transparent one, else back to the address of the
    /// first spent note. Dust change is left to the fee.
    fn resolve(&mut self) -> Result<(Resolved, Amount), Error> {
        let mut fee = self.fee.ok_or(Error::FeeNotSet)?;
        if fee.is_negative() {
            return Err(Error::NegativeFee);
        }

        let t_in: Option<Amount> = self.t_ins.iter().map(|t| t.value).sum();
        let t_out: Option<Amount> = self.vout.iter().map(|o| o.value).sum();
        let change = ((self.value_balance - fee) + t_in.ok_or(BalanceError::Overflow)?
            - t_out.ok_or(BalanceError::Overflow)?)
        .ok_or(BalanceError::Underflow)?;
        if change.is_negative() {
            return Err(Error::NegativeChange);
        }

        let mut resolved = Resolved {
            outputs: self.outputs.clone(),
            vout: self.vout.clone(),
            value_balance: self.value_balance,
        };

        if change.is_positive() {
            let threshold = if self.spends.is_empty() && self.outputs.is_empty() {
                dust_threshold(&self.relay_fee)
            } else {
                shielded_dust_threshold(&self.relay_fee)
            };

            if change > threshold {
                let shielded_change = if let Some((ovk, to)) = &self.sapling_change_addr {
                    Some((*ovk, *to))
                } else if self.t_change_addr.is_some() {
                    None
                } else if let Some(spend) = self.spends.first() {
                    let to = PaymentAddress::from_parts(spend.diversifier, spend.note.pk_d)
                        .ok_or(Error::NoChangeAddress)?;
                    Some((spend.expsk.ovk, to))
                } else {
                    return Err(Error::NoChangeAddress);
                };

                match (shielded_change, &self.t_change_addr) {
                    (Some((ovk, to)), _) => {
                        if self.version < version::SAPLING {
                            return Err(Error::NotSaplingVersion);
                        }
                        resolved.outputs.push(SaplingOutput::new(
                            &mut self.rng,
                            Some(ovk),
                            to,
                            change,
                            MemoBytes::empty(),
                        )?);
                        resolved.value_balance = (resolved.value_balance - change)
                            .ok_or(BalanceError::Underflow)?;
                    }
                    (None, Some(taddr)) => resolved.vout.push(TxOut {
                        value: change,
                        script_pubkey: taddr.script(),
                    }),
                    (None, None) => return Err(Error::NoChangeAddress),
                }
            } else {
                fee = (fee + change).ok_or(BalanceError::Overflow)?;
            }
        }

        Ok((resolved, fee))
    }

    fn assemble(
        &self,
        vin: Vec<TxIn>,
        vout: Vec<TxOut>,
        sapling_bundle: Option<SaplingBundle>,
    ) -> TransactionData {
        TransactionData {
            version: self.version,
            vin,
            vout,
            sapling_bundle,
            ..Default::default()
        }
    }

    /// Builds a transaction of the final size, with placeholder proofs and
    /// signatures, for fee estimation. The result must never be broadcast.
    ///
    /// Returns the transaction together with the fee it pays, which may exceed the
    /// configured fee by dust change.
    pub fn build_for_fee_estimation(
        &mut self,
        signer: &impl TransparentSigner,
    ) -> Result<(Transaction, Amount), Error> {
        let (resolved, fee) = self.resolve()?;

        let sapling_bundle = if self.spends.is_empty() && resolved.outputs.is_empty() {
            None
        } else {
            Some(SaplingBundle {
                value_balance: resolved.value_balance,
                shielded_spends: self.spends.iter().map(|_| dummy_spend()).collect(),
                shielded_outputs: resolved.outputs.iter().map(|_| dummy_output()).collect(),
                binding_sig: Some([0xff; SIGNATURE_SIZE]),
            })
        };

        let vin = self
            .vin
            .iter()
            .zip(self.t_ins.iter())
            .enumerate()
            .map(|(i, (txin, t_in))| {
                let mut txin = txin.clone();
                txin.script_sig = signer
                    .dummy_sign(&t_in.script_pubkey)
                    .map_err(|_| Error::TransparentSign(i))?;
                Ok::<_, Error>(txin)
            })
            .collect::<Result<Vec<_>, Error>>()?;

        let tx = self
            .assemble(vin, resolved.vout, sapling_bundle)
            .freeze()
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok((tx, fee))
    }

    /// Builds a transaction from the configured spends and outputs, creating proofs
    /// and signatures with `prover` and `signer`.
    ///
    /// Returns the transaction together with the fee it pays.
    pub fn build<Pr: TxProver>(
        &mut self,
        prover: &Pr,
        signer: &impl TransparentSigner,
    ) -> Result<(Transaction, Amount), Error> {
        let (resolved, fee) = self.resolve()?;
        let has_shielded = !(self.spends.is_empty() && resolved.outputs.is_empty());

        let mut ctx = prover.new_sapling_proving_context();

        // Create Sapling OutputDescriptions
        let shielded_outputs: Vec<_> = resolved
            .outputs
            .into_iter()
            .map(|output| output.build(prover, &mut ctx, &mut self.rng))
            .collect();

        // Create Sapling SpendDescriptions
        let mut shielded_spends = Vec::with_capacity(self.spends.len());
        for spend in &self.spends {
            let merkle_path = spend.witness.path().ok_or(Error::InvalidSpend)?;
            let anchor = self.anchor.ok_or(Error::InvalidSpend)?;

            let proof_generation_key = spend.expsk.proof_generation_key();
            let nullifier: Nullifier = spend.note.nf(
                &proof_generation_key.to_viewing_key().nk,
                spend.witness.position(),
            );

            let (zkproof, cv, rk) = prover
                .spend_proof(
                    &mut ctx,
                    proof_generation_key,
                    spend.diversifier,
                    spend.note.rseed,
                    spend.alpha,
                    spend.note.value,
                    anchor,
                    merkle_path,
                )
                .map_err(|_| Error::SpendProof)?;

            shielded_spends.push(SpendDescription {
                cv,
                anchor,
                nullifier,
                rk,
                zkproof,
                spend_auth_sig: None,
            });
        }

        let sapling_bundle = if has_shielded {
            Some(SaplingBundle {
                value_balance: resolved.value_balance,
                shielded_spends,
                shielded_outputs,
                binding_sig: None,
            })
        } else {
            None
        };
        let mut mtx = self.assemble(self.vin.clone(), resolved.vout, sapling_bundle);

        //
        // Signatures -- everything but the signatures must already have been added.
        //
        let sighash = signature_hash(&mtx, SIGHASH_ALL, &SignableInput::Shielded);
        let sighash: [u8; 32] = sighash
            .as_bytes()
            .try_into()
            .expect("sighash is 32 bytes");

        if let Some(bundle) = mtx.sapling_bundle.as_mut() {
            for (spend, desc) in self.spends.iter().zip(bundle.shielded_spends.iter_mut()) {
                desc.spend_auth_sig = Some(
                    prover
                        .spend_sig(spend.expsk.ask, spend.alpha, &sighash)
                        .map_err(|_| Error::SpendSig)?,
                );
            }
            bundle.binding_sig = Some(
                prover
                    .binding_sig(&mut ctx, bundle.value_balance, &sighash)
                    .map_err(|_| Error::BindingSig)?,
            );
        }

        // Transparent signatures
        let unsigned = mtx.clone();
        for (i, (txin, t_in)) in mtx.vin.iter_mut().zip(self.t_ins.iter()).enumerate() {
            txin.script_sig = signer
                .sign(&unsigned, i, &t_in.script_pubkey, t_in.value)
                .map_err(|_| Error::TransparentSign(i))?;
        }

        let tx = mtx.freeze().map_err(|e| Error::Encoding(e.to_string()))?;
        Ok((tx, fee))
    }
}

fn dummy_spend() -> SpendDescription {
    SpendDescription {
        cv: [0xff; 32],
        anchor: Node::new([0xff; 32]),
        nullifier: Nullifier([0xff; 32]),
        rk: [0xff; 32],
        zkproof: [0xff; GROTH_PROOF_SIZE],
        spend_auth_sig: Some([0xff; SIGNATURE_SIZE]),
    }
}

fn dummy_output() -> OutputDescription {
    OutputDescription {
        cv: [0xff; 32],
        cmu: Node::new([0xff; 32]),
        ephemeral_key: [0xff; 32],
        enc_ciphertext: [0xff; ENC_CIPHERTEXT_SIZE],
        out_ciphertext: [0xff; OUT_CIPHERTEXT_SIZE],
        zkproof: [0xff; GROTH_PROOF_SIZE],
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ff::Field;
    use rand::rngs::OsRng;

    use super::{Builder, Error, NoTransparentInputs, TransparentSigner};
    use crate::{
        consensus::{BlockHeight, LocalNetwork},
        legacy::{Script, TransparentAddress},
        memo::MemoBytes,
        merkle_tree::{CommitmentTree, IncrementalWitness},
        sapling::{
            note_encryption::{try_sapling_note_decryption, try_sapling_output_recovery},
            prover::mock::MockTxProver,
            Node, Note, PaymentAddress, Rseed,
        },
        transaction::{
            components::{
                sapling::{OUTPUT_DESCRIPTION_SIZE, SPEND_DESCRIPTION_SIZE},
                transparent::{P2PKH_TXIN_SIZE, P2PKH_TXOUT_SIZE},
                Amount, OutPoint, TxOut,
            },
            fees::FeeRate,
            TransactionData, TxId,
        },
        zip32::ExtendedSpendingKey,
    };

    const COIN: u64 = 1_0000_0000;

    fn network() -> LocalNetwork {
        LocalNetwork::all_active_from(BlockHeight::from_u32(1))
    }

    fn builder() -> Builder<LocalNetwork, OsRng> {
        Builder::new(network(), BlockHeight::from_u32(10), FeeRate::default())
    }

    /// A note of `value` paying `extsk`, committed to a fresh tree.
    fn spendable_note(
        extsk: &ExtendedSpendingKey,
        value: u64,
    ) -> (PaymentAddress, Note, Node, IncrementalWitness<Node>) {
        let (_, addr) = extsk.default_address();
        let note = addr
            .create_note(value, Rseed::BeforeZip212(jubjub::Fr::ONE))
            .unwrap();
        let mut tree = CommitmentTree::empty();
        tree.append(note.cmu()).unwrap();
        let witness = IncrementalWitness::from_tree(&tree);
        (addr, note, witness.root(), witness)
    }

    struct FixedSigner;

    impl TransparentSigner for FixedSigner {
        fn sign(
            &self,
            _: &TransactionData,
            index: usize,
            _: &Script,
            _: Amount,
        ) -> Result<Script, ()> {
            Ok(Script(vec![index as u8; 3]))
        }
    }

    #[test]
    fn fails_on_negative_output() {
        let extsk = ExtendedSpendingKey::master(&[]);
        let (_, to) = extsk.default_address();

        let mut builder = builder();
        assert_eq!(
            builder.add_sapling_output(
                Some(extsk.expsk.ovk),
                to,
                Amount::from_i64(-1).unwrap(),
                MemoBytes::empty()
            ),
            Err(Error::InvalidAmount)
        );
    }

    #[test]
    fn fails_before_activation() {
        let extsk = ExtendedSpendingKey::master(&[]);
        let (_, to) = extsk.default_address();
        let params = LocalNetwork::all_active_from(BlockHeight::from_u32(100));

        let mut builder = Builder::new(params, BlockHeight::from_u32(10), FeeRate::default());
        assert_eq!(
            builder.add_sapling_output(None, to, Amount::from_u64(1).unwrap(), MemoBytes::empty()),
            Err(Error::NotSaplingVersion)
        );
    }

    #[test]
    fn fails_on_anchor_mismatch() {
        let extsk = ExtendedSpendingKey::master(&[1; 32]);
        let (addr, note1, anchor1, witness1) = spendable_note(&extsk, 5 * COIN);
        let (_, note2, _, witness2) = spendable_note(&extsk, 6 * COIN);

        let mut builder = builder();
        builder
            .add_sapling_spend(
                extsk.expsk.clone(),
                *addr.diversifier(),
                note1,
                anchor1,
                witness1,
            )
            .unwrap();
        assert_eq!(
            builder.add_sapling_spend(
                extsk.expsk.clone(),
                *addr.diversifier(),
                note2,
                Node::new([7; 32]),
                witness2,
            ),
            Err(Error::AnchorMismatch)
        );
    }

    #[test]
    fn fails_without_fee_or_funds() {
        let mut builder = builder();
        assert_matches!(
            builder.build_for_fee_estimation(&NoTransparentInputs),
            Err(Error::FeeNotSet)
        );

        builder.set_fee(Amount::from_i64(-1).unwrap());
        assert_matches!(
            builder.build(&MockTxProver, &NoTransparentInputs),
            Err(Error::NegativeFee)
        );

        builder.set_fee(Amount::from_u64(10_000).unwrap());
        assert_matches!(
            builder.build(&MockTxProver, &NoTransparentInputs),
            Err(Error::NegativeChange)
        );
    }

    #[test]
    fn change_to_first_spend_address() {
        let extsk = ExtendedSpendingKey::master(&[2; 32]);
        let ivk = extsk.expsk.proof_generation_key().to_viewing_key().ivk();
        let (addr, note, anchor, witness) = spendable_note(&extsk, 10 * COIN);
        let to = ExtendedSpendingKey::master(&[3; 32]).default_address().1;

        let mut builder = builder();
        builder
            .add_sapling_spend(extsk.expsk.clone(), *addr.diversifier(), note, anchor, witness)
            .unwrap();
        builder
            .add_sapling_output(
                Some(extsk.expsk.ovk),
                to,
                Amount::from_u64(4 * COIN).unwrap(),
                MemoBytes::empty(),
            )
            .unwrap();
        let fee = Amount::from_u64(COIN / 100).unwrap();
        builder.set_fee(fee);

        let (tx, paid) = builder.build(&MockTxProver, &NoTransparentInputs).unwrap();
        assert_eq!(paid, fee);
        assert_eq!(tx.shielded_spends().len(), 1);
        assert_eq!(tx.shielded_outputs().len(), 2);
        assert_eq!(tx.value_balance(), fee);

        // The change output is decryptable by the spender and recoverable with its ovk.
        let change = &tx.shielded_outputs()[1];
        let (change_note, change_addr, _) = try_sapling_note_decryption(
            &ivk,
            &change.ephemeral_key,
            &change.cmu,
            &change.enc_ciphertext,
        )
        .unwrap();
        assert_eq!(change_addr, addr);
        assert_eq!(change_note.value, 6 * COIN - COIN / 100);
        assert!(try_sapling_output_recovery(
            &extsk.expsk.ovk,
            &change.cv,
            &change.cmu,
            &change.ephemeral_key,
            &change.enc_ciphertext,
            &change.out_ciphertext,
        )
        .is_some());

        let binding_sig = tx.sapling_bundle.as_ref().unwrap().binding_sig;
        assert!(binding_sig.is_some());
        assert!(tx.shielded_spends()[0].spend_auth_sig.is_some());
    }

    #[test]
    fn dust_change_goes_to_fee() {
        let extsk = ExtendedSpendingKey::master(&[4; 32]);
        let (addr, note, anchor, witness) = spendable_note(&extsk, COIN);
        let to = ExtendedSpendingKey::master(&[5; 32]).default_address().1;

        let mut builder = builder();
        builder
            .add_sapling_spend(extsk.expsk.clone(), *addr.diversifier(), note, anchor, witness)
            .unwrap();
        builder
            .add_sapling_output(
                None,
                to,
                Amount::from_u64(COIN - 1_000_000).unwrap(),
                MemoBytes::empty(),
            )
            .unwrap();
        builder.set_fee(Amount::from_u64(100_000).unwrap());

        // 900_000 of change is below the shielded dust threshold.
        let (tx, paid) = builder.build(&MockTxProver, &NoTransparentInputs).unwrap();
        assert_eq!(paid, Amount::from_u64(1_000_000).unwrap());
        assert_eq!(tx.shielded_outputs().len(), 1);
    }

    #[test]
    fn transparent_only_needs_change_address() {
        let mut builder = builder();
        builder
            .add_transparent_input(
                OutPoint::new(TxId::from_bytes([1; 32]), 0),
                TransparentAddress::PublicKey([1; 20]).script(),
                Amount::from_u64(COIN).unwrap(),
            )
            .unwrap();
        builder
            .add_transparent_output(
                &TransparentAddress::PublicKey([2; 20]),
                Amount::from_u64(COIN / 2).unwrap(),
            )
            .unwrap();
        builder.set_fee(Amount::from_u64(10_000).unwrap());
        assert_matches!(
            builder.build(&MockTxProver, &FixedSigner),
            Err(Error::NoChangeAddress)
        );

        builder.send_change_to_transparent(TransparentAddress::PublicKey([3; 20]));
        let (tx, _) = builder.build(&MockTxProver, &FixedSigner).unwrap();
        assert!(tx.sapling_bundle.is_none());
        assert_eq!(tx.vout.len(), 2);
        assert_eq!(
            tx.vout[1],
            TxOut {
                value: Amount::from_u64(COIN / 2 - 10_000).unwrap(),
                script_pubkey: TransparentAddress::PublicKey([3; 20]).script(),
            }
        );
        assert_eq!(tx.vin[0].script_sig, Script(vec![0; 3]));
    }

    #[test]
    fn fee_estimation_matches_final_size() {
        let extsk = ExtendedSpendingKey::master(&[6; 32]);
        let (addr, note, anchor, witness) = spendable_note(&extsk, 10 * COIN);
        let to = ExtendedSpendingKey::master(&[7; 32]).default_address().1;

        let mut builder = builder();
        builder
            .add_sapling_spend(extsk.expsk.clone(), *addr.diversifier(), note, anchor, witness)
            .unwrap();
        builder
            .add_sapling_output(None, to, Amount::from_u64(COIN).unwrap(), MemoBytes::empty())
            .unwrap();
        builder
            .add_transparent_output(
                &TransparentAddress::PublicKey([9; 20]),
                Amount::from_u64(COIN).unwrap(),
            )
            .unwrap();
        builder.set_fee(Amount::from_u64(COIN / 10).unwrap());

        let (dummy, _) = builder.build_for_fee_estimation(&NoTransparentInputs).unwrap();
        let (real, _) = builder.build(&MockTxProver, &NoTransparentInputs).unwrap();
        assert_eq!(dummy.serialized_size(), real.serialized_size());

        // header + vin + vout + lock time + bundle
        let expected = 4
            + 1
            + 1
            + P2PKH_TXOUT_SIZE
            + 4
            + 1
            + 8
            + 1
            + SPEND_DESCRIPTION_SIZE
            + 1
            + 2 * OUTPUT_DESCRIPTION_SIZE
            + 64;
        assert_eq!(real.serialized_size(), expected);
    }

    #[test]
    fn dummy_transparent_input_size() {
        let mut builder = builder();
        builder
            .add_transparent_input(
                OutPoint::new(TxId::from_bytes([1; 32]), 0),
                TransparentAddress::PublicKey([1; 20]).script(),
                Amount::from_u64(COIN).unwrap(),
            )
            .unwrap();
        builder.set_fee(Amount::from_u64(COIN).unwrap());

        let (tx, _) = builder.build_for_fee_estimation(&FixedSigner).unwrap();
        // header + vin + vout + lock time + absent bundle
        assert_eq!(tx.serialized_size(), 4 + 1 + P2PKH_TXIN_SIZE + 1 + 4 + 1);
    }
}
