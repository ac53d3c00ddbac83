//! Assembling, signing and sending shielded transactions.
//!
//! A [`SaplingOperation`] describes a payment: the recipients, where the funds come
//! from, and optionally the fee. [`SaplingOperation::build`] validates the request,
//! selects inputs, and searches for the smallest fee the resulting transaction
//! satisfies; [`SaplingOperation::send`] commits the finished transaction to the wallet
//! and hands it to the relay.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::str::FromStr;

use tracing::{debug, info, warn};

use pivx_primitives::{
    consensus::{NetworkUpgrade, Parameters, H0},
    legacy::TransparentAddress,
    memo::{Memo, MemoBytes},
    sapling::{keys::OutgoingViewingKey, prover::TxProver, Node, PaymentAddress},
    transaction::{
        builder::{self, Builder},
        components::{
            sapling::OUTPUT_DESCRIPTION_SIZE,
            transparent::{P2PKH_TXIN_SIZE, P2PKH_TXOUT_SIZE},
            Amount, OutPoint,
        },
        fees::{dust_threshold, shielded_dust_threshold},
        Transaction, TransactionData, TxId,
    },
};

use crate::{
    balance::NoteFilter,
    chain::{ChainOracle, CoinSource, Relay, RelayError},
    config::WalletConfig,
    encoding::Destination,
    error::Error,
    storage::KeyValueStore,
    wallet::Wallet,
};

/// Upper bound on fee estimation rounds before giving up.
const MAX_FEE_TRIES: usize = 100;

/// How many times the required fee an automatically chosen fee may reach.
const MAX_FEE_MULTIPLIER_SHIELDED: usize = 100;
const MAX_FEE_MULTIPLIER_TRANSPARENT: usize = 10_000;

/// An input chosen explicitly by the caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum InputRef {
    /// A transparent coin.
    Coin(OutPoint),
    /// A shielded wallet note.
    Note(OutPoint),
}

/// Where the funds of an operation come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FromSource {
    /// Coins or notes paying a single address.
    Address(Destination),
    /// Any spendable transparent coin.
    AnyTransparent { include_delegated: bool },
    /// Any spendable shielded note.
    AnyShielded,
    /// Exactly these inputs, all of which are spent.
    Selected(Vec<InputRef>),
}

impl FromSource {
    fn is_transparent(&self) -> bool {
        match self {
            FromSource::Address(dest) => !dest.is_shielded(),
            FromSource::AnyTransparent { .. } => true,
            FromSource::AnyShielded => false,
            FromSource::Selected(inputs) => inputs.iter().any(|i| matches!(i, InputRef::Coin(_))),
        }
    }

    fn is_shielded(&self) -> bool {
        match self {
            FromSource::Address(dest) => dest.is_shielded(),
            FromSource::AnyTransparent { .. } => false,
            FromSource::AnyShielded => true,
            FromSource::Selected(inputs) => inputs.iter().any(|i| matches!(i, InputRef::Note(_))),
        }
    }
}

/// A single payment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Recipient {
    pub destination: Destination,
    pub amount: Amount,
    /// Memo text for shielded recipients. An empty string means no memo.
    pub memo: Option<String>,
}

impl Recipient {
    pub fn transparent(to: TransparentAddress, amount: Amount) -> Self {
        Recipient {
            destination: Destination::Transparent(to),
            amount,
            memo: None,
        }
    }

    pub fn shielded(to: PaymentAddress, amount: Amount, memo: Option<String>) -> Self {
        Recipient {
            destination: Destination::Shielded(to),
            amount,
            memo,
        }
    }
}

/// Parses a memo given as text.
pub fn memo_from_string(memo: &str) -> Result<MemoBytes, Error> {
    Ok(Memo::from_str(memo)?.encode())
}

/// Checks that a transaction paying `recipients` stays below `max_size`, before any
/// input has been selected.
///
/// Every shielded recipient contributes an output description and every transparent
/// one a pay-to-pubkey-hash output. A transparent source adds one input and a change
/// output.
pub fn check_transaction_size(
    recipients: &[Recipient],
    from_transparent: bool,
    max_size: usize,
) -> Result<(), Error> {
    let shielded = recipients
        .iter()
        .filter(|r| r.destination.is_shielded())
        .count();
    let transparent = recipients.len() - shielded;

    let base = TransactionData::default()
        .freeze()
        .map(|tx| tx.serialized_size())
        .map_err(|e| builder::Error::Encoding(e.to_string()))?;
    let mut size = base
        + shielded * OUTPUT_DESCRIPTION_SIZE
        + transparent * P2PKH_TXOUT_SIZE
        // Value balance, binding signature and the growth of the output count prefix.
        + if shielded > 0 { 8 + 64 + 8 } else { 0 };
    if from_transparent {
        size += P2PKH_TXIN_SIZE + P2PKH_TXOUT_SIZE;
    }

    if size > max_size {
        Err(Error::TransactionTooLarge {
            size,
            max: max_size,
        })
    } else {
        Ok(())
    }
}

#[derive(Clone, Debug)]
enum Stage {
    Configured,
    Built { tx: Transaction, fee: Amount },
    Sent { tx: Transaction, fee: Amount },
}

/// A shielded payment, from request to broadcast.
#[derive(Clone, Debug)]
pub struct SaplingOperation {
    recipients: Vec<Recipient>,
    from: Option<FromSource>,
    fee: Option<Amount>,
    min_depth: u32,
    transparent_change: Option<TransparentAddress>,
    stage: Stage,
}

impl SaplingOperation {
    pub fn new(config: &WalletConfig, recipients: Vec<Recipient>) -> Self {
        SaplingOperation {
            recipients,
            from: None,
            fee: None,
            min_depth: config.default_min_depth,
            transparent_change: None,
            stage: Stage::Configured,
        }
    }

    pub fn with_source(mut self, from: FromSource) -> Self {
        self.from = Some(from);
        self
    }

    /// Fixes the fee instead of searching for the minimal one. A zero fee means the
    /// fee is searched for as usual.
    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = (fee != Amount::zero()).then(|| fee);
        self
    }

    pub fn with_min_depth(mut self, min_depth: u32) -> Self {
        self.min_depth = min_depth;
        self
    }

    /// Sends transparent change to `to` instead of a fresh change address.
    pub fn with_transparent_change(mut self, to: TransparentAddress) -> Self {
        self.transparent_change = Some(to);
        self
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// The finished transaction, once built.
    pub fn transaction(&self) -> Option<&Transaction> {
        match &self.stage {
            Stage::Configured => None,
            Stage::Built { tx, .. } | Stage::Sent { tx, .. } => Some(tx),
        }
    }

    /// The fee paid by the finished transaction, including any dust change.
    pub fn final_fee(&self) -> Option<Amount> {
        match &self.stage {
            Stage::Configured => None,
            Stage::Built { fee, .. } | Stage::Sent { fee, .. } => Some(*fee),
        }
    }

    pub fn is_sent(&self) -> bool {
        matches!(self.stage, Stage::Sent { .. })
    }

    fn validate<P: Parameters>(&self, params: &P) -> Result<(bool, Vec<MemoBytes>), Error> {
        let from = self.from.as_ref().ok_or(Error::MissingSource)?;
        let (from_transparent, from_shielded) = (from.is_transparent(), from.is_shielded());
        if from_transparent && from_shielded {
            return Err(Error::MixedSources);
        }
        if !from_transparent && !from_shielded {
            return Err(Error::MissingSource);
        }
        if self.recipients.is_empty() {
            return Err(Error::NoRecipients);
        }
        if from_shielded && self.min_depth == 0 {
            return Err(Error::MinDepthViolation);
        }

        let mut seen = BTreeSet::new();
        let mut memos = Vec::with_capacity(self.recipients.len());
        for recipient in &self.recipients {
            if !seen.insert(recipient.destination) {
                return Err(Error::DuplicateRecipient(recipient.destination.encode(params)));
            }
            if !recipient.amount.is_positive() {
                return Err(Error::InvalidAmount);
            }
            let memo = match (&recipient.memo, recipient.destination) {
                (Some(_), Destination::Transparent(_)) => {
                    return Err(Error::MemoNotAllowed(recipient.destination.encode(params)))
                }
                (Some(memo), Destination::Shielded(_)) => memo_from_string(memo)?,
                (None, _) => MemoBytes::empty(),
            };
            memos.push(memo);
        }

        Ok((from_transparent, memos))
    }

    /// Validates the operation, selects its inputs and builds the signed transaction.
    ///
    /// Unless a fee was given, the fee starts at the relay fee for one kilobyte and is
    /// raised to the fee required by each candidate transaction until a candidate pays
    /// enough.
    pub fn build<P, S, C, Co, Pr>(
        &mut self,
        wallet: &mut Wallet<P, S>,
        chain: &C,
        coins: &Co,
        prover: &Pr,
    ) -> Result<&Transaction, Error>
    where
        P: Parameters + Clone,
        S: KeyValueStore,
        C: ChainOracle,
        Co: CoinSource,
        Pr: TxProver,
    {
        let (from_transparent, memos) = self.validate(wallet.params())?;
        let config = wallet.config().clone();

        let target_height = chain.best_tip_height().map_or(H0, |tip| tip + 1);
        let any_shielded = !from_transparent
            || self.recipients.iter().any(|r| r.destination.is_shielded());
        if any_shielded && !chain.network_upgrade_active(NetworkUpgrade::V5_0, target_height) {
            return Err(Error::UpgradeNotActive(NetworkUpgrade::V5_0));
        }

        check_transaction_size(&self.recipients, from_transparent, config.max_tx_size)?;

        let total_out = self
            .recipients
            .iter()
            .map(|r| r.amount)
            .sum::<Option<Amount>>()
            .ok_or(Error::InvalidAmount)?;
        if let Some(fee) = self.fee {
            if fee > total_out {
                return Err(Error::FeeExceedsOutputs {
                    fee,
                    outputs: total_out,
                });
            }
        }

        if !from_transparent {
            // Spent notes are only recognized once their nullifiers are known.
            wallet.update_nullifier_note_map()?;
        }

        let mut fee = self.fee.unwrap_or(config.min_relay_fee_per_kb);
        let mut tries = 0;
        loop {
            let target = (total_out + fee).ok_or(Error::InvalidAmount)?;
            let mut builder = Builder::new(wallet.params().clone(), target_height, config.fee_rate());

            let ovk = if from_transparent {
                self.load_coins(&config, coins, &mut builder, target)?;
                wallet.common_ovk()?
            } else {
                self.load_notes(wallet, chain, &mut builder, target)?
            };

            for (recipient, memo) in self.recipients.iter().zip(memos.iter()) {
                match &recipient.destination {
                    Destination::Transparent(to) => {
                        builder.add_transparent_output(to, recipient.amount)?
                    }
                    Destination::Shielded(to) => {
                        builder.add_sapling_output(Some(ovk), *to, recipient.amount, memo.clone())?
                    }
                }
            }

            if from_transparent {
                let change = self
                    .transparent_change
                    .or_else(|| coins.change_address())
                    .ok_or(Error::NoChangeAddress)?;
                builder.send_change_to_transparent(change);
            }

            builder.set_fee(fee);
            let (estimate, _) = builder.build_for_fee_estimation(coins)?;
            let shielded_tx = estimate.has_sapling_data();
            let size = estimate.serialized_size();
            let required = config.required_fee(size, shielded_tx);

            if required <= fee {
                let multiplier = if shielded_tx {
                    MAX_FEE_MULTIPLIER_SHIELDED
                } else {
                    MAX_FEE_MULTIPLIER_TRANSPARENT
                };
                let max_fee = (required * multiplier).unwrap_or(required);
                if fee > max_fee {
                    return Err(Error::FeeTooHigh {
                        fee,
                        required: max_fee,
                    });
                }

                let (tx, paid) = builder.build(prover, coins)?;
                info!(
                    txid = %tx.txid(),
                    size,
                    fee = i64::from(paid),
                    "Built shielded transaction"
                );
                self.stage = Stage::Built { tx, fee: paid };
                break;
            }

            if self.fee.is_some() {
                return Err(Error::FeeTooLow { fee, required });
            }
            tries += 1;
            if tries > MAX_FEE_TRIES {
                return Err(Error::FeeEstimationFailed);
            }
            debug!(
                fee = i64::from(fee),
                required = i64::from(required),
                size,
                "Incrementing fee"
            );
            fee = required;
        }

        self.transaction().ok_or(Error::FeeEstimationFailed)
    }

    /// Selects notes covering `target` and adds them to `builder`, returning the
    /// outgoing viewing key of the first.
    fn load_notes<P, S, C, R>(
        &self,
        wallet: &Wallet<P, S>,
        chain: &C,
        builder: &mut Builder<P, R>,
        target: Amount,
    ) -> Result<OutgoingViewingKey, Error>
    where
        P: Parameters + Clone,
        S: KeyValueStore,
        C: ChainOracle,
        R: rand_core::RngCore + rand_core::CryptoRng,
    {
        let filter = match &self.from {
            Some(FromSource::Address(Destination::Shielded(addr))) => NoteFilter {
                min_depth: self.min_depth,
                ..NoteFilter::for_address(*addr)
            },
            _ => NoteFilter {
                min_depth: self.min_depth,
                ..Default::default()
            },
        };
        let mut candidates = wallet.list_notes(chain, &filter)?;
        let coin_control = match &self.from {
            Some(FromSource::Selected(inputs)) => {
                let selected: BTreeSet<OutPoint> = inputs
                    .iter()
                    .filter_map(|i| match i {
                        InputRef::Note(outpoint) => Some(*outpoint),
                        InputRef::Coin(_) => None,
                    })
                    .collect();
                candidates.retain(|n| selected.contains(&n.outpoint));
                true
            }
            _ => false,
        };

        if candidates.is_empty() {
            warn!(min_depth = self.min_depth, "No spendable shielded notes");
            return Err(Error::InsufficientFunds {
                available: Amount::zero(),
                required: target,
            });
        }
        candidates.sort_by_key(|n| Reverse(n.note.value));

        let dust = shielded_dust_threshold(&wallet.config().fee_rate());
        let mut total = Amount::zero();
        let mut selected = vec![];
        for entry in candidates {
            let value = Amount::from_u64(entry.note.value).map_err(|_| Error::InvalidAmount)?;
            total = (total + value).ok_or(Error::InvalidAmount)?;
            selected.push(entry);
            if !coin_control && total >= target {
                let change = (total - target).unwrap_or_else(Amount::zero);
                if change == Amount::zero() || change >= dust {
                    break;
                }
            }
        }
        if total < target {
            return Err(Error::InsufficientFunds {
                available: total,
                required: target,
            });
        }

        let outpoints: Vec<OutPoint> = selected.iter().map(|n| n.outpoint).collect();
        let (witnesses, anchor) = wallet.final_witnesses(&outpoints)?;
        let mut ovk = None;
        for (entry, witness) in selected.into_iter().zip(witnesses) {
            let witness = witness.ok_or(Error::NoteCacheCorrupt(entry.outpoint))?;
            let anchor: Node = anchor.ok_or(Error::NoteCacheCorrupt(entry.outpoint))?;
            let extsk = wallet
                .keys()
                .spending_key_for(&entry.address)?
                .ok_or(Error::InvalidSpendingKey)?;
            ovk.get_or_insert(extsk.expsk.ovk);
            debug!(outpoint = ?entry.outpoint, value = entry.note.value, "Spending note");
            builder.add_sapling_spend(
                extsk.expsk,
                *entry.address.diversifier(),
                entry.note,
                anchor,
                witness,
            )?;
        }

        ovk.ok_or(Error::InsufficientFunds {
            available: Amount::zero(),
            required: target,
        })
    }

    /// Selects transparent coins covering `target` and adds them to `builder`.
    fn load_coins<P, Co, R>(
        &self,
        config: &WalletConfig,
        coins: &Co,
        builder: &mut Builder<P, R>,
        target: Amount,
    ) -> Result<(), Error>
    where
        P: Parameters,
        Co: CoinSource,
        R: rand_core::RngCore + rand_core::CryptoRng,
    {
        let (mut candidates, coin_control) = match &self.from {
            Some(FromSource::Selected(inputs)) => (
                inputs
                    .iter()
                    .filter_map(|i| match i {
                        InputRef::Coin(outpoint) => coins.get_coin(outpoint),
                        InputRef::Note(_) => None,
                    })
                    .collect::<Vec<_>>(),
                true,
            ),
            Some(FromSource::Address(Destination::Transparent(addr))) => {
                (coins.available_coins(Some(addr), false, self.min_depth), false)
            }
            Some(FromSource::AnyTransparent { include_delegated }) => (
                coins.available_coins(None, *include_delegated, self.min_depth),
                false,
            ),
            _ => (vec![], false),
        };

        if candidates.is_empty() {
            warn!(min_depth = self.min_depth, "No spendable transparent coins");
            return Err(Error::InsufficientFunds {
                available: Amount::zero(),
                required: target,
            });
        }
        candidates.sort_by_key(|c| Reverse(c.value));

        let dust = dust_threshold(&config.fee_rate());
        let mut total = Amount::zero();
        let mut selected = vec![];
        for coin in candidates {
            total = (total + coin.value).ok_or(Error::InvalidAmount)?;
            selected.push(coin);
            if !coin_control && total >= target {
                let change = (total - target).unwrap_or_else(Amount::zero);
                if change == Amount::zero() || change >= dust {
                    break;
                }
            }
        }
        if total < target {
            return Err(Error::InsufficientFunds {
                available: total,
                required: target,
            });
        }
        let change = (total - target).unwrap_or_else(Amount::zero);
        if change > Amount::zero() && change < dust {
            // The change output would be dust.
            return Err(Error::InsufficientFunds {
                available: total,
                required: (target + dust).unwrap_or(target),
            });
        }

        for coin in selected {
            debug!(outpoint = ?coin.outpoint, value = i64::from(coin.value), "Spending coin");
            builder.add_transparent_input(coin.outpoint, coin.script_pubkey, coin.value)?;
        }
        Ok(())
    }

    /// Commits the built transaction to the wallet and broadcasts it.
    ///
    /// If the relay refuses it, the transaction is abandoned so that its inputs become
    /// spendable again.
    pub fn send<P, S, C, Re>(
        &mut self,
        wallet: &mut Wallet<P, S>,
        chain: &C,
        relay: &mut Re,
    ) -> Result<TxId, Error>
    where
        P: Parameters + Clone,
        S: KeyValueStore,
        C: ChainOracle,
        Re: Relay,
    {
        let (tx, fee) = match &self.stage {
            Stage::Built { tx, fee } => (tx.clone(), *fee),
            Stage::Configured => {
                return Err(Error::CommitFailed("transaction not built".to_string()))
            }
            Stage::Sent { tx, .. } => {
                return Err(Error::CommitFailed(format!(
                    "transaction {} already sent",
                    tx.txid()
                )))
            }
        };
        let txid = tx.txid();

        wallet.commit_transaction(chain, &tx)?;
        match relay.broadcast(&tx) {
            Ok(()) => {
                info!(%txid, "Broadcast transaction");
                self.stage = Stage::Sent { tx, fee };
                Ok(txid)
            }
            Err(e) => {
                warn!(%txid, error = %e, "Relay refused transaction");
                wallet.abandon_transaction(&txid)?;
                Err(match e {
                    RelayError::DoubleSpend => Error::DoubleSpendRejected(txid),
                    RelayError::Rejected(reason) => Error::CommitFailed(reason),
                })
            }
        }
    }

    pub fn build_and_send<P, S, C, Co, Pr, Re>(
        &mut self,
        wallet: &mut Wallet<P, S>,
        chain: &C,
        coins: &Co,
        prover: &Pr,
        relay: &mut Re,
    ) -> Result<TxId, Error>
    where
        P: Parameters + Clone,
        S: KeyValueStore,
        C: ChainOracle,
        Co: CoinSource,
        Pr: TxProver,
        Re: Relay,
    {
        self.build(wallet, chain, coins, prover)?;
        self.send(wallet, chain, relay)
    }
}
