//! Error types for problems that may arise while maintaining shielded wallet state or
//! creating transactions.

use std::error;
use std::fmt;

use pivx_primitives::{
    consensus::{BlockHeight, NetworkUpgrade},
    memo,
    sapling::Nullifier,
    transaction::{
        builder,
        components::{Amount, OutPoint},
        TxId,
    },
};

use crate::{encoding::DecodeError, storage, witness::InvariantViolation};

/// The primary error type of the wallet engine.
#[derive(Debug)]
pub enum Error {
    /// The selected inputs cannot cover the requested outputs and fee.
    InsufficientFunds { available: Amount, required: Amount },

    /// An address string could not be decoded for the wallet's network.
    InvalidAddress(DecodeError),

    /// The spending key for a selected input is not held by the wallet.
    InvalidSpendingKey,

    /// The same destination appears more than once among the recipients.
    DuplicateRecipient(String),

    /// A recipient amount is zero, negative, or out of range.
    InvalidAmount,

    /// A memo exceeds the 512-byte memo field.
    MemoTooLarge { len: usize },

    /// A memo could not be interpreted.
    InvalidMemo(memo::Error),

    /// A memo was attached to a transparent recipient.
    MemoNotAllowed(String),

    /// Shielded inputs were requested with a minimum depth of zero.
    MinDepthViolation,

    /// A shielded transaction was requested before the shielded pool activated.
    UpgradeNotActive(NetworkUpgrade),

    /// An explicit fee is below the fee required for the transaction's size.
    FeeTooLow { fee: Amount, required: Amount },

    /// The fee is unreasonably high compared with the required fee.
    FeeTooHigh { fee: Amount, required: Amount },

    /// An explicit fee exceeds the total value sent to recipients.
    FeeExceedsOutputs { fee: Amount, outputs: Amount },

    /// The fee loop did not converge; the caller should set a fee manually.
    FeeEstimationFailed,

    /// The transaction would exceed the maximum standard transaction size.
    TransactionTooLarge { size: usize, max: usize },

    /// No recipients were given.
    NoRecipients,

    /// No funding source was given.
    MissingSource,

    /// Transparent and shielded funding sources were mixed.
    MixedSources,

    /// A note selected for spending has no cached witness.
    NoteCacheCorrupt(OutPoint),

    /// No address is available to receive transparent change.
    NoChangeAddress,

    /// The operation requires spending-key material and the wallet is locked.
    WalletLocked,

    /// The operation requires the HD seed and the wallet has none.
    SeedNotFound,

    /// An HD chain already exists and replacing it was not requested.
    HdChainExists,

    /// A passphrase did not unlock the wallet.
    IncorrectPassphrase,

    /// The wallet keys are already encrypted.
    AlreadyEncrypted,

    /// A transaction recorded as mined spends a nullifier that another transaction in
    /// the active chain already spends.
    ConflictingSpend {
        txid: TxId,
        conflicts_with: TxId,
        nullifier: Nullifier,
    },

    /// The chain oracle could not supply data for the given height.
    ChainDataUnavailable(BlockHeight),

    /// The relay rejected the transaction because one of its nullifiers is already
    /// spent by a confirmed or relayed transaction.
    DoubleSpendRejected(TxId),

    /// The transaction could not be committed to the wallet or relayed.
    CommitFailed(String),

    /// The witness cache is inconsistent with the chain. A full rescan is required.
    InvariantViolation(InvariantViolation),

    /// An error occurred while building the transaction.
    Builder(builder::Error),

    /// An error occurred while reading or writing persistent wallet state.
    Storage(storage::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self {
            Error::InsufficientFunds {
                available,
                required,
            } => write!(
                f,
                "Insufficient funds, have {}, need {}",
                i64::from(*available),
                i64::from(*required)
            ),
            Error::InvalidAddress(e) => write!(f, "Invalid address: {}", e),
            Error::InvalidSpendingKey => write!(f, "Spending key for the selected input not found"),
            Error::DuplicateRecipient(addr) => {
                write!(f, "Invalid parameter, duplicated address: {}", addr)
            }
            Error::InvalidAmount => write!(f, "Invalid amount, must be positive"),
            Error::MemoTooLarge { len } => write!(
                f,
                "Memo size of {} bytes is too big, maximum allowed is {} bytes",
                len,
                memo::MEMO_SIZE
            ),
            Error::InvalidMemo(e) => write!(f, "Invalid memo: {}", e),
            Error::MemoNotAllowed(addr) => {
                write!(f, "Memo cannot be used with a transparent address: {}", addr)
            }
            Error::MinDepthViolation => {
                write!(f, "Minconf cannot be zero when sending from shielded address")
            }
            Error::UpgradeNotActive(nu) => write!(
                f,
                "Shielded transactions are not active before the {} upgrade",
                nu
            ),
            Error::FeeTooLow { fee, required } => write!(
                f,
                "Fee set ({}) too low. Must be at least {}",
                i64::from(*fee),
                i64::from(*required)
            ),
            Error::FeeTooHigh { fee, required } => write!(
                f,
                "The transaction fee is too high: {} > {}",
                i64::from(*fee),
                i64::from(*required)
            ),
            Error::FeeExceedsOutputs { fee, outputs } => write!(
                f,
                "Fee {} is greater than the sum of outputs {}",
                i64::from(*fee),
                i64::from(*outputs)
            ),
            Error::FeeEstimationFailed => {
                write!(f, "Unable to compute optimal fee. Set manually.")
            }
            Error::TransactionTooLarge { size, max } => write!(
                f,
                "Too many outputs, size of raw transaction would be {} (limit = {})",
                size, max
            ),
            Error::NoRecipients => write!(f, "No recipients"),
            Error::MissingSource => write!(f, "From address parameter missing"),
            Error::MixedSources => {
                write!(f, "From address type cannot be shielded and transparent")
            }
            Error::NoteCacheCorrupt(outpoint) => write!(
                f,
                "Note cache corrupt: missing witness for note {:?}",
                outpoint
            ),
            Error::NoChangeAddress => {
                write!(f, "Could not get an address to use as a change address")
            }
            Error::WalletLocked => write!(f, "Wallet is locked"),
            Error::SeedNotFound => write!(f, "HD seed not found"),
            Error::HdChainExists => write!(f, "An HD chain already exists"),
            Error::IncorrectPassphrase => write!(f, "The wallet passphrase entered was incorrect"),
            Error::AlreadyEncrypted => write!(f, "Wallet is already encrypted"),
            Error::ConflictingSpend {
                txid,
                conflicts_with,
                nullifier,
            } => write!(
                f,
                "Transaction {} spends nullifier {:?} already spent by {}",
                txid, nullifier, conflicts_with
            ),
            Error::ChainDataUnavailable(height) => {
                write!(f, "Chain data unavailable at height {}", height)
            }
            Error::DoubleSpendRejected(txid) => write!(
                f,
                "Transaction {} rejected: a conflicting spend is already known",
                txid
            ),
            Error::CommitFailed(reason) => write!(f, "Failed to commit transaction: {}", reason),
            Error::InvariantViolation(e) => write!(f, "{}", e),
            Error::Builder(e) => write!(f, "Failed to build transaction: {}", e),
            Error::Storage(e) => write!(f, "{}", e),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self {
            Error::InvalidAddress(e) => Some(e),
            Error::InvalidMemo(e) => Some(e),
            Error::InvariantViolation(e) => Some(e),
            Error::Builder(e) => Some(e),
            Error::Storage(e) => Some(e),
            _ => None,
        }
    }
}

impl From<DecodeError> for Error {
    fn from(e: DecodeError) -> Self {
        Error::InvalidAddress(e)
    }
}

impl From<InvariantViolation> for Error {
    fn from(e: InvariantViolation) -> Self {
        Error::InvariantViolation(e)
    }
}

impl From<builder::Error> for Error {
    fn from(e: builder::Error) -> Self {
        Error::Builder(e)
    }
}

impl From<storage::Error> for Error {
    fn from(e: storage::Error) -> Self {
        Error::Storage(e)
    }
}

impl From<memo::Error> for Error {
    fn from(e: memo::Error) -> Self {
        match e {
            memo::Error::TooLong(len) => Error::MemoTooLarge { len },
            e => Error::InvalidMemo(e),
        }
    }
}
