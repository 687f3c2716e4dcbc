use solana_program::{hash::Hash, pubkey::Pubkey};
use thiserror::Error;

pub use crate::program_error::LotteryErrorCode;

/// Errors reported by a [`crate::WalletProvider`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("user rejected the request")]
    UserRejected,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("provider disconnected")]
    Disconnected,
    #[error("rpc error: {0}")]
    Rpc(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("no wallet provider found")]
    NoProviderFound,
    #[error("user rejected the connection request")]
    UserRejected,
    #[error("provider error: {0}")]
    Provider(String),
}

impl From<ProviderError> for ConnectionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => ConnectionError::UserRejected,
            other => ConnectionError::Provider(other.to_string()),
        }
    }
}

/// A failed non-mutating call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadFailure {
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("account {0} not found")]
    AccountNotFound(Pubkey),
    #[error("failed to decode account: {0}")]
    Decode(String),
}

impl ReadFailure {
    /// Only transport failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReadFailure::Rpc(_))
    }
}

impl From<ProviderError> for ReadFailure {
    fn from(err: ProviderError) -> Self {
        ReadFailure::Rpc(err.to_string())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingError {
    #[error("invalid program address: {0}")]
    InvalidAddress(String),
    #[error("network mismatch: expected {expected}, provider is on {actual}")]
    NetworkMismatch { expected: Hash, actual: Hash },
    #[error(transparent)]
    Read(#[from] ReadFailure),
}

/// Per-intent failure. Never retried automatically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("user rejected the transaction")]
    UserRejected,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("transaction reverted (code {code:?})")]
    Reverted { code: Option<u32> },
    #[error("transaction was not confirmed in time")]
    Timeout,
    #[error("round rolled over before the purchase settled")]
    RoundExpired,
    #[error("a purchase for this account is already in flight")]
    DuplicatePurchase,
    #[error("no round loaded")]
    RoundUnavailable,
    #[error("round is not open")]
    RoundNotOpen,
    #[error("provider error: {0}")]
    Provider(String),
}

impl TransactionError {
    /// The program error behind a revert, if the code is known.
    pub fn program_error(&self) -> Option<LotteryErrorCode> {
        match self {
            TransactionError::Reverted { code: Some(code) } => LotteryErrorCode::from_code(*code),
            _ => None,
        }
    }
}

impl From<ProviderError> for TransactionError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::UserRejected => TransactionError::UserRejected,
            ProviderError::InsufficientFunds => TransactionError::InsufficientFunds,
            other => TransactionError::Provider(other.to_string()),
        }
    }
}

/// Errors surfaced by [`crate::LotteryContext`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClientError {
    #[error("wallet is not connected")]
    NotConnected,
    #[error("wallet account changed while connecting")]
    AccountChanged,
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    #[error(transparent)]
    Binding(#[from] BindingError),
    #[error(transparent)]
    Read(#[from] ReadFailure),
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}
