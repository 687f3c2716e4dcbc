//! Client-side state and transaction engine for the token lottery program.
//!
//! The engine connects to a wallet, keeps a local view of the current round
//! consistent with the chain, and tracks ticket purchases from submission
//! to a terminal status. [`LotteryContext`] is the entry point.

use anchor_lang::prelude::*;

pub mod components;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod provider;
pub mod state;

mod program_error;
mod utils;

#[cfg(test)]
mod test_harness;

declare_id!("2RTh2Y4e2N421EbSnUYTKdGqDHJH7etxZb3VrWDMpNMY");

pub use components::{
    ApplyOutcome, ContractBinding, IntentStatus, PurchaseStatus, ReadCall, ReadOutput,
    RoundStateStore, StoreSnapshot, TicketIntent, TransactionManager, WriteCall,
};
pub use config::{ClientConfig, RetryPolicy, TxPolicy};
pub use context::LotteryContext;
pub use error::{
    BindingError, ClientError, ConnectionError, LotteryErrorCode, ProviderError, ReadFailure,
    TransactionError,
};
pub use events::{EventId, LotteryEvent};
pub use provider::{ProgramLogs, TxSignature, TxStatus, WalletProvider};
pub use state::{LotteryRound, Participant, Round, RoundStatus, WinnerRecord};
