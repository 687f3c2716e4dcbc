//! Wallet provider seam.
//!
//! The engine never talks to a transport directly. An embedding application
//! implements [`WalletProvider`] over whatever it has at hand (an injected
//! browser wallet, an RPC + WebSocket client, a local keypair) and hands it to
//! [`crate::LotteryContext`].

use std::fmt;

use async_trait::async_trait;
use solana_program::{hash::Hash, instruction::Instruction, pubkey::Pubkey};
use tokio::sync::{broadcast, mpsc};

use crate::error::ProviderError;

/// Base58 transaction signature as reported by the provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxSignature(pub String);

impl fmt::Display for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TxSignature {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Event payloads emitted by one transaction of a program.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgramLogs {
    pub signature: TxSignature,
    pub program_id: Pubkey,
    pub slot: u64,
    /// Raw Anchor event payloads, in emission order.
    pub events: Vec<Vec<u8>>,
}

/// Provider-side view of a submitted transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TxStatus {
    /// Not yet confirmed.
    Processing,
    /// Landed successfully.
    Confirmed { slot: u64, events: Vec<Vec<u8>> },
    /// Landed and reverted. `custom_code` carries the program error, if any.
    Failed { custom_code: Option<u32> },
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    /// Asks the wallet for its accounts, prompting the user if needed.
    async fn request_accounts(&self) -> Result<Vec<Pubkey>, ProviderError>;

    /// Stream of active-account changes. `None` means the wallet disconnected.
    fn subscribe_accounts(&self) -> broadcast::Receiver<Option<Pubkey>>;

    /// Genesis hash of the cluster the wallet is connected to.
    async fn chain_id(&self) -> Result<Hash, ProviderError>;

    /// Raw data of an account, or `None` if it does not exist.
    async fn get_account_data(&self, address: &Pubkey) -> Result<Option<Vec<u8>>, ProviderError>;

    /// Signs and sends a transaction. Returns once the transaction has been
    /// handed to the cluster.
    async fn send_transaction(
        &self,
        instructions: Vec<Instruction>,
    ) -> Result<TxSignature, ProviderError>;

    async fn transaction_status(&self, signature: &TxSignature) -> Result<TxStatus, ProviderError>;

    /// Log stream of `program_id`. The stream ends when the subscription drops.
    async fn subscribe_logs(
        &self,
        program_id: &Pubkey,
    ) -> Result<mpsc::Receiver<ProgramLogs>, ProviderError>;
}
