use std::{str::FromStr, sync::Arc};

use anchor_lang::AccountDeserialize;
use solana_program::{
    hash::Hash,
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};
use tracing::{debug, warn};

use crate::{
    config::TxPolicy,
    constants::{BUY_TICKET_SIGHASH, LOTTERY_SEED},
    error::{BindingError, ReadFailure, TransactionError},
    events::{EventId, LotteryEvent},
    provider::{TxSignature, TxStatus, WalletProvider},
    state::{LotteryRound, RoundStatus},
    utils::sighash,
};

/// Non-mutating calls against the round account.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadCall {
    /// The whole account in one consistent read.
    Round,
    RoundId,
    TicketPrice,
    PotSize,
    Status,
    Participants,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ReadOutput {
    Round(LotteryRound),
    RoundId(u64),
    TicketPrice(u64),
    PotSize(u64),
    Status(RoundStatus),
    Participants(Vec<Pubkey>),
}

/// State-changing calls.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteCall {
    /// `buy_ticket(expected_round, amount)`. The program reverts with
    /// `RoundMismatch` if `round_id` is no longer current.
    BuyTicket { round_id: u64 },
}

/// Typed access to the deployed lottery program.
pub struct ContractBinding {
    provider: Arc<dyn WalletProvider>,
    program_id: Pubkey,
    round_address: Pubkey,
    chain_id: Hash,
}

impl ContractBinding {
    pub async fn new(
        provider: Arc<dyn WalletProvider>,
        contract_address: &str,
        expected_chain: Hash,
    ) -> Result<Self, BindingError> {
        let program_id = Pubkey::from_str(contract_address)
            .map_err(|_| BindingError::InvalidAddress(contract_address.to_owned()))?;

        let chain_id = provider.chain_id().await.map_err(ReadFailure::from)?;
        if chain_id != expected_chain {
            return Err(BindingError::NetworkMismatch {
                expected: expected_chain,
                actual: chain_id,
            });
        }

        Ok(Self {
            provider,
            round_address: Self::round_address_for(&program_id),
            program_id,
            chain_id,
        })
    }

    /// PDA of the round account for a given program.
    pub fn round_address_for(program_id: &Pubkey) -> Pubkey {
        Pubkey::find_program_address(&[LOTTERY_SEED], program_id).0
    }

    pub fn program_id(&self) -> Pubkey {
        self.program_id
    }

    pub fn round_address(&self) -> Pubkey {
        self.round_address
    }

    pub fn chain_id(&self) -> Hash {
        self.chain_id
    }

    pub fn provider(&self) -> Arc<dyn WalletProvider> {
        self.provider.clone()
    }

    pub async fn read(&self, call: ReadCall) -> Result<ReadOutput, ReadFailure> {
        let round = self.fetch_round().await?;
        Ok(match call {
            ReadCall::Round => ReadOutput::Round(round),
            ReadCall::RoundId => ReadOutput::RoundId(round.round_id),
            ReadCall::TicketPrice => ReadOutput::TicketPrice(round.ticket_price),
            ReadCall::PotSize => ReadOutput::PotSize(round.pot_amount),
            ReadCall::Status => ReadOutput::Status(round.status),
            ReadCall::Participants => ReadOutput::Participants(round.participants),
        })
    }

    /// Shorthand for `read(ReadCall::Round)`.
    pub async fn read_round(&self) -> Result<LotteryRound, ReadFailure> {
        match self.read(ReadCall::Round).await? {
            ReadOutput::Round(round) => Ok(round),
            other => Err(ReadFailure::Decode(format!("unexpected read output {other:?}"))),
        }
    }

    async fn fetch_round(&self) -> Result<LotteryRound, ReadFailure> {
        let data = self
            .provider
            .get_account_data(&self.round_address)
            .await?
            .ok_or(ReadFailure::AccountNotFound(self.round_address))?;

        LotteryRound::try_deserialize(&mut data.as_slice())
            .map_err(|err| ReadFailure::Decode(err.to_string()))
    }

    /// Builds the instruction for `call`, paid by `payer`.
    pub fn instruction(&self, payer: Pubkey, call: WriteCall, value: u64) -> Instruction {
        match call {
            WriteCall::BuyTicket { round_id } => {
                let mut data = sighash(BUY_TICKET_SIGHASH).to_vec();
                data.extend_from_slice(&round_id.to_le_bytes());
                data.extend_from_slice(&value.to_le_bytes());

                Instruction::new_with_bytes(
                    self.program_id,
                    &data,
                    vec![
                        AccountMeta::new(payer, true),
                        AccountMeta::new(self.round_address, false),
                        AccountMeta::new_readonly(system_program::ID, false),
                    ],
                )
            }
        }
    }

    /// Submits `call` and returns as soon as the wallet has sent it.
    ///
    /// Only pre-submission failures are reported here; the outcome of the
    /// transaction itself comes through the returned handle.
    pub async fn write(
        &self,
        payer: Pubkey,
        call: WriteCall,
        value: u64,
    ) -> Result<TxHandle, TransactionError> {
        let instruction = self.instruction(payer, call, value);
        let signature = self.provider.send_transaction(vec![instruction]).await?;
        debug!(%signature, ?call, value, "transaction submitted");

        Ok(TxHandle {
            signature,
            provider: self.provider.clone(),
        })
    }
}

/// A transaction that has been handed to the cluster.
#[derive(Clone)]
pub struct TxHandle {
    signature: TxSignature,
    provider: Arc<dyn WalletProvider>,
}

/// A landed transaction and the program events it emitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmedTx {
    pub signature: TxSignature,
    pub slot: u64,
    pub events: Vec<(EventId, LotteryEvent)>,
}

impl TxHandle {
    pub fn signature(&self) -> &TxSignature {
        &self.signature
    }

    /// Polls until the transaction lands, reverts, or `policy` times out.
    pub async fn confirmation(&self, policy: TxPolicy) -> Result<ConfirmedTx, TransactionError> {
        let poll = async {
            loop {
                match self.provider.transaction_status(&self.signature).await {
                    Ok(TxStatus::Confirmed { slot, events }) => {
                        return Ok(ConfirmedTx {
                            events: LotteryEvent::decode_all(&self.signature, &events),
                            signature: self.signature.clone(),
                            slot,
                        });
                    }
                    Ok(TxStatus::Failed { custom_code }) => {
                        return Err(TransactionError::Reverted { code: custom_code });
                    }
                    Ok(TxStatus::Processing) => {}
                    Err(err) => {
                        warn!(signature = %self.signature, error = %err, "status poll failed");
                    }
                }
                tokio::time::sleep(policy.poll_interval).await;
            }
        };

        tokio::time::timeout(policy.confirmation_timeout, poll)
            .await
            .unwrap_or(Err(TransactionError::Timeout))
    }
}
