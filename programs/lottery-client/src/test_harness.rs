//! Scriptable in-memory wallet and fixtures shared by the unit tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use anchor_lang::AccountSerialize;
use async_trait::async_trait;
use solana_program::{hash::Hash, instruction::Instruction, pubkey::Pubkey};
use tokio::sync::{broadcast, mpsc, watch};

use crate::{
    config::{ClientConfig, RetryPolicy, TxPolicy},
    error::ProviderError,
    events::{EventId, LotteryEvent, RoundStarted, TicketPurchased, WinnerPicked},
    provider::{ProgramLogs, TxSignature, TxStatus, WalletProvider},
    state::{LotteryRound, RoundStatus},
    utils::lock,
};

#[derive(Default)]
struct WalletState {
    accounts: Vec<Pubkey>,
    reject: bool,
    round_data: Option<Vec<u8>>,
    failing_reads: u32,
    reads: usize,
    next_send_error: Option<ProviderError>,
    sent: Vec<(TxSignature, Vec<Instruction>)>,
    statuses: HashMap<TxSignature, TxStatus>,
    log_streams: Vec<mpsc::Sender<ProgramLogs>>,
    failing_subscriptions: u32,
    subscribe_attempts: usize,
}

pub struct MockWallet {
    account: Pubkey,
    state: Mutex<WalletState>,
    account_changes: broadcast::Sender<Option<Pubkey>>,
}

impl MockWallet {
    pub fn new() -> Arc<Self> {
        let account = Pubkey::new_unique();
        let (account_changes, _) = broadcast::channel(16);
        Arc::new(Self {
            account,
            state: Mutex::new(WalletState {
                accounts: vec![account],
                ..WalletState::default()
            }),
            account_changes,
        })
    }

    /// The account the wallet starts with.
    pub fn account(&self) -> Pubkey {
        self.account
    }

    pub fn reject_accounts(&self, reject: bool) {
        lock(&self.state).reject = reject;
    }

    pub fn set_accounts(&self, accounts: Vec<Pubkey>) {
        lock(&self.state).accounts = accounts;
    }

    /// Switches the active account as if the user did it in the wallet.
    pub fn switch_account(&self, next: Option<Pubkey>) {
        lock(&self.state).accounts = next.into_iter().collect();
        let _ = self.account_changes.send(next);
    }

    pub fn set_round(&self, round: LotteryRound) {
        let mut data = Vec::new();
        round.try_serialize(&mut data).unwrap();
        self.set_raw_round_data(data);
    }

    pub fn set_raw_round_data(&self, data: Vec<u8>) {
        lock(&self.state).round_data = Some(data);
    }

    /// The next `count` account reads fail with an RPC error.
    pub fn fail_reads(&self, count: u32) {
        lock(&self.state).failing_reads = count;
    }

    pub fn reads(&self) -> usize {
        lock(&self.state).reads
    }

    pub fn fail_next_send(&self, err: ProviderError) {
        lock(&self.state).next_send_error = Some(err);
    }

    pub fn sent(&self) -> Vec<(TxSignature, Vec<Instruction>)> {
        lock(&self.state).sent.clone()
    }

    pub fn confirm(&self, signature: &TxSignature, events: Vec<Vec<u8>>) {
        lock(&self.state)
            .statuses
            .insert(signature.clone(), TxStatus::Confirmed { slot: 1, events });
    }

    pub fn revert(&self, signature: &TxSignature, custom_code: Option<u32>) {
        lock(&self.state)
            .statuses
            .insert(signature.clone(), TxStatus::Failed { custom_code });
    }

    /// Delivers `logs` to every open log stream.
    pub fn emit_logs(&self, logs: ProgramLogs) {
        let mut state = lock(&self.state);
        state.log_streams.retain(|stream| !stream.is_closed());
        for stream in &state.log_streams {
            stream.try_send(logs.clone()).unwrap();
        }
    }

    pub fn log_subscribers(&self) -> usize {
        lock(&self.state)
            .log_streams
            .iter()
            .filter(|stream| !stream.is_closed())
            .count()
    }

    /// Ends every open log stream.
    pub fn drop_log_streams(&self) {
        lock(&self.state).log_streams.clear();
    }

    /// The next `count` log subscriptions fail.
    pub fn fail_log_subscriptions(&self, count: u32) {
        lock(&self.state).failing_subscriptions = count;
    }

    pub fn log_subscribe_attempts(&self) -> usize {
        lock(&self.state).subscribe_attempts
    }
}

#[async_trait]
impl WalletProvider for MockWallet {
    async fn request_accounts(&self) -> Result<Vec<Pubkey>, ProviderError> {
        let state = lock(&self.state);
        if state.reject {
            return Err(ProviderError::UserRejected);
        }
        Ok(state.accounts.clone())
    }

    fn subscribe_accounts(&self) -> broadcast::Receiver<Option<Pubkey>> {
        self.account_changes.subscribe()
    }

    async fn chain_id(&self) -> Result<Hash, ProviderError> {
        Ok(test_chain())
    }

    async fn get_account_data(&self, _address: &Pubkey) -> Result<Option<Vec<u8>>, ProviderError> {
        let mut state = lock(&self.state);
        state.reads += 1;
        if state.failing_reads > 0 {
            state.failing_reads -= 1;
            return Err(ProviderError::Rpc("connection reset".to_owned()));
        }
        Ok(state.round_data.clone())
    }

    async fn send_transaction(
        &self,
        instructions: Vec<Instruction>,
    ) -> Result<TxSignature, ProviderError> {
        let mut state = lock(&self.state);
        if let Some(err) = state.next_send_error.take() {
            return Err(err);
        }
        let signature = TxSignature(format!("sig-{}", state.sent.len() + 1));
        state.sent.push((signature.clone(), instructions));
        Ok(signature)
    }

    async fn transaction_status(&self, signature: &TxSignature) -> Result<TxStatus, ProviderError> {
        Ok(lock(&self.state)
            .statuses
            .get(signature)
            .cloned()
            .unwrap_or(TxStatus::Processing))
    }

    async fn subscribe_logs(
        &self,
        _program_id: &Pubkey,
    ) -> Result<mpsc::Receiver<ProgramLogs>, ProviderError> {
        let mut state = lock(&self.state);
        state.subscribe_attempts += 1;
        if state.failing_subscriptions > 0 {
            state.failing_subscriptions -= 1;
            return Err(ProviderError::Disconnected);
        }
        let (sender, receiver) = mpsc::channel(64);
        state.log_streams.push(sender);
        Ok(receiver)
    }
}

pub fn test_chain() -> Hash {
    Hash::new_from_array([7; 32])
}

pub fn fast_tx_policy() -> TxPolicy {
    TxPolicy {
        confirmation_timeout: Duration::from_secs(5),
        poll_interval: Duration::from_millis(5),
    }
}

pub fn test_config() -> ClientConfig {
    ClientConfig {
        program_id: crate::ID.to_string(),
        expected_chain: test_chain(),
        read_retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        subscription_retry: RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
        },
        tx: fast_tx_policy(),
        refresh_interval: None,
        rollover_refresh_delay: Duration::from_millis(20),
        store_capacity: 64,
    }
}

pub fn round_account(round_id: u64, ticket_price: u64, participants: Vec<Pubkey>) -> LotteryRound {
    LotteryRound {
        bump: 255,
        round_id,
        ticket_price,
        pot_amount: ticket_price * participants.len() as u64,
        status: RoundStatus::Open,
        participants,
        authority: Pubkey::default(),
    }
}

pub fn event_id(signature: &str, index: u32) -> EventId {
    EventId::new(signature.into(), index)
}

/// A 10-lamport ticket purchase.
pub fn purchase(round_id: u64, buyer: Pubkey, ticket_index: u64) -> LotteryEvent {
    LotteryEvent::TicketPurchased(TicketPurchased {
        round_id,
        buyer,
        amount: 10,
        ticket_index,
    })
}

pub fn winner(round_id: u64, winner: Pubkey, payout: u64) -> LotteryEvent {
    LotteryEvent::WinnerPicked(WinnerPicked {
        round_id,
        winner,
        payout,
    })
}

pub fn round_started(round_id: u64, ticket_price: u64) -> LotteryEvent {
    LotteryEvent::RoundStarted(RoundStarted {
        round_id,
        ticket_price,
    })
}

/// Waits until the watched value satisfies `done`.
pub async fn wait_for<T>(receiver: &mut watch::Receiver<T>, done: impl FnMut(&T) -> bool) {
    tokio::time::timeout(Duration::from_secs(10), receiver.wait_for(done))
        .await
        .expect("timed out waiting for state")
        .map(|_| ())
        .expect("sender dropped");
}

/// Polls `done` until it holds.
pub async fn wait_until(done: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !done() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("timed out waiting for condition");
}
