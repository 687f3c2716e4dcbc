use std::{sync::Arc, time::Duration};

use solana_program::pubkey::Pubkey;
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, warn};

use crate::{
    components::{
        binding::ContractBinding,
        ledger::{ApplyOutcome, ReplaceOutcome, RoundLedger, StoreSnapshot},
    },
    config::{ClientConfig, RetryPolicy},
    error::{ReadFailure, TransactionError},
    events::{EventId, LotteryEvent},
    state::{IntentId, LotteryRound, Round},
};

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Apply {
        id: EventId,
        event: LotteryEvent,
        reply: Option<Reply<ApplyOutcome>>,
    },
    Refresh {
        reply: Option<Reply<Result<ReplaceOutcome, ReadFailure>>>,
    },
    Loaded {
        ticket: u64,
        result: Result<LotteryRound, ReadFailure>,
        reply: Option<Reply<Result<ReplaceOutcome, ReadFailure>>>,
    },
    AddOptimistic {
        intent: IntentId,
        account: Pubkey,
        round_id: u64,
        reply: Reply<Result<(), TransactionError>>,
    },
    Rollback {
        intent: IntentId,
        reply: Option<Reply<bool>>,
    },
}

/// Handle to the round state.
///
/// All mutations go through a single writer task; readers get consistent
/// snapshots through [`RoundStateStore::subscribe`].
#[derive(Clone)]
pub struct RoundStateStore {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<StoreSnapshot>,
}

impl RoundStateStore {
    /// Starts the writer task. The round stays absent until the first
    /// `refresh()` or `RoundStarted` event.
    pub fn spawn(binding: Arc<ContractBinding>, config: &ClientConfig) -> Self {
        let (commands, receiver) = mpsc::channel(config.store_capacity.max(1));
        let (publisher, snapshots) = watch::channel(StoreSnapshot::default());

        let writer = StoreWriter {
            ledger: RoundLedger::new(),
            binding,
            read_retry: config.read_retry,
            rollover_refresh_delay: config.rollover_refresh_delay,
            commands: commands.downgrade(),
            publisher,
            next_ticket: 0,
        };
        tokio::spawn(writer.run(receiver));

        Self {
            commands,
            snapshots,
        }
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn round(&self) -> Option<Round> {
        self.snapshots.borrow().round.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.clone()
    }

    /// Full read of the round, replacing local state atomically.
    pub async fn refresh(&self) -> Result<ReplaceOutcome, ReadFailure> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Refresh { reply: Some(reply) }).await;
        response
            .await
            .unwrap_or_else(|_| Err(ReadFailure::Rpc("store stopped".to_owned())))
    }

    /// Schedules a refresh without waiting for it.
    pub async fn request_refresh(&self) {
        self.send(Command::Refresh { reply: None }).await;
    }

    /// Returns `None` if the store has shut down.
    pub async fn apply_event(&self, id: EventId, event: LotteryEvent) -> Option<ApplyOutcome> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Apply {
            id,
            event,
            reply: Some(reply),
        })
        .await;
        response.await.ok()
    }

    pub async fn add_optimistic(
        &self,
        intent: IntentId,
        account: Pubkey,
        round_id: u64,
    ) -> Result<(), TransactionError> {
        let (reply, response) = oneshot::channel();
        self.send(Command::AddOptimistic {
            intent,
            account,
            round_id,
            reply,
        })
        .await;
        response
            .await
            .unwrap_or(Err(TransactionError::RoundUnavailable))
    }

    /// Returns whether a speculative entry was removed.
    pub async fn rollback(&self, intent: IntentId) -> bool {
        let (reply, response) = oneshot::channel();
        self.send(Command::Rollback {
            intent,
            reply: Some(reply),
        })
        .await;
        response.await.unwrap_or(false)
    }

    /// Refreshes every `interval` until the returned task is aborted.
    pub fn spawn_poller(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if store.commands.is_closed() {
                    break;
                }
                store.request_refresh().await;
            }
        })
    }

    async fn send(&self, command: Command) {
        if self.commands.send(command).await.is_err() {
            debug!("store writer gone, command dropped");
        }
    }
}

struct StoreWriter {
    ledger: RoundLedger,
    binding: Arc<ContractBinding>,
    read_retry: RetryPolicy,
    rollover_refresh_delay: Duration,
    commands: mpsc::WeakSender<Command>,
    publisher: watch::Sender<StoreSnapshot>,
    next_ticket: u64,
}

impl StoreWriter {
    async fn run(mut self, mut receiver: mpsc::Receiver<Command>) {
        while let Some(command) = receiver.recv().await {
            self.handle(command);
        }
        debug!("store writer stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Apply { id, event, reply } => {
                let outcome = self.ledger.apply_event(id, event);
                if outcome == ApplyOutcome::Closed {
                    self.schedule_refresh(self.rollover_refresh_delay);
                }
                if self.ledger.take_gap() {
                    self.start_read(None);
                }
                self.publish();
                respond(reply, outcome);
            }
            Command::Refresh { reply } => self.start_read(reply),
            Command::Loaded {
                ticket,
                result,
                reply,
            } => {
                let result = match result {
                    Ok(account) => Ok(self.ledger.replace(account, ticket)),
                    Err(err) => {
                        self.ledger.read_failed(ticket, err.clone());
                        Err(err)
                    }
                };
                self.publish();
                respond(reply, result);
            }
            Command::AddOptimistic {
                intent,
                account,
                round_id,
                reply,
            } => {
                let result = self.ledger.add_optimistic(intent, account, round_id);
                if result.is_ok() {
                    self.publish();
                }
                let _ = reply.send(result);
            }
            Command::Rollback { intent, reply } => {
                let removed = self.ledger.rollback(intent);
                if removed {
                    self.publish();
                }
                respond(reply, removed);
            }
        }
    }

    fn publish(&self) {
        self.publisher.send_replace(self.ledger.snapshot());
    }

    /// Reads run outside the writer so events keep flowing meanwhile; the
    /// result comes back as a `Loaded` command tagged with its ticket.
    fn start_read(&mut self, reply: Option<Reply<Result<ReplaceOutcome, ReadFailure>>>) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let binding = self.binding.clone();
        let retry = self.read_retry;

        tokio::spawn(async move {
            let result = read_with_retry(&binding, retry).await;
            let _ = commands
                .send(Command::Loaded {
                    ticket,
                    result,
                    reply,
                })
                .await;
        });
    }

    fn schedule_refresh(&self, delay: Duration) {
        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = commands.send(Command::Refresh { reply: None }).await;
        });
    }
}

fn respond<T>(reply: Option<Reply<T>>, value: T) {
    if let Some(reply) = reply {
        let _ = reply.send(value);
    }
}

async fn read_with_retry(
    binding: &ContractBinding,
    retry: RetryPolicy,
) -> Result<LotteryRound, ReadFailure> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match binding.read_round().await {
            Ok(round) => return Ok(round),
            Err(err) if err.is_retryable() && retry.allows(attempt) => {
                let delay = retry.delay(attempt);
                warn!(attempt, ?delay, error = %err, "round read failed, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                warn!(attempt, error = %err, "round read failed");
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{state::RoundStatus, test_harness::*};

    async fn store_for(wallet: &Arc<MockWallet>) -> RoundStateStore {
        let binding = ContractBinding::new(wallet.clone(), &crate::ID.to_string(), test_chain())
            .await
            .unwrap();
        RoundStateStore::spawn(Arc::new(binding), &test_config())
    }

    #[tokio::test]
    async fn test_initial_refresh_loads_round() {
        let wallet = MockWallet::new();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;

        assert!(store.round().is_none());
        let outcome = store.refresh().await.unwrap();
        assert_eq!(outcome, ReplaceOutcome::Replaced { from: None, to: 5 });

        let round = store.round().unwrap();
        assert_eq!(round.round_id, 5);
        assert_eq!(round.ticket_price, 10);
        assert!(round.participants.is_empty());
        assert_eq!(round.pot_size, 0);
    }

    #[tokio::test]
    async fn test_refresh_retries_transient_failures() {
        let wallet = MockWallet::new();
        wallet.set_round(round_account(5, 10, vec![]));
        wallet.fail_reads(2);
        let store = store_for(&wallet).await;

        assert!(store.refresh().await.is_ok());
        assert!(!store.snapshot().stale);
    }

    #[tokio::test]
    async fn test_exhausted_retries_mark_snapshot_stale() {
        let wallet = MockWallet::new();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;
        store.refresh().await.unwrap();

        wallet.fail_reads(100);
        let err = store.refresh().await.unwrap_err();
        assert!(err.is_retryable());

        let snapshot = store.snapshot();
        assert!(snapshot.stale);
        assert_eq!(snapshot.last_error, Some(err));
        assert_eq!(snapshot.round.unwrap().round_id, 5);
    }

    #[tokio::test]
    async fn test_missing_account_is_not_retried() {
        let wallet = MockWallet::new();
        let store = store_for(&wallet).await;

        assert!(matches!(
            store.refresh().await,
            Err(ReadFailure::AccountNotFound(_))
        ));
        assert_eq!(wallet.reads(), 1);
    }

    #[tokio::test]
    async fn test_updates_are_applied_in_order() {
        let wallet = MockWallet::new();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;
        store.refresh().await.unwrap();

        let buyers: Vec<Pubkey> = (0..5).map(|_| Pubkey::new_unique()).collect();
        let mut tasks = Vec::new();
        for (i, buyer) in buyers.iter().enumerate() {
            let store = store.clone();
            let event = purchase(5, *buyer, i as u64);
            tasks.push(tokio::spawn(async move {
                store.apply_event(event_id("tx", i as u32), event).await
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let round = store.round().unwrap();
        assert_eq!(round.participants.len(), 5);
        assert!(round.is_balanced());
    }

    #[tokio::test(start_paused = true)]
    async fn test_winner_schedules_rollover_refresh() {
        let wallet = MockWallet::new();
        let winner_account = Pubkey::new_unique();
        wallet.set_round(round_account(5, 10, vec![Pubkey::new_unique()]));
        let store = store_for(&wallet).await;
        store.refresh().await.unwrap();

        let outcome = store
            .apply_event(event_id("w", 0), winner(5, winner_account, 100))
            .await;
        assert_eq!(outcome, Some(ApplyOutcome::Closed));
        assert_eq!(store.round().unwrap().status, RoundStatus::Closed);
        assert_eq!(store.snapshot().winners[0].account, winner_account);

        wallet.set_round(round_account(6, 10, vec![]));
        let mut snapshots = store.subscribe();
        wait_for(&mut snapshots, |s| {
            s.round.as_ref().map(|r| r.round_id) == Some(6)
        })
        .await;

        let round = store.round().unwrap();
        assert!(round.participants.is_empty());
        assert_eq!(round.status, RoundStatus::Open);
        assert_eq!(store.snapshot().winners.len(), 1);
    }

    #[tokio::test]
    async fn test_skipped_ticket_triggers_refresh() {
        let wallet = MockWallet::new();
        let missed = Pubkey::new_unique();
        let buyer = Pubkey::new_unique();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;
        store.refresh().await.unwrap();

        wallet.set_round(round_account(5, 10, vec![missed, buyer]));
        store
            .apply_event(event_id("tx", 0), purchase(5, buyer, 1))
            .await;

        let mut snapshots = store.subscribe();
        wait_for(&mut snapshots, |s| {
            s.round
                .as_ref()
                .map_or(false, |r| r.accounts() == vec![missed, buyer])
        })
        .await;
        assert!(store.round().unwrap().is_balanced());
    }

    #[tokio::test]
    async fn test_purchase_for_later_round_triggers_refresh() {
        let wallet = MockWallet::new();
        let buyer = Pubkey::new_unique();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;
        store.refresh().await.unwrap();

        // The rollover itself was missed.
        wallet.set_round(round_account(6, 10, vec![buyer]));
        let outcome = store
            .apply_event(event_id("tx", 0), purchase(6, buyer, 0))
            .await;
        assert_eq!(outcome, Some(ApplyOutcome::Stale));

        let mut snapshots = store.subscribe();
        wait_for(&mut snapshots, |s| {
            s.round.as_ref().map_or(false, |r| r.round_id == 6)
        })
        .await;
        assert_eq!(store.round().unwrap().accounts(), vec![buyer]);
    }

    #[tokio::test]
    async fn test_optimistic_round_trip_through_writer() {
        let wallet = MockWallet::new();
        let buyer = Pubkey::new_unique();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;

        assert_eq!(
            store.add_optimistic(1, buyer, 5).await,
            Err(TransactionError::RoundUnavailable)
        );
        store.refresh().await.unwrap();

        store.add_optimistic(1, buyer, 5).await.unwrap();
        assert_eq!(store.round().unwrap().pot_size, 10);
        assert!(store.rollback(1).await);
        assert_eq!(store.round().unwrap().pot_size, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poller_refreshes_periodically() {
        let wallet = MockWallet::new();
        wallet.set_round(round_account(5, 10, vec![]));
        let store = store_for(&wallet).await;
        let poller = store.spawn_poller(Duration::from_secs(1));

        let mut snapshots = store.subscribe();
        wait_for(&mut snapshots, |s| s.round.is_some()).await;

        let buyer = Pubkey::new_unique();
        wallet.set_round(round_account(5, 10, vec![buyer]));
        wait_for(&mut snapshots, |s| {
            s.round.as_ref().map_or(false, |r| r.accounts() == vec![buyer])
        })
        .await;
        poller.abort();
    }
}
