use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
};

use solana_program::pubkey::Pubkey;
use tokio::sync::{broadcast, oneshot, watch};
use tracing::{debug, info, warn};

use crate::{
    components::{
        binding::{ConfirmedTx, ContractBinding, TxHandle, WriteCall},
        ledger::{ApplyOutcome, StoreSnapshot},
        store::RoundStateStore,
    },
    config::TxPolicy,
    error::TransactionError,
    events::LotteryEvent,
    provider::TxSignature,
    state::{IntentId, RoundStatus},
    utils::lock,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntentStatus {
    /// Optimistic entry added, waiting for the wallet.
    Pending,
    /// Handed to the cluster, waiting for confirmation.
    Submitted,
    Confirmed,
    Failed(TransactionError),
    /// Declined before submission.
    Rejected(TransactionError),
}

impl IntentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IntentStatus::Confirmed | IntentStatus::Failed(_) | IntentStatus::Rejected(_)
        )
    }

    pub fn error(&self) -> Option<&TransactionError> {
        match self {
            IntentStatus::Failed(err) | IntentStatus::Rejected(err) => Some(err),
            _ => None,
        }
    }
}

/// A locally tracked attempt to buy a ticket.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketIntent {
    pub id: IntentId,
    pub account: Pubkey,
    pub round_id: u64,
    pub amount: u64,
    pub status: IntentStatus,
    pub signature: Option<TxSignature>,
}

/// Summary of the most recent purchase, for a loading indicator.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PurchaseStatus {
    pub last_intent: Option<IntentId>,
    pub is_loading: bool,
    pub last_error: Option<TransactionError>,
}

#[derive(Default)]
struct Intents {
    active: HashMap<IntentId, TicketIntent>,
    archived: Vec<TicketIntent>,
}

struct Shared {
    binding: Arc<ContractBinding>,
    store: RoundStateStore,
    policy: TxPolicy,
    intents: Mutex<Intents>,
    next_id: AtomicU64,
    status: watch::Sender<PurchaseStatus>,
    updates: broadcast::Sender<TicketIntent>,
}

/// Drives ticket purchases from local checks to a terminal status.
#[derive(Clone)]
pub struct TransactionManager {
    shared: Arc<Shared>,
}

impl TransactionManager {
    pub fn new(binding: Arc<ContractBinding>, store: RoundStateStore, policy: TxPolicy) -> Self {
        let (status, _) = watch::channel(PurchaseStatus::default());
        let (updates, _) = broadcast::channel(64);
        Self {
            shared: Arc::new(Shared {
                binding,
                store,
                policy,
                intents: Mutex::new(Intents::default()),
                next_id: AtomicU64::new(1),
                status,
                updates,
            }),
        }
    }

    /// Buys one ticket of the current round for `account`.
    ///
    /// Returns once the transaction has been submitted; confirmation is
    /// tracked in the background. Local rejections create no intent. A
    /// wallet rejection leaves a `Rejected` intent in the archive and is
    /// returned as the error. Dropping the returned future does not stop the
    /// purchase once its intent exists.
    pub async fn buy(&self, account: Pubkey) -> Result<IntentId, TransactionError> {
        let intent = self.shared.reserve(account)?;
        let (reply, submitted) = oneshot::channel();
        tokio::spawn(submit(self.shared.clone(), intent, reply));
        submitted
            .await
            .unwrap_or_else(|_| Err(TransactionError::Provider("purchase task stopped".to_owned())))
    }

    /// Current copy of an intent, active or archived.
    pub fn intent(&self, id: IntentId) -> Option<TicketIntent> {
        let intents = lock(&self.shared.intents);
        intents
            .active
            .get(&id)
            .or_else(|| intents.archived.iter().find(|i| i.id == id))
            .cloned()
    }

    /// Intents that reached a terminal status, oldest first.
    pub fn archived(&self) -> Vec<TicketIntent> {
        lock(&self.shared.intents).archived.clone()
    }

    /// Waits until `id` reaches a terminal status. Returns `None` for an
    /// unknown intent.
    pub async fn wait_settled(&self, id: IntentId) -> Option<TicketIntent> {
        let mut updates = self.shared.updates.subscribe();
        loop {
            let current = self.intent(id)?;
            if current.status.is_terminal() {
                return Some(current);
            }
            match updates.recv().await {
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return self.intent(id),
            }
        }
    }

    pub fn status(&self) -> PurchaseStatus {
        self.shared.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<PurchaseStatus> {
        self.shared.status.subscribe()
    }

    /// Every intent change, as it happens.
    pub fn subscribe(&self) -> broadcast::Receiver<TicketIntent> {
        self.shared.updates.subscribe()
    }
}

impl Shared {
    /// Checks the purchase against the current snapshot and registers a
    /// `Pending` intent under the same lock as the duplicate check.
    fn reserve(&self, account: Pubkey) -> Result<TicketIntent, TransactionError> {
        let round = self
            .store
            .round()
            .ok_or(TransactionError::RoundUnavailable)?;
        if round.status != RoundStatus::Open {
            return Err(TransactionError::RoundNotOpen);
        }

        let mut intents = lock(&self.intents);
        let in_flight = intents
            .active
            .values()
            .any(|i| i.account == account && i.round_id == round.round_id);
        if in_flight {
            return Err(TransactionError::DuplicatePurchase);
        }

        let intent = TicketIntent {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            account,
            round_id: round.round_id,
            amount: round.ticket_price,
            status: IntentStatus::Pending,
            signature: None,
        };
        intents.active.insert(intent.id, intent.clone());
        Ok(intent)
    }

    fn update(&self, id: IntentId, change: impl FnOnce(&mut TicketIntent)) {
        let updated = {
            let mut intents = lock(&self.intents);
            let Some(intent) = intents.active.get_mut(&id) else {
                return;
            };
            change(intent);
            intent.clone()
        };
        self.publish(&updated);
    }

    /// Moves `id` to a terminal status and archives it.
    fn finish(&self, id: IntentId, status: IntentStatus) {
        let finished = {
            let mut intents = lock(&self.intents);
            let Some(mut intent) = intents.active.remove(&id) else {
                return;
            };
            intent.status = status;
            intents.archived.push(intent.clone());
            intent
        };

        match finished.status.error() {
            Some(err) => warn!(intent = id, error = %err, "purchase did not go through"),
            None => info!(intent = id, "purchase confirmed"),
        }
        self.publish(&finished);
    }

    fn publish(&self, intent: &TicketIntent) {
        self.status.send_if_modified(|status| {
            if status.last_intent.map_or(false, |last| last > intent.id) {
                return false;
            }
            *status = PurchaseStatus {
                last_intent: Some(intent.id),
                is_loading: !intent.status.is_terminal(),
                last_error: intent.status.error().cloned(),
            };
            true
        });
        let _ = self.updates.send(intent.clone());
    }

    /// Applies the transaction's events through the store and checks that
    /// one of them is this purchase.
    async fn settle(
        &self,
        account: Pubkey,
        round_id: u64,
        tx: ConfirmedTx,
    ) -> Result<(), TransactionError> {
        let mut result = Err(TransactionError::Reverted { code: None });
        for (event_id, event) in tx.events {
            let matches = matches!(
                &event,
                LotteryEvent::TicketPurchased(e) if e.buyer == account && e.round_id == round_id
            );
            let Some(outcome) = self.store.apply_event(event_id, event).await else {
                continue;
            };
            if !matches || result.is_ok() {
                continue;
            }
            result = match outcome.original() {
                ApplyOutcome::Appended | ApplyOutcome::Reconciled(_) | ApplyOutcome::Known => Ok(()),
                ApplyOutcome::Stale => Err(TransactionError::RoundExpired),
                _ => Err(TransactionError::Reverted { code: None }),
            };
        }
        if result.is_err() {
            warn!(signature = %tx.signature, "confirmed without a matching purchase event");
        }
        result
    }
}

/// Drives a reserved intent through submission and confirmation. Reports
/// the submission result on `reply`, then keeps tracking.
async fn submit(
    shared: Arc<Shared>,
    intent: TicketIntent,
    reply: oneshot::Sender<Result<IntentId, TransactionError>>,
) {
    let TicketIntent {
        id,
        account,
        round_id,
        amount,
        ..
    } = intent;

    if let Err(err) = shared.store.add_optimistic(id, account, round_id).await {
        lock(&shared.intents).active.remove(&id);
        debug!(intent = id, error = %err, "purchase rejected locally");
        let _ = reply.send(Err(err));
        return;
    }
    shared.publish(&intent);
    info!(intent = id, %account, round_id, amount, "purchase started");

    let handle = match shared
        .binding
        .write(account, WriteCall::BuyTicket { round_id }, amount)
        .await
    {
        Ok(handle) => handle,
        Err(err) => {
            shared.store.rollback(id).await;
            shared.finish(id, IntentStatus::Rejected(err.clone()));
            let _ = reply.send(Err(err));
            return;
        }
    };

    shared.update(id, |intent| {
        intent.status = IntentStatus::Submitted;
        intent.signature = Some(handle.signature().clone());
    });
    let _ = reply.send(Ok(id));
    track(shared, id, round_id, account, handle).await;
}

async fn track(
    shared: Arc<Shared>,
    id: IntentId,
    round_id: u64,
    account: Pubkey,
    handle: TxHandle,
) {
    let mut snapshots = shared.store.subscribe();
    let result = tokio::select! {
        confirmed = handle.confirmation(shared.policy) => match confirmed {
            Ok(tx) => shared.settle(account, round_id, tx).await,
            Err(err) => Err(err),
        },
        () = round_changed(&mut snapshots, round_id) => Err(TransactionError::RoundExpired),
    };

    match result {
        Ok(()) => shared.finish(id, IntentStatus::Confirmed),
        Err(err) => {
            shared.store.rollback(id).await;
            shared.finish(id, IntentStatus::Failed(err));
        }
    }
}

/// Resolves once the store holds a round other than `round_id`. Never
/// resolves if the store shuts down first.
async fn round_changed(snapshots: &mut watch::Receiver<StoreSnapshot>, round_id: u64) {
    let moved_on = |s: &StoreSnapshot| s.round.as_ref().map_or(false, |r| r.round_id != round_id);
    let closed = snapshots.wait_for(moved_on).await.is_err();
    if closed {
        std::future::pending::<()>().await;
    }
}
