use std::collections::{BTreeMap, HashMap};

use solana_program::pubkey::Pubkey;
use tracing::{debug, info, warn};

use crate::{
    error::{ReadFailure, TransactionError},
    events::{EventId, LotteryEvent, RoundStarted, TicketPurchased, WinnerPicked},
    state::{EntryOrigin, IntentId, LotteryRound, Participant, Round, RoundStatus, WinnerRecord},
};

/// What applying one event did to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// A new participant was appended.
    Appended,
    /// The buyer's optimistic entry was replaced by the confirmed one.
    Reconciled(IntentId),
    /// The ticket was already known from an earlier read.
    Known,
    /// The current round was closed and its winner recorded.
    Closed,
    /// A winner was recorded for a round other than the current one.
    WinnerRecorded,
    /// The round was replaced wholesale.
    Rollover { from: Option<u64>, to: u64 },
    /// The event belongs to a round other than the current one.
    Stale,
    /// The event was applied before; carries the first outcome.
    Duplicate(Box<ApplyOutcome>),
}

impl ApplyOutcome {
    /// The outcome of the first application, looking through duplicates.
    pub fn original(&self) -> &ApplyOutcome {
        match self {
            ApplyOutcome::Duplicate(first) => first.original(),
            other => other,
        }
    }
}

/// What a full read did to the ledger.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReplaceOutcome {
    /// The round was replaced wholesale.
    Replaced { from: Option<u64>, to: u64 },
    /// Same round; chain state merged with local state.
    Merged { round_id: u64 },
    /// An older or superseded read; nothing changed.
    Ignored,
}

/// Read-only copy of the store state handed to readers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreSnapshot {
    pub round: Option<Round>,
    pub winners: Vec<WinnerRecord>,
    /// The last refresh failed after all retries; `round` may be out of date.
    pub stale: bool,
    pub last_error: Option<ReadFailure>,
}

/// Round state plus everything needed to apply updates to it idempotently.
///
/// Every operation computes its result before touching `self`, so a failed
/// operation never leaves a partially applied round behind.
#[derive(Debug, Default)]
pub struct RoundLedger {
    round: Option<Round>,
    winners: BTreeMap<u64, WinnerRecord>,
    /// Outcome of every event applied during the current round.
    seen: HashMap<EventId, ApplyOutcome>,
    /// Ticket of the latest applied read.
    applied_read: u64,
    stale: bool,
    last_error: Option<ReadFailure>,
    /// A ticket index skipped ahead of the confirmed list.
    gap: bool,
}

impl RoundLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn round(&self) -> Option<&Round> {
        self.round.as_ref()
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            round: self.round.clone(),
            winners: self.winners.values().copied().collect(),
            stale: self.stale,
            last_error: self.last_error.clone(),
        }
    }

    /// Returns and clears the flag raised when an event revealed missed
    /// history.
    pub fn take_gap(&mut self) -> bool {
        std::mem::take(&mut self.gap)
    }

    pub fn apply_event(&mut self, id: EventId, event: LotteryEvent) -> ApplyOutcome {
        if let Some(first) = self.seen.get(&id) {
            debug!(signature = %id.signature, index = id.index, "duplicate event ignored");
            return ApplyOutcome::Duplicate(Box::new(first.clone()));
        }

        let outcome = match event {
            LotteryEvent::TicketPurchased(e) => self.apply_purchase(&id, e),
            LotteryEvent::WinnerPicked(e) => self.apply_winner(e),
            LotteryEvent::RoundStarted(e) => self.apply_round_started(e),
        };
        self.seen.insert(id, outcome.clone());
        outcome
    }

    fn apply_purchase(&mut self, id: &EventId, e: TicketPurchased) -> ApplyOutcome {
        let Some(current) = self.round.as_ref() else {
            return ApplyOutcome::Stale;
        };
        if current.round_id != e.round_id {
            debug!(event_round = e.round_id, round_id = current.round_id, "stale purchase");
            if e.round_id > current.round_id {
                // A later round is live on chain.
                self.gap = true;
            }
            return ApplyOutcome::Stale;
        }

        let confirmed = current.confirmed_len();
        if e.ticket_index < confirmed as u64 {
            return ApplyOutcome::Known;
        }
        if e.ticket_index > confirmed as u64 {
            warn!(
                ticket = e.ticket_index,
                confirmed,
                "ticket index skipped ahead, history was missed"
            );
            self.gap = true;
        }
        if e.amount != current.ticket_price {
            warn!(
                ticket = e.ticket_index,
                amount = e.amount,
                ticket_price = current.ticket_price,
                "purchase amount differs from ticket price"
            );
        }

        let mut next = current.clone();
        let reconciled = take_optimistic(&mut next, &e.buyer);
        next.participants.insert(
            confirmed,
            Participant {
                account: e.buyer,
                amount: next.ticket_price,
                origin: EntryOrigin::Event(id.clone()),
                ticket: Some(e.ticket_index),
            },
        );
        next.recompute_pot();
        self.round = Some(next);

        match reconciled {
            Some(intent) => ApplyOutcome::Reconciled(intent),
            None => ApplyOutcome::Appended,
        }
    }

    fn apply_winner(&mut self, e: WinnerPicked) -> ApplyOutcome {
        self.winners.entry(e.round_id).or_insert(WinnerRecord {
            round_id: e.round_id,
            account: e.winner,
            payout: e.payout,
        });

        match self.round.as_mut() {
            Some(round) if round.round_id == e.round_id => {
                round.status = RoundStatus::Closed;
                info!(round_id = e.round_id, winner = %e.winner, payout = e.payout, "round closed");
                ApplyOutcome::Closed
            }
            Some(round) if round.round_id < e.round_id => {
                // The round this winner belongs to was never observed.
                self.gap = true;
                ApplyOutcome::WinnerRecorded
            }
            _ => ApplyOutcome::WinnerRecorded,
        }
    }

    fn apply_round_started(&mut self, e: RoundStarted) -> ApplyOutcome {
        let from = self.round.as_ref().map(|r| r.round_id);
        if from.map_or(false, |current| current >= e.round_id) {
            return ApplyOutcome::Stale;
        }

        self.install(Round::open(e.round_id, e.ticket_price));
        ApplyOutcome::Rollover {
            from,
            to: e.round_id,
        }
    }

    /// Applies the result of a full read started with `ticket`.
    pub fn replace(&mut self, account: LotteryRound, ticket: u64) -> ReplaceOutcome {
        if ticket < self.applied_read {
            debug!(ticket, applied = self.applied_read, "superseded read ignored");
            return ReplaceOutcome::Ignored;
        }
        self.applied_read = ticket;
        self.stale = false;
        self.last_error = None;

        let expected_pot = account.ticket_price.saturating_mul(account.participants.len() as u64);
        if account.pot_amount != expected_pot {
            warn!(
                round_id = account.round_id,
                pot = account.pot_amount,
                expected_pot,
                "on-chain pot does not match participants"
            );
        }

        let Some(current) = self.round.as_ref() else {
            self.install(Round::from_account(&account));
            return ReplaceOutcome::Replaced {
                from: None,
                to: account.round_id,
            };
        };

        if account.round_id < current.round_id {
            debug!(read = account.round_id, round_id = current.round_id, "lagging read ignored");
            return ReplaceOutcome::Ignored;
        }
        if account.round_id > current.round_id {
            let from = current.round_id;
            self.install(Round::from_account(&account));
            return ReplaceOutcome::Replaced {
                from: Some(from),
                to: account.round_id,
            };
        }

        let next = merge(current, &account);
        let round_id = next.round_id;
        self.round = Some(next);
        ReplaceOutcome::Merged { round_id }
    }

    /// Records a failed read started with `ticket`.
    pub fn read_failed(&mut self, ticket: u64, err: ReadFailure) {
        if ticket < self.applied_read {
            return;
        }
        self.stale = true;
        self.last_error = Some(err);
    }

    /// Adds the speculative entry for `intent`.
    pub fn add_optimistic(
        &mut self,
        intent: IntentId,
        account: Pubkey,
        round_id: u64,
    ) -> Result<(), TransactionError> {
        let round = self
            .round
            .as_mut()
            .ok_or(TransactionError::RoundUnavailable)?;
        if round.round_id != round_id {
            return Err(TransactionError::RoundExpired);
        }
        if round.status != RoundStatus::Open {
            return Err(TransactionError::RoundNotOpen);
        }
        if round.optimistic_entry(intent).is_some() {
            return Err(TransactionError::DuplicatePurchase);
        }

        round.participants.push(Participant {
            account,
            amount: round.ticket_price,
            origin: EntryOrigin::Optimistic(intent),
            ticket: None,
        });
        round.recompute_pot();
        Ok(())
    }

    /// Removes the speculative entry of `intent`, if it is still speculative.
    pub fn rollback(&mut self, intent: IntentId) -> bool {
        let Some(round) = self.round.as_mut() else {
            return false;
        };
        let before = round.participants.len();
        round
            .participants
            .retain(|p| p.origin != EntryOrigin::Optimistic(intent));
        round.recompute_pot();
        round.participants.len() != before
    }

    fn install(&mut self, round: Round) {
        info!(round_id = round.round_id, ticket_price = round.ticket_price, "round installed");
        self.round = Some(round);
        self.seen.clear();
        self.gap = false;
    }
}

/// Removes the first optimistic entry of `buyer`, returning its intent.
fn take_optimistic(round: &mut Round, buyer: &Pubkey) -> Option<IntentId> {
    let position = round
        .participants
        .iter()
        .position(|p| p.account == *buyer && p.is_optimistic())?;
    match round.participants.remove(position).origin {
        EntryOrigin::Optimistic(intent) => Some(intent),
        _ => None,
    }
}

fn status_rank(status: RoundStatus) -> u8 {
    match status {
        RoundStatus::Open => 0,
        RoundStatus::Drawing => 1,
        RoundStatus::Closed => 2,
    }
}

/// Chain state for the same round, keeping confirmed entries the read has
/// not caught up with yet and the optimistic tail.
fn merge(current: &Round, account: &LotteryRound) -> Round {
    let mut next = Round::from_account(account);
    let base = next.participants.len() as u64;

    // Tickets the read shows beyond what was confirmed locally. An
    // optimistic entry for one of these accounts has landed.
    let known = current.confirmed_len() as u64;
    let mut landed: Vec<Pubkey> = next
        .participants
        .iter()
        .filter(|p| p.ticket.map_or(false, |t| t >= known))
        .map(|p| p.account)
        .collect();

    let mut late: Vec<&Participant> = current
        .participants
        .iter()
        .filter(|p| !p.is_optimistic() && p.ticket.map_or(false, |t| t >= base))
        .collect();
    late.sort_by_key(|p| p.ticket);
    late.dedup_by_key(|p| p.ticket);
    next.participants.extend(late.into_iter().cloned());

    next.participants.extend(
        current
            .participants
            .iter()
            .filter(|p| p.is_optimistic())
            .filter(|p| match landed.iter().position(|a| *a == p.account) {
                Some(i) => {
                    landed.swap_remove(i);
                    false
                }
                None => true,
            })
            .cloned(),
    );

    if status_rank(current.status) > status_rank(next.status) {
        next.status = current.status;
    }
    next.recompute_pot();
    next
}
