use anchor_lang::prelude::*;

use crate::events::EventId;

/// Lifecycle of a lottery round as stored on-chain.
#[derive(AnchorSerialize, AnchorDeserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoundStatus {
    /// Tickets can be bought.
    Open,
    /// Sales are closed and randomness has been committed.
    Drawing,
    /// A winner has been picked.
    Closed,
}

/// Round account layout this client expects the lottery program to keep at
/// the PDA derived from `[LOTTERY_SEED]`.
#[account]
#[derive(Debug, PartialEq)]
pub struct LotteryRound {
    /// The bump seed used for deriving the PDA address of this account.
    pub bump: u8,

    /// Monotonically increasing identifier of the round.
    pub round_id: u64,

    /// The price (in lamports) required to purchase a single ticket.
    pub ticket_price: u64,

    /// The total amount of SOL (in lamports) accumulated in the pot.
    pub pot_amount: u64,

    pub status: RoundStatus,

    /// Buyers in purchase order. One entry per ticket.
    pub participants: Vec<Pubkey>,

    /// The authority responsible for drawing and resetting rounds.
    pub authority: Pubkey,
}

/// Identifier of a locally tracked purchase attempt.
pub type IntentId = u64;

/// Where a participant entry came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EntryOrigin {
    /// Read from the round account.
    Chain,
    /// Appended by an applied `TicketPurchased` event.
    Event(EventId),
    /// Speculative, owned by an in-flight intent.
    Optimistic(IntentId),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Participant {
    pub account: Pubkey,
    pub amount: u64,
    pub origin: EntryOrigin,
    /// On-chain ticket index. `None` while the entry is speculative.
    pub ticket: Option<u64>,
}

impl Participant {
    pub fn is_optimistic(&self) -> bool {
        matches!(self.origin, EntryOrigin::Optimistic(_))
    }
}

/// Local view of the current round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Round {
    pub round_id: u64,
    pub ticket_price: u64,
    pub participants: Vec<Participant>,
    pub pot_size: u64,
    pub status: RoundStatus,
}

impl Round {
    /// Fresh round built from a full account read.
    pub fn from_account(account: &LotteryRound) -> Self {
        let participants = account
            .participants
            .iter()
            .enumerate()
            .map(|(index, buyer)| Participant {
                account: *buyer,
                amount: account.ticket_price,
                origin: EntryOrigin::Chain,
                ticket: Some(index as u64),
            })
            .collect();
        let mut round = Self {
            round_id: account.round_id,
            ticket_price: account.ticket_price,
            participants,
            pot_size: 0,
            status: account.status,
        };
        round.recompute_pot();
        round
    }

    /// Empty open round, as announced by a `RoundStarted` event.
    pub fn open(round_id: u64, ticket_price: u64) -> Self {
        Self {
            round_id,
            ticket_price,
            participants: Vec::new(),
            pot_size: 0,
            status: RoundStatus::Open,
        }
    }

    pub fn accounts(&self) -> Vec<Pubkey> {
        self.participants.iter().map(|p| p.account).collect()
    }

    /// Number of confirmed entries. Confirmed entries always precede
    /// optimistic ones.
    pub fn confirmed_len(&self) -> usize {
        self.participants
            .iter()
            .take_while(|p| !p.is_optimistic())
            .count()
    }

    pub fn optimistic_entry(&self, intent: IntentId) -> Option<&Participant> {
        self.participants
            .iter()
            .find(|p| p.origin == EntryOrigin::Optimistic(intent))
    }

    pub(crate) fn recompute_pot(&mut self) {
        self.pot_size = self
            .participants
            .iter()
            .fold(0u64, |pot, p| pot.saturating_add(p.amount));
    }

    /// `pot_size == ticket_price * |participants|`.
    pub fn is_balanced(&self) -> bool {
        (self.participants.len() as u64)
            .checked_mul(self.ticket_price)
            .map_or(false, |expected| expected == self.pot_size)
    }
}

/// Outcome of a finished round. Never mutated once recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WinnerRecord {
    pub round_id: u64,
    pub account: Pubkey,
    pub payout: u64,
}
