use anchor_lang::prelude::*;
use anchor_lang::Discriminator;

use crate::provider::TxSignature;

#[event]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TicketPurchased {
    pub round_id: u64,
    pub buyer: Pubkey,
    pub amount: u64,
    /// Position of the ticket in the round's participant list.
    pub ticket_index: u64,
}

#[event]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WinnerPicked {
    pub round_id: u64,
    pub winner: Pubkey,
    pub payout: u64,
}

#[event]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundStarted {
    pub round_id: u64,
    pub ticket_price: u64,
}

/// Identifies the `index`-th event emitted by transaction `signature`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EventId {
    pub signature: TxSignature,
    pub index: u32,
}

impl EventId {
    pub fn new(signature: TxSignature, index: u32) -> Self {
        Self { signature, index }
    }
}

/// Decoded program event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LotteryEvent {
    TicketPurchased(TicketPurchased),
    WinnerPicked(WinnerPicked),
    RoundStarted(RoundStarted),
}

impl LotteryEvent {
    /// Decodes an Anchor event payload (8-byte discriminator followed by the
    /// borsh body). Returns `None` for events this client does not track or
    /// for malformed payloads.
    pub fn decode(data: &[u8]) -> Option<Self> {
        if data.len() < 8 {
            return None;
        }
        let (disc, mut body) = data.split_at(8);

        if disc == &TicketPurchased::DISCRIMINATOR[..] {
            TicketPurchased::deserialize(&mut body)
                .ok()
                .map(Self::TicketPurchased)
        } else if disc == &WinnerPicked::DISCRIMINATOR[..] {
            WinnerPicked::deserialize(&mut body)
                .ok()
                .map(Self::WinnerPicked)
        } else if disc == &RoundStarted::DISCRIMINATOR[..] {
            RoundStarted::deserialize(&mut body)
                .ok()
                .map(Self::RoundStarted)
        } else {
            None
        }
    }

    /// Decodes every recognised event of a transaction, keyed by its
    /// position among the transaction's event payloads.
    pub fn decode_all(signature: &TxSignature, payloads: &[Vec<u8>]) -> Vec<(EventId, Self)> {
        payloads
            .iter()
            .enumerate()
            .filter_map(|(index, data)| {
                Self::decode(data).map(|event| (EventId::new(signature.clone(), index as u32), event))
            })
            .collect()
    }

    pub fn round_id(&self) -> u64 {
        match self {
            Self::TicketPurchased(e) => e.round_id,
            Self::WinnerPicked(e) => e.round_id,
            Self::RoundStarted(e) => e.round_id,
        }
    }

    /// Anchor wire encoding, as emitted by the program.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::TicketPurchased(e) => anchor_lang::Event::data(e),
            Self::WinnerPicked(e) => anchor_lang::Event::data(e),
            Self::RoundStarted(e) => anchor_lang::Event::data(e),
        }
    }
}
