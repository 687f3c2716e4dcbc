use std::time::Duration;

/// Seed of the program-derived account holding the current round.
pub const LOTTERY_SEED: &[u8] = b"token_lottery";

/// Anchor sighash preimage for the ticket purchase instruction.
pub const BUY_TICKET_SIGHASH: &[u8] = b"global:buy_ticket";

/// Genesis hash of devnet, where the lottery program is deployed.
pub const DEVNET_GENESIS: &str = "EtWTRABZaYq6iMfeYKouRu166VU2xqa1wcaWoxPkrZBG";

pub const READ_RETRY_ATTEMPTS: u32 = 4;
pub const READ_RETRY_BASE_DELAY: Duration = Duration::from_millis(250);
pub const READ_RETRY_MAX_DELAY: Duration = Duration::from_secs(4);

/// Zero means the subscriber retries forever.
pub const SUBSCRIPTION_RETRY_ATTEMPTS: u32 = 0;
pub const SUBSCRIPTION_RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
pub const SUBSCRIPTION_RETRY_MAX_DELAY: Duration = Duration::from_secs(30);

pub const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(60);
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

pub const REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const ROLLOVER_REFRESH_DELAY: Duration = Duration::from_secs(2);

pub const STORE_CHANNEL_CAPACITY: usize = 256;
