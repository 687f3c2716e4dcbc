use std::time::Duration;

use solana_program::hash::Hash;

use crate::constants::*;

/// Bounded exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` retries forever.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay)
    }

    /// Whether another attempt is allowed after `attempts` have been made.
    pub fn allows(&self, attempts: u32) -> bool {
        self.max_attempts == 0 || attempts < self.max_attempts
    }
}

/// Confirmation policy for submitted transactions.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxPolicy {
    pub confirmation_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for TxPolicy {
    fn default() -> Self {
        Self {
            confirmation_timeout: CONFIRMATION_TIMEOUT,
            poll_interval: CONFIRMATION_POLL_INTERVAL,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Base58 address of the lottery program.
    pub program_id: String,
    /// Genesis hash of the cluster the program is deployed on.
    pub expected_chain: Hash,
    pub read_retry: RetryPolicy,
    pub subscription_retry: RetryPolicy,
    pub tx: TxPolicy,
    /// Periodic refresh cadence. `None` relies on events alone.
    pub refresh_interval: Option<Duration>,
    /// Wait between a `WinnerPicked` event and the refresh that picks up
    /// the next round.
    pub rollover_refresh_delay: Duration,
    pub store_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            program_id: crate::ID.to_string(),
            expected_chain: DEVNET_GENESIS.parse().unwrap_or_default(),
            read_retry: RetryPolicy {
                max_attempts: READ_RETRY_ATTEMPTS,
                base_delay: READ_RETRY_BASE_DELAY,
                max_delay: READ_RETRY_MAX_DELAY,
            },
            subscription_retry: RetryPolicy {
                max_attempts: SUBSCRIPTION_RETRY_ATTEMPTS,
                base_delay: SUBSCRIPTION_RETRY_BASE_DELAY,
                max_delay: SUBSCRIPTION_RETRY_MAX_DELAY,
            },
            tx: TxPolicy::default(),
            refresh_interval: Some(REFRESH_INTERVAL),
            rollover_refresh_delay: ROLLOVER_REFRESH_DELAY,
            store_capacity: STORE_CHANNEL_CAPACITY,
        }
    }
}
