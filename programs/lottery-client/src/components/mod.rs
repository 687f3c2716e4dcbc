/// Typed reads and writes against the deployed lottery program, plus
/// confirmation tracking of submitted transactions.
pub mod binding;

/// Wallet connection and active-account tracking.
pub mod connector;

/// Pure round state machine behind the store. Applies events, full reads,
/// and optimistic entries without any I/O.
pub mod ledger;

/// Single-writer task owning the round ledger.
pub mod store;

/// Program event stream with resubscription.
pub mod subscriber;

/// Ticket purchase intents from local checks to a terminal status.
pub mod transactions;

pub use binding::*;
pub use connector::*;
pub use ledger::*;
pub use store::*;
pub use subscriber::*;
pub use transactions::*;
