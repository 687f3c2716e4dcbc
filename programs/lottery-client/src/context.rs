//! Application-facing surface tying the components together.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use solana_program::pubkey::Pubkey;
use tokio::{sync::watch, task::JoinHandle};
use tracing::{debug, info, warn};

use crate::{
    components::{
        Connection, ContractBinding, EventSubscriber, ProviderConnector, PurchaseStatus,
        RoundStateStore, StoreSnapshot, TransactionManager,
    },
    config::ClientConfig,
    error::{ClientError, ConnectionError},
    provider::WalletProvider,
    state::{IntentId, Round, WinnerRecord},
    utils::lock,
};

/// Everything bound to one connected account. Dropping it stops the
/// background tasks.
struct Session {
    account: Pubkey,
    binding: Arc<ContractBinding>,
    store: RoundStateStore,
    transactions: TransactionManager,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Session {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
        debug!(account = %self.account, "session closed");
    }
}

/// Lottery client for one wallet.
///
/// Construct it with [`LotteryContext::new`], call
/// [`connect`](LotteryContext::connect), then read round data and start
/// purchases. Switching accounts in the wallet rebinds everything for the
/// new account; disconnecting tears it down.
pub struct LotteryContext {
    config: ClientConfig,
    connector: ProviderConnector,
    session: Mutex<Option<Session>>,
    generation: AtomicU64,
    snapshots: Arc<watch::Sender<StoreSnapshot>>,
}

impl LotteryContext {
    /// `provider` is `None` when no wallet was detected.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>, config: ClientConfig) -> Arc<Self> {
        let (snapshots, _) = watch::channel(StoreSnapshot::default());
        let context = Arc::new(Self {
            config,
            connector: ProviderConnector::new(provider),
            session: Mutex::new(None),
            generation: AtomicU64::new(0),
            snapshots: Arc::new(snapshots),
        });

        let weak = Arc::downgrade(&context);
        context
            .connector
            .on_account_changed(move |next| on_account_changed(&weak, next));
        context
    }

    /// Connects the wallet and binds a session for its account. Fails with
    /// [`ClientError::AccountChanged`] if the wallet switched accounts before
    /// the session was bound; the new account is bound in the background.
    pub async fn connect(&self) -> Result<Pubkey, ClientError> {
        let account = self.connector.connect().await?;
        self.bind(account).await?;
        Ok(account)
    }

    /// Drops the session and forgets the connection.
    pub fn disconnect(&self) {
        self.connector.disconnect();
        self.teardown();
    }

    pub fn address(&self) -> Option<Pubkey> {
        self.connector.address()
    }

    pub fn is_connecting(&self) -> bool {
        self.connector.connection().is_connecting
    }

    pub fn connection(&self) -> watch::Receiver<Connection> {
        self.connector.watch()
    }

    pub fn round(&self) -> Option<Round> {
        self.snapshots.borrow().round.clone()
    }

    pub fn winners(&self) -> Vec<WinnerRecord> {
        self.snapshots.borrow().winners.clone()
    }

    /// Whether the last refresh failed after all retries.
    pub fn is_stale(&self) -> bool {
        self.snapshots.borrow().stale
    }

    /// Round state of the current session. Survives account switches; the
    /// value resets to empty while no session is bound.
    pub fn snapshots(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn status(&self) -> PurchaseStatus {
        self.transactions()
            .map(|transactions| transactions.status())
            .unwrap_or_default()
    }

    /// Purchase tracking of the current session.
    pub fn transactions(&self) -> Option<TransactionManager> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.transactions.clone())
    }

    pub fn program_id(&self) -> Option<Pubkey> {
        lock(&self.session)
            .as_ref()
            .map(|session| session.binding.program_id())
    }

    /// Buys one ticket of the current round for the connected account.
    pub async fn purchase(&self) -> Result<IntentId, ClientError> {
        let (account, transactions) = lock(&self.session)
            .as_ref()
            .map(|session| (session.account, session.transactions.clone()))
            .ok_or(ClientError::NotConnected)?;
        Ok(transactions.buy(account).await?)
    }

    /// Forces a full read of the round.
    pub async fn refresh(&self) -> Result<(), ClientError> {
        let store = lock(&self.session)
            .as_ref()
            .map(|session| session.store.clone())
            .ok_or(ClientError::NotConnected)?;
        store.refresh().await?;
        Ok(())
    }

    async fn bind(&self, account: Pubkey) -> Result<(), ClientError> {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        self.drop_session();

        let provider = self
            .connector
            .provider()
            .ok_or(ConnectionError::NoProviderFound)?;
        let binding = Arc::new(
            ContractBinding::new(
                provider.clone(),
                &self.config.program_id,
                self.config.expected_chain,
            )
            .await?,
        );

        let store = RoundStateStore::spawn(binding.clone(), &self.config);
        let mut tasks = vec![EventSubscriber::new(
            provider,
            binding.program_id(),
            store.clone(),
            self.config.subscription_retry,
        )
        .spawn()];
        if let Some(interval) = self.config.refresh_interval {
            tasks.push(store.spawn_poller(interval));
        }
        let transactions = TransactionManager::new(binding.clone(), store.clone(), self.config.tx);

        if let Err(err) = store.refresh().await {
            warn!(%account, error = %err, "initial round read failed");
        }

        let mut slot = lock(&self.session);
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!(%account, "account changed while binding, session discarded");
            for task in &tasks {
                task.abort();
            }
            return Err(ClientError::AccountChanged);
        }
        tasks.push(forward(store.subscribe(), self.snapshots.clone()));
        *slot = Some(Session {
            account,
            binding,
            store,
            transactions,
            tasks,
        });
        info!(%account, "session bound");
        Ok(())
    }

    fn teardown(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.drop_session();
    }

    fn drop_session(&self) {
        let previous = lock(&self.session).take();
        if previous.is_some() {
            drop(previous);
            self.snapshots.send_replace(StoreSnapshot::default());
        }
    }
}

fn on_account_changed(context: &Weak<LotteryContext>, next: Option<Pubkey>) {
    let Some(context) = context.upgrade() else {
        return;
    };
    match next {
        Some(account) => {
            // The previous account's state must not be visible past this point.
            context.teardown();
            tokio::spawn(async move {
                match context.bind(account).await {
                    Ok(()) | Err(ClientError::AccountChanged) => {}
                    Err(err) => warn!(%account, error = %err, "rebinding after account switch failed"),
                }
            });
        }
        None => context.teardown(),
    }
}

/// Mirrors one session's store into the context-wide snapshot channel.
fn forward(
    mut source: watch::Receiver<StoreSnapshot>,
    sink: Arc<watch::Sender<StoreSnapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let snapshot = source.borrow_and_update().clone();
            sink.send_replace(snapshot);
            if source.changed().await.is_err() {
                break;
            }
        }
    })
}
