use std::sync::{Arc, Mutex};

use solana_program::{hash::Hash, pubkey::Pubkey};
use tokio::{
    sync::{broadcast::error::RecvError, watch},
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{error::ConnectionError, provider::WalletProvider, utils::lock};

/// Connection state owned by [`ProviderConnector`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Connection {
    pub address: Option<Pubkey>,
    pub chain_id: Option<Hash>,
    pub is_connecting: bool,
}

type AccountHandler = Arc<dyn Fn(Option<Pubkey>) + Send + Sync>;

/// Connects to the detected wallet provider and tracks its active account.
pub struct ProviderConnector {
    provider: Option<Arc<dyn WalletProvider>>,
    state: Arc<watch::Sender<Connection>>,
    handler: Arc<Mutex<Option<AccountHandler>>>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl ProviderConnector {
    /// `provider` is `None` when no wallet was detected.
    pub fn new(provider: Option<Arc<dyn WalletProvider>>) -> Self {
        let (state, _) = watch::channel(Connection::default());
        Self {
            provider,
            state: Arc::new(state),
            handler: Arc::new(Mutex::new(None)),
            watcher: Mutex::new(None),
        }
    }

    pub fn provider(&self) -> Option<Arc<dyn WalletProvider>> {
        self.provider.clone()
    }

    pub fn connection(&self) -> Connection {
        self.state.borrow().clone()
    }

    pub fn address(&self) -> Option<Pubkey> {
        self.state.borrow().address
    }

    pub fn watch(&self) -> watch::Receiver<Connection> {
        self.state.subscribe()
    }

    /// Asks the wallet for its active account.
    ///
    /// The address reads as absent until this resolves, even if a previous
    /// connection existed.
    pub async fn connect(&self) -> Result<Pubkey, ConnectionError> {
        let provider = self
            .provider
            .clone()
            .ok_or(ConnectionError::NoProviderFound)?;

        self.stop_watcher();
        self.state.send_replace(Connection {
            is_connecting: true,
            ..Connection::default()
        });

        let result = async {
            let accounts = provider.request_accounts().await?;
            let account = accounts
                .first()
                .copied()
                .ok_or(ConnectionError::UserRejected)?;
            let chain_id = provider.chain_id().await?;
            Ok::<_, ConnectionError>((account, chain_id))
        }
        .await;

        match result {
            Ok((account, chain_id)) => {
                self.state.send_replace(Connection {
                    address: Some(account),
                    chain_id: Some(chain_id),
                    is_connecting: false,
                });
                self.spawn_watcher(provider.as_ref());
                info!(%account, %chain_id, "wallet connected");
                Ok(account)
            }
            Err(err) => {
                self.state.send_replace(Connection::default());
                warn!(error = %err, "wallet connection failed");
                Err(err)
            }
        }
    }

    /// Registers the handler invoked on every active-account change.
    /// Replaces any previously registered handler.
    pub fn on_account_changed<F>(&self, handler: F)
    where
        F: Fn(Option<Pubkey>) + Send + Sync + 'static,
    {
        *lock(&self.handler) = Some(Arc::new(handler));
    }

    /// Forgets the local connection. The wallet itself stays connected.
    pub fn disconnect(&self) {
        self.stop_watcher();
        self.state.send_replace(Connection::default());
        debug!("wallet connection cleared");
    }

    fn spawn_watcher(&self, provider: &dyn WalletProvider) {
        let mut changes = provider.subscribe_accounts();
        let state = self.state.clone();
        let handler = self.handler.clone();

        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(next) => apply_account_change(&state, &handler, next),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "account change stream lagged");
                    }
                    Err(RecvError::Closed) => {
                        apply_account_change(&state, &handler, None);
                        break;
                    }
                }
            }
        });
        *lock(&self.watcher) = Some(task);
    }

    fn stop_watcher(&self) {
        if let Some(task) = lock(&self.watcher).take() {
            task.abort();
        }
    }
}

impl Drop for ProviderConnector {
    fn drop(&mut self) {
        self.stop_watcher();
    }
}

fn apply_account_change(
    state: &watch::Sender<Connection>,
    handler: &Mutex<Option<AccountHandler>>,
    next: Option<Pubkey>,
) {
    let current = state.borrow().clone();
    if current.address == next {
        return;
    }

    match next {
        Some(account) => {
            info!(%account, "active account switched");
            state.send_replace(Connection {
                address: Some(account),
                chain_id: current.chain_id,
                is_connecting: false,
            });
        }
        None => {
            info!("wallet disconnected");
            state.send_replace(Connection::default());
        }
    }

    let handler = lock(handler).clone();
    if let Some(handler) = handler {
        handler(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_harness::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_connect_without_provider() {
        let connector = ProviderConnector::new(None);
        assert_eq!(
            connector.connect().await,
            Err(ConnectionError::NoProviderFound)
        );
        assert_eq!(connector.connection(), Connection::default());
    }

    #[tokio::test]
    async fn test_connect_records_account_and_chain() {
        let wallet = MockWallet::new();
        let connector = ProviderConnector::new(Some(wallet.clone()));

        let account = connector.connect().await.unwrap();
        assert_eq!(account, wallet.account());

        let connection = connector.connection();
        assert_eq!(connection.address, Some(wallet.account()));
        assert_eq!(connection.chain_id, Some(test_chain()));
        assert!(!connection.is_connecting);
    }

    #[tokio::test]
    async fn test_user_rejection_clears_previous_address() {
        let wallet = MockWallet::new();
        let connector = ProviderConnector::new(Some(wallet.clone()));
        connector.connect().await.unwrap();

        wallet.reject_accounts(true);
        assert_eq!(
            connector.connect().await,
            Err(ConnectionError::UserRejected)
        );
        assert_eq!(connector.address(), None);
    }

    #[tokio::test]
    async fn test_empty_account_list_counts_as_rejection() {
        let wallet = MockWallet::new();
        wallet.set_accounts(vec![]);
        let connector = ProviderConnector::new(Some(wallet.clone()));
        assert_eq!(
            connector.connect().await,
            Err(ConnectionError::UserRejected)
        );
    }

    #[tokio::test]
    async fn test_account_changes_reach_single_handler() {
        let wallet = MockWallet::new();
        let connector = ProviderConnector::new(Some(wallet.clone()));
        let first_calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let first_calls = first_calls.clone();
            connector.on_account_changed(move |_| {
                first_calls.fetch_add(1, Ordering::SeqCst);
            });
        }
        {
            let seen = seen.clone();
            connector.on_account_changed(move |next| seen.lock().unwrap().push(next));
        }

        connector.connect().await.unwrap();
        let mut connection = connector.watch();
        let other = Pubkey::new_unique();

        wallet.switch_account(Some(other));
        wait_for(&mut connection, |c| c.address == Some(other)).await;
        wallet.switch_account(None);
        wait_for(&mut connection, |c| c.address.is_none()).await;

        assert_eq!(first_calls.load(Ordering::SeqCst), 0);
        assert_eq!(*seen.lock().unwrap(), vec![Some(other), None]);
        assert_eq!(connector.connection().chain_id, None);
    }

    #[tokio::test]
    async fn test_disconnect_stops_following_the_wallet() {
        let wallet = MockWallet::new();
        let connector = ProviderConnector::new(Some(wallet.clone()));
        connector.connect().await.unwrap();

        connector.disconnect();
        assert_eq!(connector.connection(), Connection::default());

        wallet.switch_account(Some(Pubkey::new_unique()));
        tokio::task::yield_now().await;
        assert_eq!(connector.address(), None);
    }
}
