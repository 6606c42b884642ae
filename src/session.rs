//! Authorization session.
//!
//! Glues the pieces together for one connected identity: connects the
//! identity provider, initializes bindings, bridges contract events to the
//! notification bus, keeps the identity status fresh when relevant events
//! arrive, and tears everything down on logout.
//!
//! Every teardown starts a new epoch. A status read that began in an older
//! epoch is discarded when it completes, so a logout can never be undone by
//! work that was already in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use tokio::sync::{RwLock, mpsc};
use tokio::task::JoinHandle;

use crate::cache::{SessionCache, SessionStorage, status_key};
use crate::chain::{Address, BindingFactory, IdentityProvider};
use crate::config::Config;
use crate::connection::ConnectionManager;
use crate::dispatch::CallDispatcher;
use crate::domain::{
    DisputeRegistryClient, IdentityRegistryClient, LandRegistryClient, TransactionRegistryClient,
};
use crate::error::{ConnectionError, Error};
use crate::events::{
    AllowList, BridgeHandle, EventBridge, LocalBus, Notification, NotificationBus,
    SubscriptionId, default_allow_list, notification_names,
};
use crate::retry::RetryPolicy;
use crate::role::{
    IdentityStatus, Role, RouteDecision, RouteId, effective_role, guard_route, has_access,
    redirect_route, resolve_status,
};

#[derive(Default)]
struct SessionState {
    address: Option<Address>,
    status: Option<IdentityStatus>,
    bridge: Option<BridgeHandle>,
    subscriptions: Vec<SubscriptionId>,
    refresher: Option<JoinHandle<()>>,
}

/// Clears the refresh flag when a refresh ends, however it ends.
struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// One connected identity and everything derived from it.
pub struct AuthSession {
    provider: Arc<dyn IdentityProvider>,
    dispatcher: Arc<CallDispatcher>,
    cache: SessionCache,
    bus: Arc<dyn NotificationBus>,
    allow_list: AllowList,
    confirmation: RetryPolicy,
    state: RwLock<SessionState>,
    refreshing: AtomicBool,
    /// Advanced under the state write lock on every teardown.
    epoch: AtomicU64,
}

impl AuthSession {
    /// Assemble a session with the default confirmation budget.
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        dispatcher: Arc<CallDispatcher>,
        cache: SessionCache,
        bus: Arc<dyn NotificationBus>,
        allow_list: AllowList,
    ) -> Arc<Self> {
        Self::assemble(
            provider,
            dispatcher,
            cache,
            bus,
            allow_list,
            RetryPolicy::default(),
        )
    }

    /// Wire a session from loaded configuration with a local bus and the
    /// default event allow-list. Registry clients handed out by the session
    /// confirm mutations within the configured budget.
    pub fn from_config(
        config: &Config,
        provider: Arc<dyn IdentityProvider>,
        factory: Arc<dyn BindingFactory>,
        storage: Arc<dyn SessionStorage>,
    ) -> Arc<Self> {
        let manager = ConnectionManager::new(
            config.network.chain_id,
            config.contracts.clone(),
            factory,
        );
        let dispatcher = Arc::new(CallDispatcher::new(manager, config.dispatch.gas_limit));
        Self::assemble(
            provider,
            dispatcher,
            SessionCache::new(storage, config.cache.ttl),
            Arc::new(LocalBus::new()),
            default_allow_list(),
            config.confirmation.policy(),
        )
    }

    fn assemble(
        provider: Arc<dyn IdentityProvider>,
        dispatcher: Arc<CallDispatcher>,
        cache: SessionCache,
        bus: Arc<dyn NotificationBus>,
        allow_list: AllowList,
        confirmation: RetryPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            dispatcher,
            cache,
            bus,
            allow_list,
            confirmation,
            state: RwLock::new(SessionState::default()),
            refreshing: AtomicBool::new(false),
            epoch: AtomicU64::new(0),
        })
    }

    pub fn dispatcher(&self) -> &Arc<CallDispatcher> {
        &self.dispatcher
    }

    pub fn bus(&self) -> &Arc<dyn NotificationBus> {
        &self.bus
    }

    pub fn cache(&self) -> &SessionCache {
        &self.cache
    }

    pub fn confirmation_policy(&self) -> RetryPolicy {
        self.confirmation
    }

    pub fn identity_registry(&self) -> IdentityRegistryClient {
        IdentityRegistryClient::new(self.dispatcher.clone(), self.confirmation)
    }

    pub fn land_registry(&self) -> LandRegistryClient {
        LandRegistryClient::new(self.dispatcher.clone(), self.confirmation)
    }

    pub fn transaction_registry(&self) -> TransactionRegistryClient {
        TransactionRegistryClient::new(self.dispatcher.clone())
    }

    pub fn dispute_registry(&self) -> DisputeRegistryClient {
        DisputeRegistryClient::new(self.dispatcher.clone())
    }

    /// Connect the identity provider and bring the session up.
    ///
    /// Fails before any binding is created if the signer does not belong to
    /// the reported address. A previous connection, if any, is torn down
    /// first. If the identity status cannot be resolved the session is torn
    /// down again rather than left connected with an unknown role.
    pub async fn connect(self: &Arc<Self>) -> Result<IdentityStatus, Error> {
        let epoch = self.retire(false).await;

        let connection = self.provider.connect().await?;
        let signer_address = connection.signer.address().await?;
        if signer_address != connection.address {
            return Err(ConnectionError::SignerMismatch {
                identity: connection.address,
                signer: signer_address,
            }
            .into());
        }
        let address = connection.address;

        self.dispatcher
            .bind_identity(connection.network, connection.signer)
            .await;
        let bindings = match self.dispatcher.bindings().await {
            Ok(bindings) => bindings,
            Err(e) => {
                self.dispatcher.clear_identity().await;
                return Err(e.into());
            }
        };

        let bridge = EventBridge::attach(&bindings, &self.allow_list, self.bus.clone());
        let (subscriptions, refresher) = self.subscribe_refresh();
        let installed = SessionState {
            address: Some(address),
            status: None,
            bridge: Some(bridge),
            subscriptions,
            refresher: Some(refresher),
        };
        if let Some(orphaned) = self.install(epoch, installed).await {
            self.release(orphaned).await;
            return Err(ConnectionError::Superseded("session connect").into());
        }

        let (status, fresh) = match self.cache.get::<IdentityStatus>(&status_key(&address)) {
            Some(cached) if cached.address == address => {
                tracing::debug!(%address, "identity status served from cache");
                (cached, false)
            }
            _ => match resolve_status(&self.dispatcher, address).await {
                Ok(status) => (status, true),
                Err(e) => {
                    tracing::warn!(
                        %address,
                        error = %e,
                        "identity status unresolved; closing session"
                    );
                    self.abandon(epoch).await;
                    return Err(e.into());
                }
            },
        };
        if !self.publish(epoch, &status, fresh).await {
            return Err(ConnectionError::Superseded("session connect").into());
        }

        tracing::info!(%address, role = %effective_role(&status), "session connected");
        Ok(status)
    }

    /// Subscribe to every bridged notification; each one schedules a refresh.
    ///
    /// At most one refresh waits behind the running one. Notifications that
    /// arrive while a refresh is already pending are dropped.
    fn subscribe_refresh(self: &Arc<Self>) -> (Vec<SubscriptionId>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<String>(1);

        let subscriptions = notification_names(&self.allow_list)
            .iter()
            .map(|name| {
                let tx = tx.clone();
                self.bus.subscribe(
                    name,
                    Arc::new(move |notification: &Notification| {
                        if tx.try_send(notification.name.clone()).is_err() {
                            tracing::trace!(
                                notification = %notification.name,
                                "refresh already pending; dropping notification"
                            );
                        }
                    }),
                )
            })
            .collect();

        let session: Weak<Self> = Arc::downgrade(self);
        let refresher = tokio::spawn(async move {
            while let Some(name) = rx.recv().await {
                let Some(session) = session.upgrade() else {
                    break;
                };
                tracing::debug!(notification = %name, "refreshing identity status");
                if let Err(e) = session.refresh_status().await {
                    tracing::warn!(notification = %name, error = %e, "status refresh failed");
                }
            }
        });

        (subscriptions, refresher)
    }

    /// Re-read the identity status from the ledger.
    ///
    /// Returns `Ok(None)` without doing anything when another refresh is
    /// already running or no identity is connected, and discards the result
    /// when the session was torn down while the read was in flight.
    pub async fn refresh_status(&self) -> Result<Option<IdentityStatus>, Error> {
        if self.refreshing.swap(true, Ordering::SeqCst) {
            tracing::debug!("status refresh already running; dropping request");
            return Ok(None);
        }
        let _guard = RefreshGuard(&self.refreshing);

        let (address, epoch) = {
            let state = self.state.read().await;
            (state.address, self.epoch.load(Ordering::SeqCst))
        };
        let Some(address) = address else {
            return Ok(None);
        };

        let resolved = resolve_status(&self.dispatcher, address).await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            tracing::debug!(%address, "session ended during refresh; discarding result");
            return Ok(None);
        }
        let status = resolved?;
        if !self.publish(epoch, &status, true).await {
            return Ok(None);
        }
        Ok(Some(status))
    }

    pub async fn address(&self) -> Option<Address> {
        self.state.read().await.address
    }

    pub async fn current_status(&self) -> Option<IdentityStatus> {
        self.state.read().await.status.clone()
    }

    /// Current role; `Guest` when nothing is connected.
    pub async fn role(&self) -> Role {
        self.current_status()
            .await
            .map_or(Role::Guest, |status| effective_role(&status))
    }

    pub async fn landing_route(&self) -> RouteId {
        self.current_status()
            .await
            .map_or(RouteId::Register, |status| redirect_route(&status))
    }

    pub async fn has_access(&self, required: Role) -> bool {
        match self.current_status().await {
            Some(status) => has_access(&status, required),
            None => required == Role::Guest,
        }
    }

    pub async fn guard(&self, required: Role) -> RouteDecision {
        match self.current_status().await {
            Some(status) => guard_route(&status, required),
            None if required == Role::Guest => RouteDecision::Allow,
            None => RouteDecision::Redirect(RouteId::Register),
        }
    }

    /// End the session.
    ///
    /// The cache is cleared before anything else so no later reader can see
    /// authorization data from this identity.
    pub async fn logout(&self) {
        self.retire(true).await;
        self.dispatcher.manager().reset().await;
        self.provider.disconnect().await;
        tracing::info!("session logged out");
    }

    /// Start a new epoch and release everything the old one held. Returns
    /// the new epoch.
    async fn retire(&self, clear_cache: bool) -> u64 {
        let (previous, epoch) = {
            let mut state = self.state.write().await;
            let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            if clear_cache {
                self.cache.invalidate_all();
            }
            (std::mem::take(&mut *state), epoch)
        };
        self.release(previous).await;
        epoch
    }

    /// Retire `epoch` if it is still the live one.
    async fn abandon(&self, epoch: u64) {
        let previous = {
            let mut state = self.state.write().await;
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return;
            }
            self.epoch.fetch_add(1, Ordering::SeqCst);
            std::mem::take(&mut *state)
        };
        self.release(previous).await;
    }

    /// Install a freshly connected state. Hands it back when `epoch` has
    /// already been retired.
    async fn install(&self, epoch: u64, installed: SessionState) -> Option<SessionState> {
        let mut state = self.state.write().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Some(installed);
        }
        *state = installed;
        None
    }

    /// Record `status` if `epoch` is still live.
    async fn publish(&self, epoch: u64, status: &IdentityStatus, write_cache: bool) -> bool {
        let mut state = self.state.write().await;
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return false;
        }
        if write_cache {
            self.cache.set(&status_key(&status.address), status);
        }
        state.status = Some(status.clone());
        true
    }

    async fn release(&self, state: SessionState) {
        if let Some(bridge) = state.bridge {
            bridge.detach();
        }
        for id in state.subscriptions {
            self.bus.unsubscribe(id);
        }
        if let Some(refresher) = state.refresher {
            refresher.abort();
        }
        self.dispatcher.clear_identity().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::cache::MemorySessionStorage;
    use crate::chain::{Connection, Registry};
    use crate::config::ContractsConfig;
    use crate::testing::{
        MemoryBindingFactory, MemoryContract, MemoryProvider, MemorySigner, deployed_network,
        registry_address,
    };

    const CHAIN_ID: u64 = 31337;

    fn user() -> Address {
        Address::repeat_byte(0x42)
    }

    struct Fixture {
        session: Arc<AuthSession>,
        identity: Arc<MemoryContract>,
        provider: Arc<MemoryProvider>,
        storage: Arc<MemorySessionStorage>,
        bus: Arc<LocalBus>,
    }

    /// Ledger reads behind one status resolution for a non-rejected user.
    const STATUS_READS: usize = 6;

    /// A registered, unverified user.
    fn identity_contract() -> Arc<MemoryContract> {
        let identity = Arc::new(
            MemoryContract::new(Registry::Identity, registry_address(Registry::Identity))
                .with_events(&["UserRegistered", "UserVerified", "UserRejected"]),
        );
        for method in ["isUserVerified", "isUserRejected", "isInspector", "isAdmin"] {
            identity.set_view(method, json!(false));
        }
        identity.set_view("isUserRegistered", json!(true));
        identity.set_view("getCooldownRemaining", json!(0));
        identity
    }

    fn contracts() -> ContractsConfig {
        let mut contracts = ContractsConfig::default();
        for registry in Registry::ALL {
            contracts.set(registry, registry_address(registry));
        }
        contracts
    }

    fn provider_for(signer: Address) -> Arc<MemoryProvider> {
        Arc::new(MemoryProvider::new(Connection {
            address: user(),
            network: Arc::new(deployed_network(CHAIN_ID)),
            signer: Arc::new(MemorySigner(signer)),
        }))
    }

    fn fixture_with_signer(signer: Address) -> Fixture {
        let identity = identity_contract();
        let manager = ConnectionManager::new(
            CHAIN_ID,
            contracts(),
            Arc::new(MemoryBindingFactory::new([identity.clone()])),
        );
        let provider = provider_for(signer);
        let storage = Arc::new(MemorySessionStorage::new());
        let bus = Arc::new(LocalBus::new());
        let session = AuthSession::new(
            provider.clone(),
            Arc::new(CallDispatcher::new(manager, 3_000_000)),
            SessionCache::new(storage.clone(), Duration::from_secs(30)),
            bus.clone(),
            default_allow_list(),
        );
        Fixture {
            session,
            identity,
            provider,
            storage,
            bus,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_signer(user())
    }

    #[tokio::test]
    async fn connect_resolves_and_caches_status() {
        let f = fixture();
        let status = f.session.connect().await.unwrap();

        assert!(status.registered);
        assert!(!status.verified);
        assert_eq!(f.session.role().await, Role::Registered);
        assert_eq!(f.session.landing_route().await, RouteId::PendingVerification);
        assert!(f.storage.contains_key(&status_key(&user())));
        assert_eq!(f.identity.listener_count(), 3);
    }

    #[tokio::test]
    async fn reconnect_within_ttl_uses_cache() {
        let f = fixture();
        f.session.connect().await.unwrap();
        let reads = f.identity.view_calls();

        f.session.connect().await.unwrap();
        assert_eq!(f.identity.view_calls(), reads);
        assert_eq!(f.identity.listener_count(), 3);
    }

    #[tokio::test]
    async fn signer_mismatch_fails_before_binding() {
        let f = fixture_with_signer(Address::repeat_byte(0x07));
        let err = f.session.connect().await.unwrap_err();

        assert!(matches!(
            err,
            Error::Connection(ConnectionError::SignerMismatch { .. })
        ));
        assert!(!f.session.dispatcher().manager().is_initialized().await);
        assert_eq!(f.session.role().await, Role::Guest);
    }

    #[tokio::test]
    async fn contract_event_triggers_refresh() {
        let f = fixture();
        f.session.connect().await.unwrap();

        f.identity.set_view("isUserVerified", json!(true));
        f.identity.emit("UserVerified", vec![json!(user().to_string())]);

        tokio::time::timeout(Duration::from_secs(2), async {
            while f.session.role().await != Role::Verified {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("status refreshed after event");
        assert_eq!(f.session.guard(Role::Verified).await, RouteDecision::Allow);
    }

    #[tokio::test]
    async fn overlapping_refresh_is_dropped() {
        let f = fixture();
        f.session.connect().await.unwrap();

        f.session.refreshing.store(true, Ordering::SeqCst);
        assert_eq!(f.session.refresh_status().await.unwrap(), None);

        f.session.refreshing.store(false, Ordering::SeqCst);
        let refreshed = f.session.refresh_status().await.unwrap();
        assert_eq!(refreshed.map(|s| s.address), Some(user()));
        assert!(!f.session.refreshing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_refresh_releases_guard() {
        let f = fixture();
        f.session.connect().await.unwrap();
        f.identity.on_view("isAdmin", |_| {
            Err(crate::error::ChainError::Rpc("node unavailable".into()))
        });

        assert!(f.session.refresh_status().await.is_err());
        assert!(!f.session.refreshing.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn logout_tears_everything_down() {
        let f = fixture();
        f.session.connect().await.unwrap();
        assert!(f.bus.subscriber_count() > 0);

        f.session.logout().await;

        assert!(f.storage.is_empty());
        assert_eq!(f.identity.listener_count(), 0);
        assert_eq!(f.bus.subscriber_count(), 0);
        assert!(!f.session.dispatcher().manager().is_initialized().await);
        assert!(!f.session.dispatcher().has_identity().await);
        assert_eq!(f.provider.disconnects(), 1);
        assert_eq!(f.session.current_status().await, None);
        assert_eq!(
            f.session.guard(Role::Registered).await,
            RouteDecision::Redirect(RouteId::Register)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn notification_burst_leaves_one_refresh_pending() {
        let f = fixture();
        f.session.connect().await.unwrap();
        f.identity.set_view_latency(Duration::from_millis(50));
        let before = f.identity.view_calls();

        f.identity.emit("UserVerified", vec![]);
        tokio::time::sleep(Duration::from_millis(10)).await;
        for _ in 0..5 {
            f.identity.emit("UserVerified", vec![]);
        }
        tokio::time::sleep(Duration::from_secs(1)).await;

        // The refresh that was running plus a single one queued behind it.
        assert_eq!((f.identity.view_calls() - before) / STATUS_READS, 2);
        assert!(!f.session.refreshing.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn logout_discards_refresh_in_flight() {
        let f = fixture();
        f.session.connect().await.unwrap();
        f.identity.set_view_latency(Duration::from_millis(50));

        let refresh = tokio::spawn({
            let session = f.session.clone();
            async move { session.refresh_status().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.session.logout().await;

        let outcome = refresh.await.unwrap();
        assert!(matches!(outcome, Ok(None)));
        assert!(f.storage.is_empty());
        assert_eq!(f.session.current_status().await, None);
        assert_eq!(f.session.role().await, Role::Guest);
    }

    #[tokio::test]
    async fn unresolved_status_closes_the_session() {
        let f = fixture();
        f.identity.on_view("isAdmin", |_| {
            Err(crate::error::ChainError::Rpc("node unavailable".into()))
        });

        assert!(f.session.connect().await.is_err());
        assert_eq!(f.session.address().await, None);
        assert_eq!(f.session.current_status().await, None);
        assert_eq!(f.identity.listener_count(), 0);
        assert_eq!(f.bus.subscriber_count(), 0);
        assert!(!f.session.dispatcher().has_identity().await);
        assert!(f.storage.is_empty());
        assert_eq!(
            f.session.guard(Role::Registered).await,
            RouteDecision::Redirect(RouteId::Register)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn configured_session_hands_out_budgeted_clients() {
        use crate::config::{CacheConfig, ConfirmationConfig, DispatchConfig, NetworkConfig};

        let config = Config {
            network: NetworkConfig {
                chain_id: CHAIN_ID,
                rpc_url: None,
                rpc_timeout: Duration::from_secs(5),
            },
            contracts: contracts(),
            dispatch: DispatchConfig {
                gas_limit: 1_234_567,
            },
            confirmation: ConfirmationConfig {
                max_attempts: 2,
                delay: Duration::from_millis(250),
            },
            cache: CacheConfig {
                ttl: Duration::from_secs(45),
            },
        };
        let lands = Arc::new(MemoryContract::new(
            Registry::Asset,
            registry_address(Registry::Asset),
        ));
        lands.on_transaction("removeLand", |_, _| Ok(true));
        lands.set_view("landExists", json!(true));

        let session = AuthSession::from_config(
            &config,
            provider_for(user()),
            Arc::new(MemoryBindingFactory::new([identity_contract(), lands.clone()])),
            Arc::new(MemorySessionStorage::new()),
        );
        assert_eq!(session.confirmation_policy(), config.confirmation.policy());
        assert_eq!(session.cache().ttl(), Duration::from_secs(45));
        session.connect().await.unwrap();

        let err = session.land_registry().remove_land(3).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Convergence(crate::error::ConvergenceError { attempts: 2, .. })
        ));
        assert_eq!(lands.view_calls(), 2);
        let sent = lands.sent_transactions();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].options.gas_limit, Some(1_234_567));
    }
}
