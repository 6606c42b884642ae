//! End-to-end authorization flows over the in-memory ledger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde_json::json;

use registry_sync::cache::{MemorySessionStorage, SessionCache};
use registry_sync::chain::{Address, Connection, Registry};
use registry_sync::config::ContractsConfig;
use registry_sync::domain::IdentityRegistryClient;
use registry_sync::events::{LocalBus, default_allow_list};
use registry_sync::testing::{
    MemoryBindingFactory, MemoryContract, MemoryProvider, MemorySigner, deployed_network,
    registry_address,
};
use registry_sync::{
    AuthSession, CallDispatcher, ConnectionManager, Error, RetryPolicy, Role, RouteDecision,
    RouteId,
};

const CHAIN_ID: u64 = 11_155_111;

fn user() -> Address {
    Address::repeat_byte(0x42)
}

fn inspector() -> Address {
    Address::repeat_byte(0x1e)
}

fn contracts() -> ContractsConfig {
    let mut contracts = ContractsConfig::default();
    for registry in Registry::ALL {
        contracts.set(registry, registry_address(registry));
    }
    contracts
}

/// User registry where `user()` is registered and `inspector()` is an inspector.
fn identity_registry(verified: Arc<AtomicBool>) -> Arc<MemoryContract> {
    let contract = Arc::new(
        MemoryContract::new(Registry::Identity, registry_address(Registry::Identity)).with_events(
            &[
                "UserRegistered",
                "UserVerified",
                "UserRejected",
                "InspectorAdded",
                "InspectorRemoved",
            ],
        ),
    );
    let inspector_arg = json!(inspector().to_string());

    contract.set_view("isUserRegistered", json!(true));
    contract.set_view("isUserRejected", json!(false));
    contract.set_view("isAdmin", json!(false));
    contract.set_view("getCooldownRemaining", json!("0"));
    contract.on_view("isInspector", move |args| Ok(json!(args[0] == inspector_arg)));
    let flag = verified.clone();
    contract.on_view("isUserVerified", move |_| Ok(json!(flag.load(Ordering::SeqCst))));

    let weak: Weak<MemoryContract> = Arc::downgrade(&contract);
    contract.on_transaction("verifyUser", move |args, _| {
        verified.store(true, Ordering::SeqCst);
        if let Some(contract) = weak.upgrade() {
            contract.emit("UserVerified", args.to_vec());
        }
        Ok(true)
    });
    contract
}

fn dispatcher(factory: Arc<MemoryBindingFactory>, chain_id: u64) -> Arc<CallDispatcher> {
    Arc::new(CallDispatcher::new(
        ConnectionManager::new(chain_id, contracts(), factory),
        3_000_000,
    ))
}

fn user_session(
    factory: Arc<MemoryBindingFactory>,
    network_chain_id: u64,
) -> (Arc<AuthSession>, Arc<MemoryProvider>, Arc<MemorySessionStorage>) {
    let provider = Arc::new(MemoryProvider::new(Connection {
        address: user(),
        network: Arc::new(deployed_network(network_chain_id)),
        signer: Arc::new(MemorySigner(user())),
    }));
    let storage = Arc::new(MemorySessionStorage::new());
    let session = AuthSession::new(
        provider.clone(),
        dispatcher(factory, CHAIN_ID),
        SessionCache::new(storage.clone(), Duration::from_secs(30)),
        Arc::new(LocalBus::new()),
        default_allow_list(),
    );
    (session, provider, storage)
}

async fn wait_for_role(session: &AuthSession, role: Role) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while session.role().await != role {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("session never reached role {role}"));
}

#[tokio::test]
async fn inspector_verification_reaches_the_user_session() {
    let verified = Arc::new(AtomicBool::new(false));
    let identity = identity_registry(verified.clone());
    let factory = Arc::new(MemoryBindingFactory::new([identity.clone()]));

    let (session, _, _) = user_session(factory.clone(), CHAIN_ID);
    let status = session.connect().await.expect("user connects");
    assert!(status.registered && !status.verified);
    assert_eq!(
        session.guard(Role::Verified).await,
        RouteDecision::Redirect(RouteId::PendingVerification)
    );

    let inspector_dispatcher = dispatcher(factory, CHAIN_ID);
    inspector_dispatcher
        .bind_identity(
            Arc::new(deployed_network(CHAIN_ID)),
            Arc::new(MemorySigner(inspector())),
        )
        .await;
    let inspector_status = registry_sync::role::resolve_status(&inspector_dispatcher, inspector())
        .await
        .expect("inspector resolves");
    assert_eq!(
        registry_sync::role::effective_role(&inspector_status),
        Role::Inspector
    );

    IdentityRegistryClient::new(
        inspector_dispatcher,
        RetryPolicy::new(3, Duration::from_millis(10)),
    )
    .verify_user(user())
    .await
    .expect("verification converges");

    wait_for_role(&session, Role::Verified).await;
    assert_eq!(session.guard(Role::Verified).await, RouteDecision::Allow);
    assert_eq!(session.landing_route().await, RouteId::Dashboard);
    assert!(!session.has_access(Role::Inspector).await);
    assert!(verified.load(Ordering::SeqCst));
}

#[tokio::test]
async fn logout_forces_a_fresh_ledger_read() {
    let identity = identity_registry(Arc::new(AtomicBool::new(false)));
    let factory = Arc::new(MemoryBindingFactory::new([identity.clone()]));
    let (session, provider, storage) = user_session(factory, CHAIN_ID);

    session.connect().await.unwrap();
    let reads_after_first_connect = identity.view_calls();
    assert!(!storage.is_empty());

    session.logout().await;
    assert!(storage.is_empty());
    assert_eq!(identity.listener_count(), 0);
    assert_eq!(provider.disconnects(), 1);
    assert_eq!(session.role().await, Role::Guest);

    session.connect().await.unwrap();
    assert!(identity.view_calls() > reads_after_first_connect);
    assert_eq!(provider.connects(), 2);
}

#[tokio::test]
async fn wrong_network_gets_an_actionable_message() {
    let identity = identity_registry(Arc::new(AtomicBool::new(false)));
    let factory = Arc::new(MemoryBindingFactory::new([identity]));
    let (session, _, storage) = user_session(factory, 1);

    let err = session.connect().await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(err.user_message().contains("Switch to chain 11155111"));
    assert!(storage.is_empty());
    assert!(!session.dispatcher().has_identity().await);
}
