//! Contract connection manager.
//!
//! Owns the one binding set the process uses. Initialization is lazy and
//! single-flight: callers that arrive while an initialization is running
//! await the same shared future instead of starting another one. The
//! in-flight future is cleared once it settles, so a failed initialization
//! is retried by the next caller instead of wedging the manager.
//!
//! [`ConnectionManager::reset`] starts a new generation. An initialization
//! begun before the reset settles without installing its bindings.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::sync::Mutex;

use crate::chain::{Address, BindingFactory, ContractBinding, NetworkHandle, Registry, Signer};
use crate::config::ContractsConfig;
use crate::error::ConnectionError;

/// Signer-connected bindings for every registry.
pub struct BindingSet {
    signer_address: Address,
    chain_id: u64,
    bindings: HashMap<Registry, Arc<dyn ContractBinding>>,
}

impl BindingSet {
    /// Assemble a binding set from already-built bindings.
    pub fn from_bindings(
        signer_address: Address,
        chain_id: u64,
        bindings: impl IntoIterator<Item = (Registry, Arc<dyn ContractBinding>)>,
    ) -> Self {
        Self {
            signer_address,
            chain_id,
            bindings: bindings.into_iter().collect(),
        }
    }

    pub fn signer_address(&self) -> Address {
        self.signer_address
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn get(&self, registry: Registry) -> Option<&Arc<dyn ContractBinding>> {
        self.bindings.get(&registry)
    }

    pub fn registries(&self) -> impl Iterator<Item = Registry> + '_ {
        self.bindings.keys().copied()
    }
}

impl fmt::Debug for BindingSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut registries: Vec<_> = self.bindings.keys().collect();
        registries.sort();
        f.debug_struct("BindingSet")
            .field("signer_address", &self.signer_address)
            .field("chain_id", &self.chain_id)
            .field("registries", &registries)
            .finish()
    }
}

type InitFuture = Shared<BoxFuture<'static, Result<Arc<BindingSet>, ConnectionError>>>;

#[derive(Default)]
struct ManagerState {
    bindings: Option<Arc<BindingSet>>,
    in_flight: Option<InitFuture>,
    last_error: Option<ConnectionError>,
    last_initialized_at: Option<DateTime<Utc>>,
    initializations: u64,
    generation: u64,
}

struct Inner {
    chain_id: u64,
    contracts: ContractsConfig,
    factory: Arc<dyn BindingFactory>,
    state: Mutex<ManagerState>,
}

/// Diagnostics snapshot; not part of the call path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub is_initialized: bool,
    pub is_initializing: bool,
    pub last_error: Option<ConnectionError>,
    pub last_initialized_at: Option<DateTime<Utc>>,
    pub initializations: u64,
}

/// Owner of the process-wide binding set. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

impl ConnectionManager {
    pub fn new(
        supported_chain_id: u64,
        contracts: ContractsConfig,
        factory: Arc<dyn BindingFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                chain_id: supported_chain_id,
                contracts,
                factory,
                state: Mutex::new(ManagerState::default()),
            }),
        }
    }

    pub fn supported_chain_id(&self) -> u64 {
        self.inner.chain_id
    }

    /// Return the binding set for `signer`, creating it if needed.
    ///
    /// Reuses the current set when its signer address matches; otherwise the
    /// old set is discarded and a fresh one is built. Concurrent callers share
    /// one in-flight initialization.
    pub async fn get_or_init(
        &self,
        network: Option<Arc<dyn NetworkHandle>>,
        signer: Option<Arc<dyn Signer>>,
    ) -> Result<Arc<BindingSet>, ConnectionError> {
        let network = network.ok_or_else(|| {
            ConnectionError::Configuration("network handle is not available".to_string())
        })?;
        let signer = signer.ok_or_else(|| {
            ConnectionError::Configuration("signing capability is not available".to_string())
        })?;

        let init = {
            let mut state = self.inner.state.lock().await;
            if let Some(in_flight) = &state.in_flight {
                tracing::debug!("binding initialization in flight; joining it");
                in_flight.clone()
            } else {
                let signer_address = signer.address().await?;
                if let Some(bindings) = &state.bindings
                    && bindings.signer_address() == signer_address
                {
                    return Ok(bindings.clone());
                }
                if state.bindings.take().is_some() {
                    tracing::info!(%signer_address, "signer changed; rebuilding contract bindings");
                }
                let generation = state.generation;
                let init = initialize(
                    self.inner.clone(),
                    network,
                    signer,
                    signer_address,
                    generation,
                )
                .boxed()
                .shared();
                state.in_flight = Some(init.clone());
                init
            }
        };

        init.await
    }

    /// Drop the binding set and abandon any in-flight initialization. The
    /// next call initializes again.
    pub async fn reset(&self) {
        let mut state = self.inner.state.lock().await;
        state.generation += 1;
        state.bindings = None;
        state.in_flight = None;
        state.last_error = None;
    }

    /// The current binding set, without initializing.
    pub async fn current(&self) -> Option<Arc<BindingSet>> {
        self.inner.state.lock().await.bindings.clone()
    }

    pub async fn is_initialized(&self) -> bool {
        self.inner.state.lock().await.bindings.is_some()
    }

    pub async fn is_initializing(&self) -> bool {
        self.inner.state.lock().await.in_flight.is_some()
    }

    pub async fn last_error(&self) -> Option<ConnectionError> {
        self.inner.state.lock().await.last_error.clone()
    }

    pub async fn status(&self) -> ConnectionStatus {
        let state = self.inner.state.lock().await;
        ConnectionStatus {
            is_initialized: state.bindings.is_some(),
            is_initializing: state.in_flight.is_some(),
            last_error: state.last_error.clone(),
            last_initialized_at: state.last_initialized_at,
            initializations: state.initializations,
        }
    }
}

/// Build the binding set, then settle shared state exactly once.
async fn initialize(
    inner: Arc<Inner>,
    network: Arc<dyn NetworkHandle>,
    signer: Arc<dyn Signer>,
    signer_address: Address,
    generation: u64,
) -> Result<Arc<BindingSet>, ConnectionError> {
    let outcome = build_bindings(&inner, network, signer, signer_address).await;

    let mut state = inner.state.lock().await;
    if state.generation != generation {
        tracing::debug!(%signer_address, "manager reset during initialization; discarding bindings");
        return Err(ConnectionError::Superseded("binding initialization"));
    }
    state.in_flight = None;
    match &outcome {
        Ok(bindings) => {
            state.bindings = Some(bindings.clone());
            state.last_error = None;
            state.last_initialized_at = Some(Utc::now());
            state.initializations += 1;
            tracing::info!(
                %signer_address,
                chain_id = bindings.chain_id(),
                registries = bindings.bindings.len(),
                "contract bindings initialized"
            );
        }
        Err(e) => {
            state.last_error = Some(e.clone());
            tracing::warn!(%signer_address, error = %e, "contract binding initialization failed");
        }
    }
    outcome
}

async fn build_bindings(
    inner: &Inner,
    network: Arc<dyn NetworkHandle>,
    signer: Arc<dyn Signer>,
    signer_address: Address,
) -> Result<Arc<BindingSet>, ConnectionError> {
    let targets = Registry::ALL
        .iter()
        .map(|registry| {
            inner
                .contracts
                .get(*registry)
                .map(|address| (*registry, address))
                .ok_or_else(|| {
                    ConnectionError::Configuration(format!("no address configured for {registry}"))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let actual = network.chain_id().await?;
    if actual != inner.chain_id {
        return Err(ConnectionError::NetworkMismatch {
            expected: inner.chain_id,
            actual,
        });
    }

    let checks = targets.into_iter().map(|(registry, address)| {
        let network = network.clone();
        async move {
            let code = network.code_at(address).await?;
            if code.is_empty() {
                return Err(ConnectionError::Deployment { registry, address });
            }
            Ok((registry, address))
        }
    });
    let deployed = futures::future::try_join_all(checks).await?;

    let bindings = deployed
        .into_iter()
        .map(|(registry, address)| {
            (
                registry,
                inner.factory.bind(registry, address, signer.clone()),
            )
        })
        .collect();

    Ok(Arc::new(BindingSet {
        signer_address,
        chain_id: actual,
        bindings,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::testing::{MemoryBindingFactory, MemoryNetwork, MemorySigner, deployed_network, registry_address};

    const CHAIN_ID: u64 = 31337;

    fn contracts() -> ContractsConfig {
        let mut contracts = ContractsConfig::default();
        for registry in Registry::ALL {
            contracts.set(registry, registry_address(registry));
        }
        contracts
    }

    fn manager(factory: Arc<MemoryBindingFactory>) -> ConnectionManager {
        ConnectionManager::new(CHAIN_ID, contracts(), factory)
    }

    fn signer(byte: u8) -> Option<Arc<dyn Signer>> {
        Some(Arc::new(MemorySigner(Address::repeat_byte(byte))))
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_initialization() {
        let factory = Arc::new(MemoryBindingFactory::new([]));
        let manager = manager(factory.clone());
        let network: Arc<MemoryNetwork> =
            Arc::new(deployed_network(CHAIN_ID).with_latency(Duration::from_millis(20)));

        let calls = (0..8).map(|_| {
            let manager = manager.clone();
            let network = network.clone() as Arc<dyn NetworkHandle>;
            async move { manager.get_or_init(Some(network), signer(0x01)).await }
        });
        let results = futures::future::join_all(calls).await;

        let first = results[0].as_ref().expect("initialized").clone();
        for result in &results {
            assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
        }
        assert_eq!(network.chain_id_queries(), 1);
        assert_eq!(network.code_queries(), Registry::ALL.len());
        assert_eq!(factory.bind_count(), Registry::ALL.len());
        assert_eq!(manager.status().await.initializations, 1);
        assert!(!manager.is_initializing().await);
    }

    #[tokio::test]
    async fn same_signer_reuses_and_new_signer_rebuilds() {
        let factory = Arc::new(MemoryBindingFactory::new([]));
        let manager = manager(factory.clone());
        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));

        let first = manager
            .get_or_init(Some(network.clone()), signer(0x01))
            .await
            .unwrap();
        let again = manager
            .get_or_init(Some(network.clone()), signer(0x01))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let other = manager
            .get_or_init(Some(network), signer(0x02))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(other.signer_address(), Address::repeat_byte(0x02));
        assert_eq!(manager.status().await.initializations, 2);
    }

    #[tokio::test]
    async fn missing_arguments_are_configuration_errors() {
        let manager = manager(Arc::new(MemoryBindingFactory::new([])));
        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));

        let err = manager.get_or_init(None, signer(0x01)).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Configuration(_)));
        let err = manager.get_or_init(Some(network), None).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Configuration(_)));
    }

    #[tokio::test]
    async fn wrong_chain_is_rejected() {
        let manager = manager(Arc::new(MemoryBindingFactory::new([])));
        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(1));

        let err = manager
            .get_or_init(Some(network), signer(0x01))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::NetworkMismatch {
                expected: CHAIN_ID,
                actual: 1
            }
        );
        assert_eq!(manager.last_error().await, Some(err));
        assert!(!manager.is_initialized().await);
    }

    #[tokio::test]
    async fn missing_code_aborts_without_partial_state() {
        let factory = Arc::new(MemoryBindingFactory::new([]));
        let manager = manager(factory.clone());
        let network: Arc<dyn NetworkHandle> = Arc::new(
            MemoryNetwork::new(CHAIN_ID)
                .with_code(registry_address(Registry::Identity), vec![0x60])
                .with_code(registry_address(Registry::Asset), vec![0x60])
                .with_code(registry_address(Registry::Transaction), vec![0x60]),
        );

        let err = manager
            .get_or_init(Some(network), signer(0x01))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ConnectionError::Deployment {
                registry: Registry::Dispute,
                address: registry_address(Registry::Dispute),
            }
        );
        assert_eq!(factory.bind_count(), 0);
        assert!(manager.current().await.is_none());
    }

    #[tokio::test]
    async fn failed_initialization_can_be_retried() {
        let manager = manager(Arc::new(MemoryBindingFactory::new([])));
        let broken: Arc<dyn NetworkHandle> = Arc::new(MemoryNetwork::new(CHAIN_ID));
        let healthy: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));

        assert!(manager.get_or_init(Some(broken), signer(0x01)).await.is_err());
        assert!(manager.last_error().await.is_some());

        let bindings = manager
            .get_or_init(Some(healthy), signer(0x01))
            .await
            .expect("retry succeeds");
        assert_eq!(bindings.registries().count(), Registry::ALL.len());
        assert!(manager.last_error().await.is_none());
    }

    #[tokio::test]
    async fn unconfigured_registry_is_a_configuration_error() {
        let mut partial = contracts();
        partial.dispute = None;
        let manager = ConnectionManager::new(
            CHAIN_ID,
            partial,
            Arc::new(MemoryBindingFactory::new([])),
        );
        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));

        let err = manager
            .get_or_init(Some(network), signer(0x01))
            .await
            .unwrap_err();
        assert!(matches!(err, ConnectionError::Configuration(msg) if msg.contains("DisputeRegistry")));
    }

    #[tokio::test]
    async fn reset_forces_reinitialization() {
        let manager = manager(Arc::new(MemoryBindingFactory::new([])));
        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));

        let first = manager
            .get_or_init(Some(network.clone()), signer(0x01))
            .await
            .unwrap();
        manager.reset().await;
        assert!(!manager.is_initialized().await);

        let second = manager
            .get_or_init(Some(network), signer(0x01))
            .await
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn reset_during_initialization_discards_its_bindings() {
        let factory = Arc::new(MemoryBindingFactory::new([]));
        let manager = manager(factory.clone());
        let slow: Arc<dyn NetworkHandle> =
            Arc::new(deployed_network(CHAIN_ID).with_latency(Duration::from_millis(100)));

        let pending = tokio::spawn({
            let manager = manager.clone();
            async move { manager.get_or_init(Some(slow), signer(0x01)).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.is_initializing().await);

        manager.reset().await;
        assert!(!manager.is_initializing().await);

        let err = pending.await.unwrap().unwrap_err();
        assert_eq!(err, ConnectionError::Superseded("binding initialization"));
        assert!(!manager.is_initialized().await);
        assert_eq!(manager.status().await.initializations, 0);
        assert_eq!(manager.last_error().await, None);

        let network: Arc<dyn NetworkHandle> = Arc::new(deployed_network(CHAIN_ID));
        let bindings = manager
            .get_or_init(Some(network), signer(0x01))
            .await
            .expect("fresh initialization after reset");
        assert_eq!(manager.current().await.map(|b| Arc::ptr_eq(&b, &bindings)), Some(true));
    }
}
