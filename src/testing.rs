//! In-memory ledger for tests and local demos.
//!
//! `MemoryContract` is a scriptable `ContractBinding`: view and transaction
//! handlers are registered per method name, events are emitted by hand, and
//! every submitted transaction is recorded. `MemoryNetwork`,
//! `MemorySigner`, `MemoryBindingFactory` and `MemoryProvider` complete the
//! set of ports the connection manager and session need.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::chain::{
    Address, B256, BindingFactory, Connection, ContractBinding, EventListener, IdentityProvider,
    ListenerId, NetworkHandle, PendingTransaction, Receipt, Registry, Signer, TxOptions,
};
use crate::error::{ChainError, ConnectionError};

type ViewHandler = Arc<dyn Fn(&[Value]) -> Result<Value, ChainError> + Send + Sync>;
type TxHandler = Arc<dyn Fn(&[Value], &TxOptions) -> Result<bool, ChainError> + Send + Sync>;

/// A transaction recorded by `MemoryContract`.
#[derive(Debug, Clone, PartialEq)]
pub struct SentTransaction {
    pub method: String,
    pub args: Vec<Value>,
    pub options: TxOptions,
}

/// Scriptable contract binding.
pub struct MemoryContract {
    registry: Registry,
    address: Address,
    events: HashSet<String>,
    views: Mutex<HashMap<String, ViewHandler>>,
    transactions: Mutex<HashMap<String, TxHandler>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventListener)>>>,
    sent: Mutex<Vec<SentTransaction>>,
    view_calls: AtomicUsize,
    view_latency_ms: AtomicU64,
    next_listener: AtomicU64,
    next_block: AtomicU64,
}

impl MemoryContract {
    pub fn new(registry: Registry, address: Address) -> Self {
        Self {
            registry,
            address,
            events: HashSet::new(),
            views: Mutex::new(HashMap::new()),
            transactions: Mutex::new(HashMap::new()),
            listeners: Mutex::new(HashMap::new()),
            sent: Mutex::new(Vec::new()),
            view_calls: AtomicUsize::new(0),
            view_latency_ms: AtomicU64::new(0),
            next_listener: AtomicU64::new(1),
            next_block: AtomicU64::new(1),
        }
    }

    /// Declare the events this contract's interface exposes.
    pub fn with_events(mut self, events: &[&str]) -> Self {
        self.events = events.iter().map(|e| e.to_string()).collect();
        self
    }

    /// Answer `method` with a fixed value.
    pub fn set_view(&self, method: &str, value: Value) {
        self.on_view(method, move |_| Ok(value.clone()));
    }

    /// Delay every later view answer by `latency`.
    pub fn set_view_latency(&self, latency: Duration) {
        self.view_latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn on_view<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value]) -> Result<Value, ChainError> + Send + Sync + 'static,
    {
        lock(&self.views).insert(method.to_string(), Arc::new(handler));
    }

    /// Handle `method` submissions; the handler returns the receipt status.
    pub fn on_transaction<F>(&self, method: &str, handler: F)
    where
        F: Fn(&[Value], &TxOptions) -> Result<bool, ChainError> + Send + Sync + 'static,
    {
        lock(&self.transactions).insert(method.to_string(), Arc::new(handler));
    }

    /// Fire `event` to every listener currently subscribed to it.
    pub fn emit(&self, event: &str, args: Vec<Value>) {
        let listeners: Vec<EventListener> = lock(&self.listeners)
            .get(event)
            .map(|entries| entries.iter().map(|(_, l)| l.clone()).collect())
            .unwrap_or_default();
        for listener in listeners {
            listener(&args);
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).values().map(Vec::len).sum()
    }

    pub fn sent_transactions(&self) -> Vec<SentTransaction> {
        lock(&self.sent).clone()
    }

    pub fn view_calls(&self) -> usize {
        self.view_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContractBinding for MemoryContract {
    fn registry(&self) -> Registry {
        self.registry
    }

    fn address(&self) -> Address {
        self.address
    }

    async fn call_view(&self, method: &str, args: &[Value]) -> Result<Value, ChainError> {
        self.view_calls.fetch_add(1, Ordering::SeqCst);
        let handler = lock(&self.views)
            .get(method)
            .cloned()
            .ok_or_else(|| ChainError::UnknownMethod(method.to_string()))?;
        match self.view_latency_ms.load(Ordering::SeqCst) {
            0 => tokio::task::yield_now().await,
            ms => tokio::time::sleep(Duration::from_millis(ms)).await,
        }
        handler(args)
    }

    async fn send_transaction(
        &self,
        method: &str,
        args: &[Value],
        options: &TxOptions,
    ) -> Result<Box<dyn PendingTransaction>, ChainError> {
        let handler = lock(&self.transactions)
            .get(method)
            .cloned()
            .ok_or_else(|| ChainError::UnknownMethod(method.to_string()))?;
        lock(&self.sent).push(SentTransaction {
            method: method.to_string(),
            args: args.to_vec(),
            options: options.clone(),
        });
        let success = handler(args, options)?;
        let block_number = self.next_block.fetch_add(1, Ordering::SeqCst);
        let mut hash = [0u8; 32];
        hash[..8].copy_from_slice(&block_number.to_be_bytes());
        hash[31] = self.registry as u8;
        Ok(Box::new(MemoryPendingTransaction {
            receipt: Receipt {
                tx_hash: B256::from(hash),
                block_number,
                gas_used: options.gas_limit.unwrap_or(21_000).min(21_000),
                success,
            },
        }))
    }

    fn has_event(&self, event: &str) -> bool {
        self.events.contains(event)
    }

    fn subscribe(&self, event: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_listener.fetch_add(1, Ordering::SeqCst));
        lock(&self.listeners)
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn unsubscribe(&self, event: &str, id: ListenerId) {
        if let Some(entries) = lock(&self.listeners).get_mut(event) {
            entries.retain(|(existing, _)| *existing != id);
        }
    }
}

struct MemoryPendingTransaction {
    receipt: Receipt,
}

#[async_trait]
impl PendingTransaction for MemoryPendingTransaction {
    fn tx_hash(&self) -> B256 {
        self.receipt.tx_hash
    }

    async fn wait(self: Box<Self>) -> Result<Receipt, ChainError> {
        tokio::task::yield_now().await;
        Ok(self.receipt)
    }
}

/// Network handle with a fixed chain id and a code map.
pub struct MemoryNetwork {
    chain_id: u64,
    code: HashMap<Address, Vec<u8>>,
    latency: Option<Duration>,
    chain_id_queries: AtomicUsize,
    code_queries: AtomicUsize,
}

impl MemoryNetwork {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            code: HashMap::new(),
            latency: None,
            chain_id_queries: AtomicUsize::new(0),
            code_queries: AtomicUsize::new(0),
        }
    }

    pub fn with_code(mut self, address: Address, code: Vec<u8>) -> Self {
        self.code.insert(address, code);
        self
    }

    /// Delay each `code_at` answer so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn chain_id_queries(&self) -> usize {
        self.chain_id_queries.load(Ordering::SeqCst)
    }

    pub fn code_queries(&self) -> usize {
        self.code_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NetworkHandle for MemoryNetwork {
    async fn chain_id(&self) -> Result<u64, ConnectionError> {
        self.chain_id_queries.fetch_add(1, Ordering::SeqCst);
        Ok(self.chain_id)
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>, ConnectionError> {
        self.code_queries.fetch_add(1, Ordering::SeqCst);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        Ok(self.code.get(&address).cloned().unwrap_or_default())
    }
}

/// Signer that resolves to a fixed address.
#[derive(Debug, Clone)]
pub struct MemorySigner(pub Address);

#[async_trait]
impl Signer for MemorySigner {
    async fn address(&self) -> Result<Address, ConnectionError> {
        Ok(self.0)
    }
}

/// Hands out pre-built `MemoryContract`s regardless of signer.
pub struct MemoryBindingFactory {
    contracts: HashMap<Registry, Arc<MemoryContract>>,
    binds: AtomicUsize,
}

impl MemoryBindingFactory {
    pub fn new(contracts: impl IntoIterator<Item = Arc<MemoryContract>>) -> Self {
        Self {
            contracts: contracts
                .into_iter()
                .map(|contract| (contract.registry, contract))
                .collect(),
            binds: AtomicUsize::new(0),
        }
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }
}

impl BindingFactory for MemoryBindingFactory {
    fn bind(
        &self,
        registry: Registry,
        address: Address,
        _signer: Arc<dyn Signer>,
    ) -> Arc<dyn ContractBinding> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        match self.contracts.get(&registry) {
            Some(contract) => contract.clone(),
            None => Arc::new(MemoryContract::new(registry, address)),
        }
    }
}

/// Identity provider that always connects to the same account.
pub struct MemoryProvider {
    connection: Connection,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(connection: Connection) -> Self {
        Self {
            connection,
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        }
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MemoryProvider {
    async fn connect(&self) -> Result<Connection, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.connection.clone())
    }

    async fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

/// Deterministic contract address for `registry` in test ledgers.
pub fn registry_address(registry: Registry) -> Address {
    Address::repeat_byte(0xa0 + registry as u8)
}

/// Network with code deployed at every `registry_address`.
pub fn deployed_network(chain_id: u64) -> MemoryNetwork {
    Registry::ALL
        .iter()
        .fold(MemoryNetwork::new(chain_id), |network, registry| {
            network.with_code(registry_address(*registry), vec![0x60, 0x80, 0x60, 0x40])
        })
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
