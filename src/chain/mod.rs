//! Ports to the remote ledger and the identity provider.
//!
//! The synchronization layer never talks to a wallet or an RPC node
//! directly. Everything it needs is expressed as a trait here:
//! - `IdentityProvider` hands out an address, a network handle and a signer
//! - `NetworkHandle` answers chain id and deployed-code queries
//! - `BindingFactory` turns (registry, address, signer) into a `ContractBinding`
//!
//! `rpc` provides a JSON-RPC `NetworkHandle`; `health` classifies it for the
//! doctor command.

pub mod health;
pub mod rpc;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use alloy_primitives::{Address, B256};

use crate::error::{ChainError, ConnectionError};

/// One of the registries the client binds to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Registry {
    Identity,
    Asset,
    Transaction,
    Dispute,
}

impl Registry {
    /// Every registry a binding set must contain.
    pub const ALL: [Registry; 4] = [
        Registry::Identity,
        Registry::Asset,
        Registry::Transaction,
        Registry::Dispute,
    ];

    /// Contract name as deployed.
    pub fn contract_name(self) -> &'static str {
        match self {
            Self::Identity => "UserRegistry",
            Self::Asset => "LandRegistry",
            Self::Transaction => "TransactionRegistry",
            Self::Dispute => "DisputeRegistry",
        }
    }

    /// Parse a registry from its config key or contract name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "identity" | "user" | "userregistry" | "user_registry" => Some(Self::Identity),
            "asset" | "land" | "landregistry" | "land_registry" => Some(Self::Asset),
            "transaction" | "transactionregistry" | "transaction_registry" => {
                Some(Self::Transaction)
            }
            "dispute" | "disputeregistry" | "dispute_registry" => Some(Self::Dispute),
            _ => None,
        }
    }
}

impl fmt::Display for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.contract_name())
    }
}

/// Lowercase hex form used for cache keys and log fields.
pub fn normalize_address(address: &Address) -> String {
    address.to_string().to_ascii_lowercase()
}

/// Read access to the network the identity is connected to.
#[async_trait]
pub trait NetworkHandle: Send + Sync {
    async fn chain_id(&self) -> Result<u64, ConnectionError>;

    /// Deployed bytecode at `address`; empty means nothing is deployed.
    async fn code_at(&self, address: Address) -> Result<Vec<u8>, ConnectionError>;
}

/// Signing capability bound to one address.
#[async_trait]
pub trait Signer: Send + Sync {
    async fn address(&self) -> Result<Address, ConnectionError>;
}

/// What an identity provider hands over on connect.
#[derive(Clone)]
pub struct Connection {
    pub address: Address,
    pub network: Arc<dyn NetworkHandle>,
    pub signer: Arc<dyn Signer>,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

/// External wallet/session provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn connect(&self) -> Result<Connection, ConnectionError>;

    async fn disconnect(&self);
}

/// Per-transaction overrides; unset fields fall back to dispatcher defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_wei: Option<u128>,
}

impl TxOptions {
    /// Fill unset fields from `defaults`. Values already set win.
    pub fn merged_over(&self, defaults: &TxOptions) -> TxOptions {
        TxOptions {
            gas_limit: self.gas_limit.or(defaults.gas_limit),
            value_wei: self.value_wei.or(defaults.value_wei),
        }
    }
}

/// Finalized transaction receipt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: B256,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// A submitted transaction that has not been finalized yet.
#[async_trait]
pub trait PendingTransaction: Send + Sync {
    fn tx_hash(&self) -> B256;

    /// Block until the ledger finalizes the submission.
    async fn wait(self: Box<Self>) -> Result<Receipt, ChainError>;
}

/// Callback for raw contract events. Receives the emitted arguments.
pub type EventListener = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Handle for removing a contract event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A local handle through which methods on one registry are invoked.
///
/// Arguments and results travel as JSON values; ABI encoding is the
/// binding's concern.
#[async_trait]
pub trait ContractBinding: Send + Sync {
    fn registry(&self) -> Registry;

    fn address(&self) -> Address;

    async fn call_view(&self, method: &str, args: &[Value]) -> Result<Value, ChainError>;

    async fn send_transaction(
        &self,
        method: &str,
        args: &[Value],
        options: &TxOptions,
    ) -> Result<Box<dyn PendingTransaction>, ChainError>;

    /// Whether the contract interface declares `event`.
    fn has_event(&self, event: &str) -> bool;

    fn subscribe(&self, event: &str, listener: EventListener) -> ListenerId;

    fn unsubscribe(&self, event: &str, id: ListenerId);
}

/// Builds signer-connected bindings for deployed registries.
pub trait BindingFactory: Send + Sync {
    fn bind(
        &self,
        registry: Registry,
        address: Address,
        signer: Arc<dyn Signer>,
    ) -> Arc<dyn ContractBinding>;
}
