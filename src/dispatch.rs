//! Call dispatcher.
//!
//! Every read and write against a registry goes through [`CallDispatcher::call`].
//! It obtains bindings from the connection manager for the currently bound
//! identity, applies default transaction options and annotates failures with
//! the registry, method and arguments that produced them.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::chain::{NetworkHandle, PendingTransaction, Receipt, Registry, Signer, TxOptions};
use crate::connection::{BindingSet, ConnectionManager};
use crate::error::{CallContext, ConnectionError, DispatchError};

/// How a call is executed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Read-only call; no transaction is submitted.
    pub is_view: bool,
    /// Await finalization and fail on an unsuccessful receipt.
    pub wait_for_confirmation: bool,
    /// Per-call overrides merged over the dispatcher defaults.
    pub overrides: TxOptions,
}

impl CallOptions {
    pub fn view() -> Self {
        Self {
            is_view: true,
            ..Self::default()
        }
    }

    /// Submit and return the pending transaction without waiting.
    pub fn transaction() -> Self {
        Self::default()
    }

    pub fn confirmed() -> Self {
        Self {
            wait_for_confirmation: true,
            ..Self::default()
        }
    }

    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.overrides.gas_limit = Some(gas_limit);
        self
    }

    pub fn with_value(mut self, value_wei: u128) -> Self {
        self.overrides.value_wei = Some(value_wei);
        self
    }
}

/// Result of a dispatched call.
pub enum CallOutcome {
    /// Decoded result of a view call.
    Value(Value),
    /// Submitted transaction, not yet finalized.
    Pending(Box<dyn PendingTransaction>),
    /// Finalized, successful transaction.
    Confirmed(Receipt),
}

impl fmt::Debug for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Pending(pending) => f.debug_tuple("Pending").field(&pending.tx_hash()).finish(),
            Self::Confirmed(receipt) => f.debug_tuple("Confirmed").field(receipt).finish(),
        }
    }
}

type BoundIdentity = (Arc<dyn NetworkHandle>, Arc<dyn Signer>);

/// Uniform entry point for contract calls.
pub struct CallDispatcher {
    manager: ConnectionManager,
    defaults: TxOptions,
    identity: RwLock<Option<BoundIdentity>>,
}

impl CallDispatcher {
    pub fn new(manager: ConnectionManager, default_gas_limit: u64) -> Self {
        Self {
            manager,
            defaults: TxOptions {
                gas_limit: Some(default_gas_limit),
                value_wei: None,
            },
            identity: RwLock::new(None),
        }
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn defaults(&self) -> &TxOptions {
        &self.defaults
    }

    /// Make `network` and `signer` the identity subsequent calls run as.
    pub async fn bind_identity(&self, network: Arc<dyn NetworkHandle>, signer: Arc<dyn Signer>) {
        *self.identity.write().await = Some((network, signer));
    }

    pub async fn clear_identity(&self) {
        *self.identity.write().await = None;
    }

    pub async fn has_identity(&self) -> bool {
        self.identity.read().await.is_some()
    }

    /// Bindings for the bound identity, initializing them if needed.
    pub async fn bindings(&self) -> Result<Arc<BindingSet>, ConnectionError> {
        let (network, signer) = match self.identity.read().await.as_ref() {
            Some((network, signer)) => (Some(network.clone()), Some(signer.clone())),
            None => (None, None),
        };
        self.manager.get_or_init(network, signer).await
    }

    /// Invoke `method` on `registry`.
    pub async fn call(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
        options: CallOptions,
    ) -> Result<CallOutcome, DispatchError> {
        let context = |args: &[Value]| {
            Box::new(CallContext {
                registry,
                method: method.to_string(),
                args: args.to_vec(),
            })
        };

        let bindings = self
            .bindings()
            .await
            .map_err(|source| DispatchError::Connection {
                context: context(&args),
                source,
            })?;
        let binding = bindings
            .get(registry)
            .ok_or_else(|| DispatchError::Connection {
                context: context(&args),
                source: ConnectionError::Configuration(format!("{registry} is not bound")),
            })?;

        if options.is_view {
            tracing::debug!(%registry, method, "view call");
            return binding
                .call_view(method, &args)
                .await
                .map(CallOutcome::Value)
                .map_err(|source| DispatchError::Call {
                    context: context(&args),
                    source,
                });
        }

        let tx_options = options.overrides.merged_over(&self.defaults);
        tracing::debug!(
            %registry,
            method,
            gas_limit = tx_options.gas_limit,
            "submitting transaction"
        );
        let pending = binding
            .send_transaction(method, &args, &tx_options)
            .await
            .map_err(|source| DispatchError::Call {
                context: context(&args),
                source,
            })?;

        if !options.wait_for_confirmation {
            return Ok(CallOutcome::Pending(pending));
        }

        let tx_hash = pending.tx_hash();
        let receipt = pending.wait().await.map_err(|source| DispatchError::Call {
            context: context(&args),
            source,
        })?;
        if !receipt.success {
            tracing::warn!(%registry, method, %tx_hash, "transaction reverted");
            return Err(DispatchError::TransactionFailed {
                context: context(&args),
                tx_hash,
            });
        }
        tracing::info!(
            %registry,
            method,
            %tx_hash,
            block = receipt.block_number,
            "transaction confirmed"
        );
        Ok(CallOutcome::Confirmed(receipt))
    }

    /// Read-only call returning the raw result.
    pub async fn view(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, DispatchError> {
        match self.call(registry, method, args.clone(), CallOptions::view()).await? {
            CallOutcome::Value(value) => Ok(value),
            other => Err(unexpected_outcome(registry, method, args, &other)),
        }
    }

    /// Read-only call decoded into `T`.
    pub async fn view_as<T: DeserializeOwned>(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
    ) -> Result<T, DispatchError> {
        let value = self.view(registry, method, args.clone()).await?;
        serde_json::from_value(value).map_err(|e| DispatchError::Decode {
            context: Box::new(CallContext {
                registry,
                method: method.to_string(),
                args,
            }),
            message: e.to_string(),
        })
    }

    /// Read-only call returning an unsigned integer.
    ///
    /// Wide integer types come back as decimal strings, narrow ones as
    /// numbers; both are accepted.
    pub async fn view_u64(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
    ) -> Result<u64, DispatchError> {
        let value = self.view(registry, method, args.clone()).await?;
        decode_u64(&value).ok_or_else(|| DispatchError::Decode {
            context: Box::new(CallContext {
                registry,
                method: method.to_string(),
                args,
            }),
            message: format!("expected a non-negative integer, got {value}"),
        })
    }

    /// Submit a transaction without waiting for it to be finalized.
    pub async fn send(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
        overrides: TxOptions,
    ) -> Result<Box<dyn PendingTransaction>, DispatchError> {
        let options = CallOptions {
            overrides,
            ..CallOptions::transaction()
        };
        match self.call(registry, method, args.clone(), options).await? {
            CallOutcome::Pending(pending) => Ok(pending),
            other => Err(unexpected_outcome(registry, method, args, &other)),
        }
    }

    /// Submit a transaction and wait for a successful receipt.
    pub async fn send_and_confirm(
        &self,
        registry: Registry,
        method: &str,
        args: Vec<Value>,
        overrides: TxOptions,
    ) -> Result<Receipt, DispatchError> {
        let options = CallOptions {
            overrides,
            ..CallOptions::confirmed()
        };
        match self.call(registry, method, args.clone(), options).await? {
            CallOutcome::Confirmed(receipt) => Ok(receipt),
            other => Err(unexpected_outcome(registry, method, args, &other)),
        }
    }
}

/// Unsigned integer from a JSON number or decimal string.
pub(crate) fn decode_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn unexpected_outcome(
    registry: Registry,
    method: &str,
    args: Vec<Value>,
    outcome: &CallOutcome,
) -> DispatchError {
    DispatchError::Decode {
        context: Box::new(CallContext {
            registry,
            method: method.to_string(),
            args,
        }),
        message: format!("unexpected call outcome {outcome:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use crate::chain::Address;
    use crate::config::ContractsConfig;
    use crate::error::ChainError;
    use crate::testing::{
        MemoryBindingFactory, MemoryContract, MemorySigner, deployed_network, registry_address,
    };

    const CHAIN_ID: u64 = 31337;

    fn setup() -> (CallDispatcher, Arc<MemoryContract>) {
        let contract = Arc::new(MemoryContract::new(
            Registry::Asset,
            registry_address(Registry::Asset),
        ));
        let mut contracts = ContractsConfig::default();
        for registry in Registry::ALL {
            contracts.set(registry, registry_address(registry));
        }
        let factory = Arc::new(MemoryBindingFactory::new([contract.clone()]));
        let manager = ConnectionManager::new(CHAIN_ID, contracts, factory);
        (CallDispatcher::new(manager, 3_000_000), contract)
    }

    async fn bound() -> (CallDispatcher, Arc<MemoryContract>) {
        let (dispatcher, contract) = setup();
        dispatcher
            .bind_identity(
                Arc::new(deployed_network(CHAIN_ID)),
                Arc::new(MemorySigner(Address::repeat_byte(0x11))),
            )
            .await;
        (dispatcher, contract)
    }

    #[tokio::test]
    async fn view_returns_decoded_value() {
        let (dispatcher, contract) = bound().await;
        contract.on_view("getLandsByOwner", |args| {
            assert_eq!(args, [json!("0x1111111111111111111111111111111111111111")]);
            Ok(json!([1, 4]))
        });

        let lands: Vec<u64> = dispatcher
            .view_as(
                Registry::Asset,
                "getLandsByOwner",
                vec![json!("0x1111111111111111111111111111111111111111")],
            )
            .await
            .unwrap();
        assert_eq!(lands, vec![1, 4]);
        assert!(contract.sent_transactions().is_empty());
    }

    #[tokio::test]
    async fn defaults_apply_and_overrides_win() {
        let (dispatcher, contract) = bound().await;
        contract.on_transaction("setForSale", |_, _| Ok(true));

        dispatcher
            .send_and_confirm(
                Registry::Asset,
                "setForSale",
                vec![json!(1), json!(true)],
                TxOptions::default(),
            )
            .await
            .unwrap();
        dispatcher
            .call(
                Registry::Asset,
                "setForSale",
                vec![json!(1), json!(false)],
                CallOptions::confirmed().with_gas_limit(90_000).with_value(7),
            )
            .await
            .unwrap();

        let sent = contract.sent_transactions();
        assert_eq!(sent[0].options.gas_limit, Some(3_000_000));
        assert_eq!(sent[0].options.value_wei, None);
        assert_eq!(sent[1].options.gas_limit, Some(90_000));
        assert_eq!(sent[1].options.value_wei, Some(7));
    }

    #[tokio::test]
    async fn unconfirmed_transaction_returns_pending() {
        let (dispatcher, contract) = bound().await;
        contract.on_transaction("removeLand", |_, _| Ok(true));

        let outcome = dispatcher
            .call(Registry::Asset, "removeLand", vec![json!(3)], CallOptions::transaction())
            .await
            .unwrap();
        let CallOutcome::Pending(pending) = outcome else {
            panic!("expected pending transaction, got {outcome:?}");
        };
        let receipt = pending.wait().await.unwrap();
        assert!(receipt.success);
    }

    #[tokio::test]
    async fn unsuccessful_receipt_is_transaction_failed() {
        let (dispatcher, contract) = bound().await;
        contract.on_transaction("removeLand", |_, _| Ok(false));

        let err = dispatcher
            .send_and_confirm(Registry::Asset, "removeLand", vec![json!(3)], TxOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::TransactionFailed { .. }));
        assert_eq!(err.context().method, "removeLand");
        assert_eq!(err.context().args, vec![json!(3)]);
    }

    #[tokio::test]
    async fn chain_errors_carry_call_context() {
        let (dispatcher, contract) = bound().await;
        contract.on_view("getLand", |_| Err(ChainError::Reverted("land does not exist".into())));

        let err = dispatcher
            .view(Registry::Asset, "getLand", vec![json!(99)])
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "LandRegistry.getLand(99): execution reverted: land does not exist"
        );
    }

    #[tokio::test]
    async fn decode_failure_is_reported() {
        let (dispatcher, contract) = bound().await;
        contract.set_view("getLandCount", json!("many"));

        let err = dispatcher
            .view_as::<u64>(Registry::Asset, "getLandCount", vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Decode { .. }));
    }

    #[test]
    fn integers_decode_from_numbers_and_decimal_strings() {
        assert_eq!(decode_u64(&json!(120)), Some(120));
        assert_eq!(decode_u64(&json!("86400")), Some(86_400));
        assert_eq!(decode_u64(&json!(-1)), None);
        assert_eq!(decode_u64(&json!(true)), None);
    }

    #[tokio::test]
    async fn unbound_identity_is_a_connection_error() {
        let (dispatcher, _) = setup();
        let err = dispatcher
            .view(Registry::Asset, "getLandCount", vec![])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Connection {
                source: ConnectionError::Configuration(_),
                ..
            }
        ));
        assert!(!dispatcher.manager().is_initialized().await);
    }

    #[tokio::test]
    async fn clear_identity_stops_calls() {
        let (dispatcher, contract) = bound().await;
        contract.set_view("getLandCount", json!(2));
        assert_eq!(
            dispatcher.view(Registry::Asset, "getLandCount", vec![]).await.unwrap(),
            json!(2)
        );

        dispatcher.clear_identity().await;
        dispatcher.manager().reset().await;
        assert!(!dispatcher.has_identity().await);
        assert!(dispatcher.view(Registry::Asset, "getLandCount", vec![]).await.is_err());
    }
}
