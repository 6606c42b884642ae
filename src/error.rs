//! Error types for registry-sync.

use std::fmt;

use alloy_primitives::{Address, B256};
use serde_json::Value;

use crate::chain::Registry;

/// Top-level error type for the synchronization layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Convergence error: {0}")]
    Convergence(#[from] ConvergenceError),
}

impl Error {
    /// The connection-level cause, whether raised directly or during a call.
    pub fn connection_cause(&self) -> Option<&ConnectionError> {
        match self {
            Self::Connection(err) => Some(err),
            Self::Dispatch(DispatchError::Connection { source, .. }) => Some(source),
            _ => None,
        }
    }

    /// Actionable message for authorization-affecting failures.
    ///
    /// Network mismatch, missing deployments and convergence failures block the
    /// dependent action, so they get instructions rather than raw error text.
    pub fn user_message(&self) -> String {
        if let Some(cause) = self.connection_cause() {
            match cause {
                ConnectionError::NetworkMismatch { expected, actual } => {
                    return format!(
                        "Your wallet is connected to chain {actual}. Switch to chain {expected} and try again."
                    );
                }
                ConnectionError::Deployment { registry, address } => {
                    return format!(
                        "The {registry} contract was not found at {address} on this network. \
                         Check that you are on the right network."
                    );
                }
                ConnectionError::SignerMismatch { .. } => {
                    return "The wallet signer does not match the connected account. Reconnect your wallet."
                        .to_string();
                }
                _ => {}
            }
        }

        match self {
            Self::Convergence(err) => format!(
                "The transaction was mined but the ledger has not yet shown that {}. \
                 Refresh in a moment before retrying.",
                err.expectation
            ),
            Self::Dispatch(DispatchError::TransactionFailed { context, tx_hash }) => format!(
                "Transaction {tx_hash} for {} was reverted by the {} contract.",
                context.method, context.registry
            ),
            other => other.to_string(),
        }
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport failure classes surfaced by the JSON-RPC network handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFailure {
    Timeout,
    Dns,
    Connect,
    Http,
}

impl fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Timeout => "timeout",
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Http => "http",
        })
    }
}

/// Errors raised while establishing contract bindings.
///
/// `Clone` because a single in-flight initialization hands the same result to
/// every waiting caller.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    #[error("missing dependency: {0}")]
    Configuration(String),

    #[error("network mismatch: expected chain {expected}, connected to chain {actual}")]
    NetworkMismatch { expected: u64, actual: u64 },

    #[error("{registry} has no deployed code at {address}")]
    Deployment { registry: Registry, address: Address },

    #[error("signer address {signer} does not match connected identity {identity}")]
    SignerMismatch { identity: Address, signer: Address },

    #[error("identity provider failed: {0}")]
    Provider(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    /// A reset or logout landed while the operation was still running.
    #[error("{0} was superseded by a reset")]
    Superseded(&'static str),

    #[error("transport failure ({kind}): {message}")]
    Transport {
        kind: TransportFailure,
        message: String,
    },
}

/// Errors reported by a contract binding for a single call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChainError {
    #[error("execution reverted: {0}")]
    Reverted(String),

    #[error("method {0} is not part of the contract interface")]
    UnknownMethod(String),

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("confirmation failed: {0}")]
    Confirmation(String),
}

/// The call a dispatch error belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct CallContext {
    pub registry: Registry,
    pub method: String,
    pub args: Vec<Value>,
}

impl fmt::Display for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self
            .args
            .iter()
            .map(Value::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "{}.{}({})", self.registry, self.method, args)
    }
}

/// Errors from the call dispatcher, annotated with the failing call.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("{context}: {source}")]
    Connection {
        context: Box<CallContext>,
        #[source]
        source: ConnectionError,
    },

    #[error("{context}: transaction {tx_hash} failed")]
    TransactionFailed {
        context: Box<CallContext>,
        tx_hash: B256,
    },

    #[error("{context}: {source}")]
    Call {
        context: Box<CallContext>,
        #[source]
        source: ChainError,
    },

    #[error("{context}: cannot decode result: {message}")]
    Decode {
        context: Box<CallContext>,
        message: String,
    },
}

impl DispatchError {
    pub fn context(&self) -> &CallContext {
        match self {
            Self::Connection { context, .. }
            | Self::TransactionFailed { context, .. }
            | Self::Call { context, .. }
            | Self::Decode { context, .. } => context,
        }
    }
}

/// A post-mutation condition that never became observable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("expected '{expectation}' was not observed after {attempts} verification attempts")]
pub struct ConvergenceError {
    pub expectation: String,
    pub attempts: u32,
}

/// Session storage failures. Only the session cache sees these.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("storage quota exceeded ({used} of {quota} bytes)")]
    QuotaExceeded { used: usize, quota: usize },

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Result type alias for the synchronization layer.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context() -> CallContext {
        CallContext {
            registry: Registry::Identity,
            method: "verifyUser".to_string(),
            args: vec![json!("0x00000000000000000000000000000000000000aa")],
        }
    }

    #[test]
    fn call_context_renders_registry_method_and_args() {
        assert_eq!(
            context().to_string(),
            "UserRegistry.verifyUser(\"0x00000000000000000000000000000000000000aa\")"
        );
    }

    #[test]
    fn user_message_for_network_mismatch_inside_dispatch() {
        let err = Error::from(DispatchError::Connection {
            context: Box::new(context()),
            source: ConnectionError::NetworkMismatch {
                expected: 11155111,
                actual: 1,
            },
        });
        let message = err.user_message();
        assert!(message.contains("Switch to chain 11155111"), "{message}");
    }

    #[test]
    fn user_message_for_convergence_names_expectation() {
        let err = Error::from(ConvergenceError {
            expectation: "user is verified".to_string(),
            attempts: 3,
        });
        assert!(err.user_message().contains("user is verified"));
    }
}
