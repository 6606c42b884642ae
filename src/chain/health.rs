//! Chain connectivity probes used by the doctor command.

use serde::{Deserialize, Serialize};

use crate::chain::{Address, NetworkHandle, Registry};
use crate::error::{ConnectionError, TransportFailure};

/// Typed health state for operator surfaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainHealthState {
    Healthy,
    Unconfigured,
    WrongChain,
    NotDeployed,
    DnsFailure,
    ConnectFailure,
    Timeout,
    RpcFailure,
}

impl ChainHealthState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unconfigured => "unconfigured",
            Self::WrongChain => "wrong_chain",
            Self::NotDeployed => "not_deployed",
            Self::DnsFailure => "dns_failure",
            Self::ConnectFailure => "connect_failure",
            Self::Timeout => "timeout",
            Self::RpcFailure => "rpc_failure",
        }
    }

    pub fn is_healthy(self) -> bool {
        matches!(self, Self::Healthy)
    }

    fn from_error(error: &ConnectionError) -> Self {
        match error {
            ConnectionError::Transport { kind, .. } => match kind {
                TransportFailure::Timeout => Self::Timeout,
                TransportFailure::Dns => Self::DnsFailure,
                TransportFailure::Connect => Self::ConnectFailure,
                TransportFailure::Http => Self::RpcFailure,
            },
            ConnectionError::NetworkMismatch { .. } => Self::WrongChain,
            ConnectionError::Deployment { .. } => Self::NotDeployed,
            ConnectionError::Configuration(_) => Self::Unconfigured,
            _ => Self::RpcFailure,
        }
    }
}

/// Probe result for one check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    pub subject: String,
    pub state: ChainHealthState,
    pub detail: String,
}

impl ChainHealth {
    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }
}

/// Check that the network answers and reports the supported chain id.
pub async fn probe_chain(network: &dyn NetworkHandle, expected_chain_id: u64) -> ChainHealth {
    let subject = "chain".to_string();
    match network.chain_id().await {
        Ok(actual) if actual == expected_chain_id => ChainHealth {
            subject,
            state: ChainHealthState::Healthy,
            detail: format!("chain id {actual}"),
        },
        Ok(actual) => ChainHealth {
            subject,
            state: ChainHealthState::WrongChain,
            detail: format!("expected chain id {expected_chain_id}, got {actual}"),
        },
        Err(error) => ChainHealth {
            subject,
            state: ChainHealthState::from_error(&error),
            detail: error.to_string(),
        },
    }
}

/// Check deployed code for each registry address. `None` means unconfigured.
pub async fn probe_deployments(
    network: &dyn NetworkHandle,
    registries: &[(Registry, Option<Address>)],
) -> Vec<ChainHealth> {
    let probes = registries.iter().map(|(registry, address)| async move {
        let subject = registry.contract_name().to_string();
        let Some(address) = address else {
            return ChainHealth {
                subject,
                state: ChainHealthState::Unconfigured,
                detail: "no address configured".to_string(),
            };
        };
        match network.code_at(*address).await {
            Ok(code) if code.is_empty() => ChainHealth {
                subject,
                state: ChainHealthState::NotDeployed,
                detail: format!("no code at {address}"),
            },
            Ok(code) => ChainHealth {
                subject,
                state: ChainHealthState::Healthy,
                detail: format!("{} bytes at {address}", code.len()),
            },
            Err(error) => ChainHealth {
                subject,
                state: ChainHealthState::from_error(&error),
                detail: error.to_string(),
            },
        }
    });
    futures::future::join_all(probes).await
}
