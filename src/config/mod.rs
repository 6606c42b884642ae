//! Configuration for registry-sync.
//!
//! Settings are loaded with priority: env var > TOML config file > default.
//! `./.env` and `~/.registry-sync/.env` are loaded via dotenvy first, so
//! values placed there behave like env vars.

pub(crate) mod helpers;

use std::path::Path;
use std::time::Duration;

use alloy_primitives::Address;

use crate::chain::Registry;
use crate::error::ConfigError;
use crate::retry::RetryPolicy;
use crate::settings::Settings;

/// Main configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub network: NetworkConfig,
    pub contracts: ContractsConfig,
    pub dispatch: DispatchConfig,
    pub confirmation: ConfirmationConfig,
    pub cache: CacheConfig,
}

/// The network bindings are created against.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkConfig {
    pub chain_id: u64,
    pub rpc_url: Option<String>,
    pub rpc_timeout: Duration,
}

impl NetworkConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let chain_id = helpers::parse_optional_env::<u64>("REGISTRY_CHAIN_ID", "a positive integer")?
            .unwrap_or(settings.network.chain_id);
        let chain_id = helpers::require_positive("REGISTRY_CHAIN_ID", chain_id)?;

        let rpc_url = helpers::optional_env("REGISTRY_RPC_URL")?
            .or_else(|| settings.network.rpc_url.clone());
        if let Some(url) = &rpc_url
            && let Err(e) = url::Url::parse(url)
        {
            return Err(ConfigError::InvalidValue {
                key: "REGISTRY_RPC_URL".to_string(),
                message: format!("must be a valid URL: {e}"),
            });
        }

        let rpc_timeout_ms =
            helpers::parse_optional_env::<u64>("REGISTRY_RPC_TIMEOUT_MS", "a positive integer")?
                .unwrap_or(settings.network.rpc_timeout_ms);
        let rpc_timeout_ms = helpers::require_positive("REGISTRY_RPC_TIMEOUT_MS", rpc_timeout_ms)?;

        Ok(Self {
            chain_id,
            rpc_url,
            rpc_timeout: Duration::from_millis(rpc_timeout_ms),
        })
    }
}

/// Deployed registry addresses. A missing address is reported when bindings
/// are initialized, not at load time, so the doctor can still run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContractsConfig {
    pub identity: Option<Address>,
    pub asset: Option<Address>,
    pub transaction: Option<Address>,
    pub dispute: Option<Address>,
}

impl ContractsConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            identity: resolve_address(
                "REGISTRY_IDENTITY_ADDRESS",
                settings.contracts.identity.as_deref(),
            )?,
            asset: resolve_address("REGISTRY_ASSET_ADDRESS", settings.contracts.asset.as_deref())?,
            transaction: resolve_address(
                "REGISTRY_TRANSACTION_ADDRESS",
                settings.contracts.transaction.as_deref(),
            )?,
            dispute: resolve_address(
                "REGISTRY_DISPUTE_ADDRESS",
                settings.contracts.dispute.as_deref(),
            )?,
        })
    }

    pub fn get(&self, registry: Registry) -> Option<Address> {
        match registry {
            Registry::Identity => self.identity,
            Registry::Asset => self.asset,
            Registry::Transaction => self.transaction,
            Registry::Dispute => self.dispute,
        }
    }

    pub fn set(&mut self, registry: Registry, address: Address) {
        let slot = match registry {
            Registry::Identity => &mut self.identity,
            Registry::Asset => &mut self.asset,
            Registry::Transaction => &mut self.transaction,
            Registry::Dispute => &mut self.dispute,
        };
        *slot = Some(address);
    }

    /// Every registry paired with its configured address.
    pub fn entries(&self) -> Vec<(Registry, Option<Address>)> {
        Registry::ALL
            .iter()
            .map(|registry| (*registry, self.get(*registry)))
            .collect()
    }
}

fn resolve_address(key: &str, fallback: Option<&str>) -> Result<Option<Address>, ConfigError> {
    let raw = match helpers::optional_env(key)? {
        Some(value) => Some(value),
        None => fallback.map(str::trim).filter(|s| !s.is_empty()).map(String::from),
    };
    raw.map(|value| {
        value.parse::<Address>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("must be a 20-byte hex address: {e}"),
        })
    })
    .transpose()
}

/// Call dispatcher defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Gas ceiling merged under caller overrides for every mutating call.
    pub gas_limit: u64,
}

impl DispatchConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let gas_limit =
            helpers::parse_optional_env::<u64>("REGISTRY_GAS_LIMIT", "a positive integer")?
                .unwrap_or(settings.dispatch.gas_limit);
        Ok(Self {
            gas_limit: helpers::require_positive("REGISTRY_GAS_LIMIT", gas_limit)?,
        })
    }
}

/// Post-mutation verification budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmationConfig {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl ConfirmationConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let max_attempts = helpers::parse_optional_env::<u32>(
            "REGISTRY_CONFIRM_MAX_ATTEMPTS",
            "a positive integer",
        )?
        .unwrap_or(settings.confirmation.max_attempts);
        let max_attempts = helpers::require_positive("REGISTRY_CONFIRM_MAX_ATTEMPTS", max_attempts)?;

        let delay_ms = helpers::parse_optional_env::<u64>(
            "REGISTRY_CONFIRM_DELAY_MS",
            "a non-negative integer",
        )?
        .unwrap_or(settings.confirmation.delay_ms);

        Ok(Self {
            max_attempts,
            delay: Duration::from_millis(delay_ms),
        })
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.delay)
    }
}

/// Session cache expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub ttl: Duration,
}

impl CacheConfig {
    pub(crate) fn resolve(settings: &Settings) -> Result<Self, ConfigError> {
        let ttl_secs =
            helpers::parse_optional_env::<u64>("REGISTRY_CACHE_TTL_SECS", "a positive integer")?
                .unwrap_or(settings.cache.ttl_secs);
        let ttl_secs = helpers::require_positive("REGISTRY_CACHE_TTL_SECS", ttl_secs)?;
        Ok(Self {
            ttl: Duration::from_secs(ttl_secs),
        })
    }
}

impl Config {
    /// Load configuration from env vars and the default TOML file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with_toml(None)
    }

    /// Load from env with an optional TOML config file overlay.
    pub fn from_env_with_toml(toml_path: Option<&Path>) -> Result<Self, ConfigError> {
        crate::bootstrap::load_registry_sync_env();
        let mut settings = Settings::default();
        Self::apply_toml_overlay(&mut settings, toml_path)?;
        Self::build(&settings)
    }

    /// Load and merge a TOML config file into settings.
    ///
    /// If `explicit_path` is `Some`, loads from that path (errors are fatal).
    /// If `None`, tries `~/.registry-sync/config.toml` (a missing file is
    /// ignored).
    fn apply_toml_overlay(
        settings: &mut Settings,
        explicit_path: Option<&Path>,
    ) -> Result<(), ConfigError> {
        let path = explicit_path
            .map(Path::to_path_buf)
            .unwrap_or_else(Settings::default_toml_path);

        match Settings::load_toml(&path) {
            Ok(Some(toml_settings)) => {
                settings.merge_from(&toml_settings);
                tracing::debug!("Loaded TOML config from {}", path.display());
            }
            Ok(None) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
            }
            Err(e) => {
                if explicit_path.is_some() {
                    return Err(ConfigError::ParseError(e));
                }
                tracing::warn!("Failed to load default config file: {}", e);
            }
        }
        Ok(())
    }

    /// Build config from settings, applying env overrides.
    pub fn build(settings: &Settings) -> Result<Self, ConfigError> {
        Ok(Self {
            network: NetworkConfig::resolve(settings)?,
            contracts: ContractsConfig::resolve(settings)?,
            dispatch: DispatchConfig::resolve(settings)?,
            confirmation: ConfirmationConfig::resolve(settings)?,
            cache: CacheConfig::resolve(settings)?,
        })
    }
}
