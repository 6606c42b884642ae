//! User settings file.
//!
//! Stores operator preferences in `~/.registry-sync/config.toml`. Settings
//! are resolved with env var > config.toml > default priority by `config`.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default chain: Sepolia.
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
/// Gas ceiling applied to every mutating call unless overridden.
pub const DEFAULT_GAS_LIMIT: u64 = 3_000_000;
pub const DEFAULT_CONFIRM_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_CONFIRM_DELAY_MS: u64 = 2_000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 30;
pub const DEFAULT_RPC_TIMEOUT_MS: u64 = 10_000;

/// Settings persisted to disk.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Settings {
    #[serde(default)]
    pub network: NetworkSettings,

    #[serde(default)]
    pub contracts: ContractSettings,

    #[serde(default)]
    pub dispatch: DispatchSettings,

    #[serde(default)]
    pub confirmation: ConfirmationSettings,

    #[serde(default)]
    pub cache: CacheSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSettings {
    /// The only chain id bindings are created against.
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,

    /// JSON-RPC endpoint used by the doctor command.
    #[serde(default)]
    pub rpc_url: Option<String>,

    #[serde(default = "default_rpc_timeout_ms")]
    pub rpc_timeout_ms: u64,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            rpc_url: None,
            rpc_timeout_ms: DEFAULT_RPC_TIMEOUT_MS,
        }
    }
}

/// Deployed registry addresses, as hex strings.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ContractSettings {
    #[serde(default)]
    pub identity: Option<String>,
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub transaction: Option<String>,
    #[serde(default)]
    pub dispute: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DispatchSettings {
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            gas_limit: DEFAULT_GAS_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfirmationSettings {
    #[serde(default = "default_confirm_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_confirm_delay_ms")]
    pub delay_ms: u64,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_CONFIRM_MAX_ATTEMPTS,
            delay_ms: DEFAULT_CONFIRM_DELAY_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_CACHE_TTL_SECS,
        }
    }
}

fn default_chain_id() -> u64 {
    DEFAULT_CHAIN_ID
}

fn default_rpc_timeout_ms() -> u64 {
    DEFAULT_RPC_TIMEOUT_MS
}

fn default_gas_limit() -> u64 {
    DEFAULT_GAS_LIMIT
}

fn default_confirm_max_attempts() -> u32 {
    DEFAULT_CONFIRM_MAX_ATTEMPTS
}

fn default_confirm_delay_ms() -> u64 {
    DEFAULT_CONFIRM_DELAY_MS
}

fn default_cache_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

impl Settings {
    /// Default TOML config path (`~/.registry-sync/config.toml`).
    pub fn default_toml_path() -> PathBuf {
        crate::bootstrap::registry_sync_dir().join("config.toml")
    }

    /// Load settings from a TOML file. `Ok(None)` when the file does not exist.
    pub fn load_toml(path: &Path) -> Result<Option<Self>, String> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(format!("failed to read {}: {e}", path.display())),
        };
        toml::from_str(&content)
            .map(Some)
            .map_err(|e| format!("invalid TOML in {}: {e}", path.display()))
    }

    /// Overlay `other` onto `self`.
    ///
    /// Optional values only overwrite when set; scalar values overwrite when
    /// they differ from their default, so a file that omits a key keeps the
    /// current value.
    pub fn merge_from(&mut self, other: &Settings) {
        let defaults = Settings::default();

        if other.network.chain_id != defaults.network.chain_id {
            self.network.chain_id = other.network.chain_id;
        }
        if other.network.rpc_url.is_some() {
            self.network.rpc_url = other.network.rpc_url.clone();
        }
        if other.network.rpc_timeout_ms != defaults.network.rpc_timeout_ms {
            self.network.rpc_timeout_ms = other.network.rpc_timeout_ms;
        }

        let contracts = &other.contracts;
        if contracts.identity.is_some() {
            self.contracts.identity = contracts.identity.clone();
        }
        if contracts.asset.is_some() {
            self.contracts.asset = contracts.asset.clone();
        }
        if contracts.transaction.is_some() {
            self.contracts.transaction = contracts.transaction.clone();
        }
        if contracts.dispute.is_some() {
            self.contracts.dispute = contracts.dispute.clone();
        }

        if other.dispatch.gas_limit != defaults.dispatch.gas_limit {
            self.dispatch.gas_limit = other.dispatch.gas_limit;
        }
        if other.confirmation.max_attempts != defaults.confirmation.max_attempts {
            self.confirmation.max_attempts = other.confirmation.max_attempts;
        }
        if other.confirmation.delay_ms != defaults.confirmation.delay_ms {
            self.confirmation.delay_ms = other.confirmation.delay_ms;
        }
        if other.cache.ttl_secs != defaults.cache.ttl_secs {
            self.cache.ttl_secs = other.cache.ttl_secs;
        }
    }
}
