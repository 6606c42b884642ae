//! registry-sync: on-chain state synchronization and authorization.
//!
//! Keeps a client's view of four ledger registries (identities, land parcels,
//! purchase requests, disputes) consistent and authorized:
//!
//! - [`connection`] owns the one signer-connected binding set, created lazily
//!   and never duplicated under concurrent callers
//! - [`dispatch`] is the uniform entry point for view calls and transactions
//! - [`role`] reduces identity flags to a single role and landing route
//! - [`events`] bridges contract events onto a local notification bus
//! - [`retry`] confirms that a mined mutation has become observable
//! - [`cache`] holds resolved identity snapshots for a short TTL
//! - [`session`] ties them together for one connected identity
//! - [`domain`] offers typed clients for each registry

pub mod bootstrap;
pub mod cache;
pub mod chain;
pub mod cli;
pub mod config;
pub mod connection;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod events;
pub mod retry;
pub mod role;
pub mod session;
pub mod settings;
pub mod testing;

pub use cache::{MemorySessionStorage, SessionCache, SessionStorage};
pub use chain::{Address, B256, Registry};
pub use config::Config;
pub use connection::{BindingSet, ConnectionManager};
pub use dispatch::{CallDispatcher, CallOptions, CallOutcome};
pub use error::{Error, Result};
pub use events::{EventBridge, LocalBus, NotificationBus};
pub use retry::{RetryPolicy, mutate_and_confirm};
pub use role::{IdentityStatus, Role, RouteDecision, RouteId};
pub use session::AuthSession;
