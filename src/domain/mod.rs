//! Typed clients for the four registries.
//!
//! Each client is a thin layer over the [`CallDispatcher`](crate::dispatch::CallDispatcher):
//! it names the contract methods, shapes arguments and decodes results.
//! Mutations whose effect must be visible before the caller continues run
//! through [`mutate_and_confirm`](crate::retry::mutate_and_confirm).

pub mod dispute;
pub mod identity;
pub mod land;
pub mod purchase;

pub use dispute::{Dispute, DisputeRegistryClient};
pub use identity::{IdentityRegistryClient, UserRegistration};
pub use land::{Land, LandRegistration, LandRegistryClient};
pub use purchase::{PurchaseRequest, RequestStatus, TransactionRegistryClient};

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::chain::Address;

pub(crate) fn address_arg(address: Address) -> Value {
    Value::String(address.to_string())
}

pub(crate) fn id_arg(id: u64) -> Value {
    Value::from(id)
}

/// Wei amounts travel as decimal strings; they overflow JSON numbers.
pub(crate) fn wei_arg(wei: u128) -> Value {
    Value::String(wei.to_string())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum QuantityRepr {
    Number(u64),
    Text(String),
}

/// Deserialize an unsigned integer sent as a number or decimal string.
pub(crate) fn quantity<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    match QuantityRepr::deserialize(deserializer)? {
        QuantityRepr::Number(n) => Ok(n),
        QuantityRepr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Like [`quantity`] but for a list of ids.
pub(crate) fn quantities<'de, D>(deserializer: D) -> Result<Vec<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Vec::<QuantityRepr>::deserialize(deserializer)?
        .into_iter()
        .map(|repr| match repr {
            QuantityRepr::Number(n) => Ok(n),
            QuantityRepr::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
        })
        .collect()
}

/// Wei amount sent as a number or decimal string, kept as a decimal string.
pub(crate) fn wei<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        Value::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => Ok(s),
        other => Err(serde::de::Error::custom(format!(
            "expected a wei amount, got {other}"
        ))),
    }
}

/// Id list returned by `get*` listing views.
#[derive(Deserialize)]
#[serde(transparent)]
pub(crate) struct IdList(#[serde(deserialize_with = "quantities")] pub Vec<u64>);
