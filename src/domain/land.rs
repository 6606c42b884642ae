//! Land registry client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{IdList, address_arg, id_arg, quantity, wei, wei_arg};
use crate::chain::{Address, Receipt, Registry, TxOptions};
use crate::dispatch::CallDispatcher;
use crate::error::{DispatchError, Error};
use crate::retry::{RetryPolicy, mutate_and_confirm};

/// A registered parcel as returned by `getLand`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Land {
    #[serde(deserialize_with = "quantity")]
    pub id: u64,
    pub owner: Address,
    pub location: String,
    #[serde(deserialize_with = "quantity")]
    pub area_sqm: u64,
    /// Asking price in wei, as a decimal string.
    #[serde(deserialize_with = "wei")]
    pub price_wei: String,
    pub document_uri: String,
    pub is_verified: bool,
    pub is_for_sale: bool,
}

/// Details submitted when registering a parcel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandRegistration {
    pub location: String,
    pub area_sqm: u64,
    pub price_wei: u128,
    pub document_uri: String,
}

pub struct LandRegistryClient {
    dispatcher: Arc<CallDispatcher>,
    policy: RetryPolicy,
}

impl LandRegistryClient {
    pub fn new(dispatcher: Arc<CallDispatcher>, policy: RetryPolicy) -> Self {
        Self { dispatcher, policy }
    }

    pub async fn register_land(&self, registration: &LandRegistration) -> Result<Receipt, Error> {
        let args = vec![
            Value::String(registration.location.clone()),
            id_arg(registration.area_sqm),
            wei_arg(registration.price_wei),
            Value::String(registration.document_uri.clone()),
        ];
        Ok(self
            .dispatcher
            .send_and_confirm(Registry::Asset, "registerLand", args, TxOptions::default())
            .await?)
    }

    pub async fn land(&self, land_id: u64) -> Result<Land, Error> {
        Ok(self
            .dispatcher
            .view_as(Registry::Asset, "getLand", vec![id_arg(land_id)])
            .await?)
    }

    pub async fn land_exists(&self, land_id: u64) -> Result<bool, Error> {
        Ok(self
            .dispatcher
            .view_as(Registry::Asset, "landExists", vec![id_arg(land_id)])
            .await?)
    }

    /// Ids of every parcel owned by `owner`.
    pub async fn lands_of(&self, owner: Address) -> Result<Vec<u64>, Error> {
        let ids: IdList = self
            .dispatcher
            .view_as(Registry::Asset, "getLandsByOwner", vec![address_arg(owner)])
            .await?;
        Ok(ids.0)
    }

    /// List or unlist a parcel and wait until the registry reflects it.
    pub async fn set_for_sale(&self, land_id: u64, for_sale: bool) -> Result<Receipt, Error> {
        let dispatcher = &self.dispatcher;
        let expectation = if for_sale {
            format!("land {land_id} is listed for sale")
        } else {
            format!("land {land_id} is not listed for sale")
        };
        mutate_and_confirm(
            || {
                dispatcher.send_and_confirm(
                    Registry::Asset,
                    "setForSale",
                    vec![id_arg(land_id), Value::Bool(for_sale)],
                    TxOptions::default(),
                )
            },
            move || async move {
                let listed: bool = dispatcher
                    .view_as(Registry::Asset, "isForSale", vec![id_arg(land_id)])
                    .await?;
                Ok::<_, DispatchError>(listed == for_sale)
            },
            self.policy,
            &expectation,
        )
        .await
    }

    /// Remove a parcel and wait until the registry no longer knows it.
    pub async fn remove_land(&self, land_id: u64) -> Result<Receipt, Error> {
        let dispatcher = &self.dispatcher;
        mutate_and_confirm(
            || {
                dispatcher.send_and_confirm(
                    Registry::Asset,
                    "removeLand",
                    vec![id_arg(land_id)],
                    TxOptions::default(),
                )
            },
            move || async move {
                let exists: bool = dispatcher
                    .view_as(Registry::Asset, "landExists", vec![id_arg(land_id)])
                    .await?;
                Ok::<_, DispatchError>(!exists)
            },
            self.policy,
            &format!("land {land_id} is removed"),
        )
        .await
    }
}
