//! Dispute registry client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{id_arg, quantity};
use crate::chain::{Address, Receipt, Registry, TxOptions};
use crate::dispatch::CallDispatcher;
use crate::error::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dispute {
    #[serde(deserialize_with = "quantity")]
    pub id: u64,
    #[serde(deserialize_with = "quantity")]
    pub land_id: u64,
    pub raised_by: Address,
    pub reason: String,
    pub resolved: bool,
    #[serde(default)]
    pub resolution: String,
}

pub struct DisputeRegistryClient {
    dispatcher: Arc<CallDispatcher>,
}

impl DisputeRegistryClient {
    pub fn new(dispatcher: Arc<CallDispatcher>) -> Self {
        Self { dispatcher }
    }

    pub async fn raise_dispute(&self, land_id: u64, reason: &str) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Dispute,
                "raiseDispute",
                vec![id_arg(land_id), Value::String(reason.to_string())],
                TxOptions::default(),
            )
            .await?)
    }

    pub async fn resolve_dispute(&self, dispute_id: u64, resolution: &str) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Dispute,
                "resolveDispute",
                vec![id_arg(dispute_id), Value::String(resolution.to_string())],
                TxOptions::default(),
            )
            .await?)
    }

    pub async fn disputes_for_land(&self, land_id: u64) -> Result<Vec<Dispute>, Error> {
        Ok(self
            .dispatcher
            .view_as(Registry::Dispute, "getDisputesForLand", vec![id_arg(land_id)])
            .await?)
    }
}
