//! Transaction registry client: purchase requests against listed parcels.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::{id_arg, quantity, wei};
use crate::chain::{Address, Receipt, Registry, TxOptions};
use crate::dispatch::CallDispatcher;
use crate::error::Error;

/// Lifecycle of a purchase request, encoded on chain as a small integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
    Completed,
}

impl TryFrom<u8> for RequestStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Pending),
            1 => Ok(Self::Accepted),
            2 => Ok(Self::Rejected),
            3 => Ok(Self::Completed),
            other => Err(format!("unknown request status {other}")),
        }
    }
}

impl From<RequestStatus> for u8 {
    fn from(status: RequestStatus) -> Self {
        match status {
            RequestStatus::Pending => 0,
            RequestStatus::Accepted => 1,
            RequestStatus::Rejected => 2,
            RequestStatus::Completed => 3,
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Completed => "completed",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    #[serde(deserialize_with = "quantity")]
    pub id: u64,
    #[serde(deserialize_with = "quantity")]
    pub land_id: u64,
    pub buyer: Address,
    pub seller: Address,
    /// Offered amount in wei, as a decimal string.
    #[serde(deserialize_with = "wei")]
    pub offer_wei: String,
    pub status: RequestStatus,
}

pub struct TransactionRegistryClient {
    dispatcher: Arc<CallDispatcher>,
}

impl TransactionRegistryClient {
    pub fn new(dispatcher: Arc<CallDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Offer `offer_wei` for `land_id`; the offer travels as the call value.
    pub async fn request_purchase(&self, land_id: u64, offer_wei: u128) -> Result<Receipt, Error> {
        let options = TxOptions {
            value_wei: Some(offer_wei),
            ..TxOptions::default()
        };
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Transaction,
                "requestToPurchase",
                vec![id_arg(land_id)],
                options,
            )
            .await?)
    }

    pub async fn accept_request(&self, request_id: u64) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Transaction,
                "acceptRequest",
                vec![id_arg(request_id)],
                TxOptions::default(),
            )
            .await?)
    }

    pub async fn reject_request(&self, request_id: u64) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Transaction,
                "rejectRequest",
                vec![id_arg(request_id)],
                TxOptions::default(),
            )
            .await?)
    }

    pub async fn requests_for_land(&self, land_id: u64) -> Result<Vec<PurchaseRequest>, Error> {
        Ok(self
            .dispatcher
            .view_as(
                Registry::Transaction,
                "getRequestsForLand",
                vec![id_arg(land_id)],
            )
            .await?)
    }
}
