//! User registry client.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::address_arg;
use crate::chain::{Address, Receipt, Registry, TxOptions};
use crate::dispatch::CallDispatcher;
use crate::error::Error;
use crate::retry::{RetryPolicy, mutate_and_confirm};

/// Profile submitted when an address registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRegistration {
    pub name: String,
    pub email: String,
    /// Location of the identity document, typically an IPFS URI.
    pub document_uri: String,
}

pub struct IdentityRegistryClient {
    dispatcher: Arc<CallDispatcher>,
    policy: RetryPolicy,
}

impl IdentityRegistryClient {
    pub fn new(dispatcher: Arc<CallDispatcher>, policy: RetryPolicy) -> Self {
        Self { dispatcher, policy }
    }

    pub async fn register_user(&self, registration: &UserRegistration) -> Result<Receipt, Error> {
        let args = vec![
            Value::String(registration.name.clone()),
            Value::String(registration.email.clone()),
            Value::String(registration.document_uri.clone()),
        ];
        Ok(self
            .dispatcher
            .send_and_confirm(Registry::Identity, "registerUser", args, TxOptions::default())
            .await?)
    }

    /// Verify `user` and wait until the registry reports it verified.
    pub async fn verify_user(&self, user: Address) -> Result<Receipt, Error> {
        let dispatcher = &self.dispatcher;
        mutate_and_confirm(
            || {
                dispatcher.send_and_confirm(
                    Registry::Identity,
                    "verifyUser",
                    vec![address_arg(user)],
                    TxOptions::default(),
                )
            },
            move || {
                dispatcher.view_as::<bool>(Registry::Identity, "isUserVerified", vec![address_arg(user)])
            },
            self.policy,
            &format!("user {user} is verified"),
        )
        .await
    }

    /// Reject `user` with `reason` and wait until the registry reports it.
    pub async fn reject_user(&self, user: Address, reason: &str) -> Result<Receipt, Error> {
        let dispatcher = &self.dispatcher;
        mutate_and_confirm(
            || {
                dispatcher.send_and_confirm(
                    Registry::Identity,
                    "rejectUser",
                    vec![address_arg(user), Value::String(reason.to_string())],
                    TxOptions::default(),
                )
            },
            move || {
                dispatcher.view_as::<bool>(Registry::Identity, "isUserRejected", vec![address_arg(user)])
            },
            self.policy,
            &format!("user {user} is rejected"),
        )
        .await
    }

    pub async fn add_inspector(&self, inspector: Address) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Identity,
                "addInspector",
                vec![address_arg(inspector)],
                TxOptions::default(),
            )
            .await?)
    }

    pub async fn remove_inspector(&self, inspector: Address) -> Result<Receipt, Error> {
        Ok(self
            .dispatcher
            .send_and_confirm(
                Registry::Identity,
                "removeInspector",
                vec![address_arg(inspector)],
                TxOptions::default(),
            )
            .await?)
    }

    /// Addresses awaiting an inspector's decision.
    pub async fn pending_users(&self) -> Result<Vec<Address>, Error> {
        Ok(self
            .dispatcher
            .view_as(Registry::Identity, "getPendingUsers", vec![])
            .await?)
    }
}
