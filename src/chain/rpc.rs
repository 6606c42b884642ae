//! JSON-RPC `NetworkHandle` backed by `reqwest`.

use std::error::Error as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use alloy_primitives::{Address, hex};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::chain::NetworkHandle;
use crate::error::{ConnectionError, TransportFailure};

/// Network handle that speaks Ethereum JSON-RPC over HTTP.
#[derive(Debug)]
pub struct JsonRpcNetwork {
    url: reqwest::Url,
    client: Client,
    next_id: AtomicU64,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

impl JsonRpcNetwork {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, ConnectionError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| ConnectionError::Configuration(format!("invalid RPC URL '{url}': {e}")))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::Configuration(format!("HTTP client init failed: {e}")))?;
        Ok(Self {
            url,
            client,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });

        let response = self
            .client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .map_err(|e| ConnectionError::Transport {
                kind: classify_transport_error(&e),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Transport {
                kind: TransportFailure::Http,
                message: format!("HTTP {} from {method}", status.as_u16()),
            });
        }

        let payload: RpcResponse = response
            .json()
            .await
            .map_err(|e| ConnectionError::Rpc(format!("{method}: malformed response: {e}")))?;

        if let Some(error) = payload.error {
            return Err(ConnectionError::Rpc(format!(
                "{method}: {} (code {})",
                error.message, error.code
            )));
        }

        payload
            .result
            .ok_or_else(|| ConnectionError::Rpc(format!("{method}: response has no result")))
    }
}

#[async_trait]
impl NetworkHandle for JsonRpcNetwork {
    async fn chain_id(&self) -> Result<u64, ConnectionError> {
        let result = self.request("eth_chainId", json!([])).await?;
        parse_quantity(&result)
            .ok_or_else(|| ConnectionError::Rpc(format!("eth_chainId: not a quantity: {result}")))
    }

    async fn code_at(&self, address: Address) -> Result<Vec<u8>, ConnectionError> {
        let result = self
            .request("eth_getCode", json!([address, "latest"]))
            .await?;
        let encoded = result
            .as_str()
            .ok_or_else(|| ConnectionError::Rpc(format!("eth_getCode: not a string: {result}")))?;
        hex::decode(encoded)
            .map_err(|e| ConnectionError::Rpc(format!("eth_getCode: invalid hex: {e}")))
    }
}

/// Parse a JSON-RPC hex quantity such as `"0xaa36a7"`.
pub(crate) fn parse_quantity(value: &Value) -> Option<u64> {
    let raw = value.as_str()?;
    let digits = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X"))?;
    if digits.is_empty() {
        return None;
    }
    u64::from_str_radix(digits, 16).ok()
}

fn classify_transport_error(error: &reqwest::Error) -> TransportFailure {
    if error.is_timeout() {
        return TransportFailure::Timeout;
    }

    let mut source = error.source();
    while let Some(err) = source {
        if let Some(io_error) = err.downcast_ref::<std::io::Error>() {
            return match io_error.kind() {
                std::io::ErrorKind::NotFound => TransportFailure::Dns,
                _ => TransportFailure::Connect,
            };
        }
        source = err.source();
    }

    let lowered = error.to_string().to_ascii_lowercase();
    if lowered.contains("dns")
        || lowered.contains("lookup")
        || lowered.contains("name or service not known")
        || lowered.contains("no such host")
    {
        TransportFailure::Dns
    } else {
        TransportFailure::Connect
    }
}
