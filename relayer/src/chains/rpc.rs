use async_trait::async_trait;
use darkpool_intent::{Address, SettlementArtifact, TradeHash};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::SettlementLedger;
use crate::types::{SettlementConfig, SettlementError};

const SETTLE_METHOD: &str = "darkpool_settle";
const IS_SETTLED_METHOD: &str = "darkpool_isSettled";

/// JSON-RPC error code nodes use for execution reverts.
const EXECUTION_REVERTED: i64 = 3;

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorObject>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorObject {
    code: i64,
    message: String,
}

/// Settlement contract reached through a JSON-RPC 2.0 endpoint.
pub struct RpcSettlementLedger {
    client: Client,
    rpc_url: String,
    contract: Address,
    next_id: AtomicU64,
}

impl RpcSettlementLedger {
    pub fn new(config: &SettlementConfig) -> Result<Self, SettlementError> {
        if config.rpc_url.trim().is_empty() {
            return Err(SettlementError::Config("settlement RPC URL is required".to_string()));
        }
        let contract = Address::parse(&config.contract_address)
            .map_err(|e| SettlementError::Config(format!("Invalid contract address: {}", e)))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SettlementError::Config(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: config.rpc_url.clone(),
            contract,
            next_id: AtomicU64::new(1),
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, SettlementError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "rpc call");

        let response = self.client.post(&self.rpc_url).json(&body).send().await?;
        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(SettlementError::Network(format!("RPC endpoint returned {status}")));
        }
        if !status.is_success() {
            return Err(SettlementError::Config(format!("RPC endpoint returned {status}")));
        }

        let envelope: RpcResponse<T> = response
            .json()
            .await
            .map_err(|e| SettlementError::Serialization(e.to_string()))?;
        if let Some(error) = envelope.error {
            return Err(classify_rpc_error(error));
        }
        envelope
            .result
            .ok_or_else(|| SettlementError::Serialization("RPC response has no result".to_string()))
    }
}

fn classify_rpc_error(error: RpcErrorObject) -> SettlementError {
    let reverted =
        error.code == EXECUTION_REVERTED || error.message.to_ascii_lowercase().contains("revert");
    SettlementError::ChainSubmission {
        reason: format!("{} (code {})", error.message, error.code),
        reverted,
    }
}

#[async_trait]
impl SettlementLedger for RpcSettlementLedger {
    async fn submit_settlement(&self, artifact: &SettlementArtifact) -> Result<String, SettlementError> {
        info!("Submitting settlement for trade {}", artifact.trade_hash);
        let params = json!([{
            "contract": self.contract,
            "trade": artifact.trade,
            "tradeHash": artifact.trade_hash,
            "signature": artifact.signature,
            "signer": artifact.signer,
        }]);
        self.call(SETTLE_METHOD, params).await
    }

    async fn is_settled(&self, trade_hash: &TradeHash) -> Result<bool, SettlementError> {
        self.call(IS_SETTLED_METHOD, json!([self.contract, trade_hash]))
            .await
    }
}
