use async_trait::async_trait;
use darkpool_intent::{SettlementArtifact, TradeHash};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use tokio::sync::Mutex;

use super::SettlementLedger;
use crate::types::SettlementError;

#[derive(Default)]
struct LedgerState {
    settled: HashMap<TradeHash, String>,
    failures: VecDeque<SettlementError>,
    submissions: usize,
}

/// Settlement contract kept in memory. Failures can be scripted.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an error for the next submission.
    pub async fn fail_next(&self, error: SettlementError) {
        self.state.lock().await.failures.push_back(error);
    }

    pub async fn submissions(&self) -> usize {
        self.state.lock().await.submissions
    }

    pub async fn settled_tx(&self, trade_hash: &TradeHash) -> Option<String> {
        self.state.lock().await.settled.get(trade_hash).cloned()
    }
}

#[async_trait]
impl SettlementLedger for InMemoryLedger {
    async fn submit_settlement(&self, artifact: &SettlementArtifact) -> Result<String, SettlementError> {
        let mut state = self.state.lock().await;
        state.submissions += 1;

        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        if state.settled.contains_key(&artifact.trade_hash) {
            return Err(SettlementError::ChainSubmission {
                reason: format!("trade {} already settled", artifact.trade_hash),
                reverted: true,
            });
        }

        let mut hasher = Sha256::new();
        hasher.update(artifact.trade_hash.as_bytes());
        hasher.update((state.settled.len() as u64).to_be_bytes());
        let tx_hash = format!("0x{}", hex::encode(hasher.finalize()));

        state.settled.insert(artifact.trade_hash, tx_hash.clone());
        Ok(tx_hash)
    }

    async fn is_settled(&self, trade_hash: &TradeHash) -> Result<bool, SettlementError> {
        Ok(self.state.lock().await.settled.contains_key(trade_hash))
    }
}
