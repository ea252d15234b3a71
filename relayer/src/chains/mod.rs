//! Ledgers a signed trade can be settled on.

use async_trait::async_trait;
use darkpool_intent::{SettlementArtifact, TradeHash};

use crate::types::SettlementError;

pub mod memory;
pub mod rpc;

pub use memory::InMemoryLedger;
pub use rpc::RpcSettlementLedger;

/// Trait for interacting with the settlement contract
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    /// Records the trade and returns the transaction hash.
    async fn submit_settlement(&self, artifact: &SettlementArtifact) -> Result<String, SettlementError>;

    async fn is_settled(&self, trade_hash: &TradeHash) -> Result<bool, SettlementError>;
}
