use serde::{Deserialize, Serialize};

use super::address::Address;
use crate::hash::{trade_hash, TradeHash};
use crate::signer::{verify_trade, SignatureError};

/// A matched trade, ready to be attested by the enclave and settled.
///
/// Field order is the hashing order; see [`crate::hash::trade_hash`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trade {
    /// Seller of the base asset.
    pub maker: Address,
    /// Buyer of the base asset.
    pub taker: Address,
    pub base_asset: String,
    pub quote_asset: String,
    pub base_amount: u64,
    pub quote_amount: u64,
    /// Quote units per base unit.
    pub price: u64,
    pub nonce: u64,
}

/// Signed trade emitted by the worker as `settlement.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementArtifact {
    pub trade: Trade,
    pub trade_hash: TradeHash,
    /// `0x`-prefixed hex ed25519 signature over the trade hash.
    pub signature: String,
    /// `0x`-prefixed hex ed25519 public key of the enclave signer.
    pub signer: String,
}

impl SettlementArtifact {
    /// Recomputes the hash from the trade and checks the enclave signature.
    pub fn verify(&self) -> Result<(), SignatureError> {
        let recomputed = trade_hash(&self.trade);
        if recomputed != self.trade_hash {
            return Err(SignatureError::HashMismatch {
                expected: recomputed.to_string(),
                got: self.trade_hash.to_string(),
            });
        }
        verify_trade(&self.trade_hash, &self.signature, &self.signer)
    }
}
