use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::{fmt, str::FromStr};

use crate::types::trade::Trade;

const TRADE_DOMAIN: &[u8] = b"darkpool.trade.v1";

/// 32-byte trade digest, rendered as `0x`-prefixed hex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TradeHash(pub [u8; 32]);

impl TradeHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TradeHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl FromStr for TradeHash {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("0x").unwrap_or(s);
        let bytes = hex::decode(digits).map_err(|e| format!("invalid trade hash hex: {e}"))?;
        let array: [u8; 32] = bytes
            .try_into()
            .map_err(|_| "trade hash must be 32 bytes".to_string())?;
        Ok(TradeHash(array))
    }
}

impl TryFrom<String> for TradeHash {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TradeHash> for String {
    fn from(value: TradeHash) -> Self {
        value.to_string()
    }
}

/// Deterministic digest over the trade's fields in declaration order.
///
/// Strings are length-prefixed so that adjacent fields cannot bleed into
/// each other; integers are big-endian.
pub fn trade_hash(trade: &Trade) -> TradeHash {
    let mut hasher = Sha256::new();
    hasher.update(TRADE_DOMAIN);
    for text in [
        trade.maker.as_str(),
        trade.taker.as_str(),
        trade.base_asset.as_str(),
        trade.quote_asset.as_str(),
    ] {
        hasher.update((text.len() as u64).to_be_bytes());
        hasher.update(text.as_bytes());
    }
    hasher.update(trade.base_amount.to_be_bytes());
    hasher.update(trade.quote_amount.to_be_bytes());
    hasher.update(trade.price.to_be_bytes());
    hasher.update(trade.nonce.to_be_bytes());
    TradeHash(hasher.finalize().into())
}
