use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

use super::address::Address;

/// Every intent trades exactly one unit of the synthetic asset.
pub const FIXED_QUANTITY: u64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("side must be buy or sell, got `{other}`")),
        }
    }
}

/// A user's wish to buy or sell one unit. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeIntent {
    side: Side,
    owner: Address,
    quantity: u64,
}

impl TradeIntent {
    pub fn new(side: Side, owner: Address) -> Self {
        Self {
            side,
            owner,
            quantity: FIXED_QUANTITY,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn owner(&self) -> &Address {
        &self.owner
    }

    pub fn quantity(&self) -> u64 {
        self.quantity
    }

    /// The document that gets encrypted into the protected asset and that the
    /// worker reads back inside the enclave.
    pub fn payload(&self) -> IntentPayload {
        IntentPayload {
            side: self.side,
            owner: Some(self.owner.clone()),
            quantity: self.quantity,
        }
    }
}

/// Plaintext content of a protected trade intent.
///
/// `side` is the only required field; anything without it is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentPayload {
    pub side: Side,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Address>,
    #[serde(default = "default_quantity")]
    pub quantity: u64,
}

fn default_quantity() -> u64 {
    FIXED_QUANTITY
}
