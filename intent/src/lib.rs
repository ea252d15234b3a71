//! Shared vocabulary of the darkpool pipeline.
//!
//! The relayer (client side) and the confidential worker (enclave side) both
//! speak in terms of these types: the trade intent that gets protected, the
//! trade the worker derives from it, and the signed settlement artifact that
//! is eventually submitted on chain.

pub mod types {
    pub mod address;
    pub mod intent;
    pub mod trade;
}

pub mod hash;
pub mod signer;

pub use hash::{trade_hash, TradeHash};
pub use signer::{verify_trade, SignatureError, TradeSigner};
pub use types::address::{Address, AddressError};
pub use types::intent::{IntentPayload, Side, TradeIntent, FIXED_QUANTITY};
pub use types::trade::{SettlementArtifact, Trade};
