use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use thiserror::Error;

use crate::hash::{trade_hash, TradeHash};
use crate::types::trade::{SettlementArtifact, Trade};

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signing key: {0}")]
    InvalidKey(String),

    #[error("invalid signature encoding: {0}")]
    InvalidEncoding(String),

    #[error("trade hash mismatch: expected {expected}, got {got}")]
    HashMismatch { expected: String, got: String },

    #[error("signature does not verify against signer {0}")]
    Rejected(String),
}

/// Enclave-held ed25519 key that attests matched trades.
pub struct TradeSigner {
    key: SigningKey,
}

impl TradeSigner {
    pub fn from_bytes(seed: &[u8; 32]) -> Self {
        Self {
            key: SigningKey::from_bytes(seed),
        }
    }

    /// Parses a 32-byte seed given as hex, with or without `0x`.
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SignatureError> {
        let digits = seed_hex.trim();
        let digits = digits.strip_prefix("0x").unwrap_or(digits);
        let bytes = hex::decode(digits).map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|_| SignatureError::InvalidKey("seed must be 32 bytes".to_string()))?;
        Ok(Self::from_bytes(&seed))
    }

    pub fn public_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.key.verifying_key().to_bytes()))
    }

    pub fn sign_hash(&self, hash: &TradeHash) -> Signature {
        self.key.sign(hash.as_bytes())
    }

    /// Hashes and signs a trade, producing the artifact the settlement
    /// submitter consumes.
    pub fn attest(&self, trade: &Trade) -> SettlementArtifact {
        let hash = trade_hash(trade);
        let signature = self.sign_hash(&hash);
        SettlementArtifact {
            trade: trade.clone(),
            trade_hash: hash,
            signature: format!("0x{}", hex::encode(signature.to_bytes())),
            signer: self.public_key_hex(),
        }
    }
}

impl std::fmt::Debug for TradeSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeSigner")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Checks a hex signature over `hash` against a hex public key.
pub fn verify_trade(
    hash: &TradeHash,
    signature_hex: &str,
    public_key_hex: &str,
) -> Result<(), SignatureError> {
    let sig_bytes = decode_fixed::<64>(signature_hex)?;
    let key_bytes = decode_fixed::<32>(public_key_hex)?;

    let public_key = VerifyingKey::from_bytes(&key_bytes)
        .map_err(|e| SignatureError::InvalidKey(e.to_string()))?;
    let signature = Signature::from_bytes(&sig_bytes);

    public_key
        .verify(hash.as_bytes(), &signature)
        .map_err(|_| SignatureError::Rejected(public_key_hex.to_string()))
}

fn decode_fixed<const N: usize>(input: &str) -> Result<[u8; N], SignatureError> {
    let digits = input.strip_prefix("0x").unwrap_or(input);
    let bytes = hex::decode(digits).map_err(|e| SignatureError::InvalidEncoding(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|_| SignatureError::InvalidEncoding(format!("expected {N} bytes")))
}
