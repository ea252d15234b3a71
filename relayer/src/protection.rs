use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use darkpool_intent::{Address, IntentPayload, TradeIntent};
use rand::Rng;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::protocol::{AssetRegistration, ProtectionBackend};
use crate::types::{AssetHandle, ProtectedAsset, ProtectionError};

const ENVELOPE_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

/// Symmetric key a single intent is sealed under.
#[derive(Clone, PartialEq, Eq)]
pub struct DataKey([u8; 32]);

impl DataKey {
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(OsRng);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(key.as_slice());
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for DataKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataKey(***)")
    }
}

/// An encrypted intent ready to be registered.
#[derive(Debug, Clone)]
pub struct SealedIntent {
    pub envelope: String,
    pub data_key: DataKey,
}

/// Encrypts the intent payload under a fresh key and nonce.
pub fn seal_intent(payload: &IntentPayload) -> Result<SealedIntent, ProtectionError> {
    let plaintext = serde_json::to_vec(payload)?;

    let data_key = DataKey::generate();
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(data_key.as_bytes()));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_ref())
        .map_err(|e| ProtectionError::Encryption(e.to_string()))?;

    let mut sealed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    sealed.extend_from_slice(nonce.as_slice());
    sealed.extend_from_slice(&ciphertext);

    Ok(SealedIntent {
        envelope: format!("{ENVELOPE_PREFIX}{}", STANDARD.encode(sealed)),
        data_key,
    })
}

/// Reverses [`seal_intent`]. Only the holder of the data key can do this.
pub fn open_envelope(envelope: &str, key: &DataKey) -> Result<IntentPayload, ProtectionError> {
    let encoded = envelope
        .strip_prefix(ENVELOPE_PREFIX)
        .ok_or_else(|| ProtectionError::Encryption("unknown envelope version".to_string()))?;
    let sealed = STANDARD
        .decode(encoded)
        .map_err(|e| ProtectionError::Encryption(format!("invalid envelope encoding: {e}")))?;
    if sealed.len() <= NONCE_LEN {
        return Err(ProtectionError::Encryption("envelope too short".to_string()));
    }

    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|e| ProtectionError::Encryption(e.to_string()))?;

    Ok(serde_json::from_slice(&plaintext)?)
}

/// Content address of an envelope.
pub fn asset_address(envelope: &str) -> AssetHandle {
    Address::from_digest(&Sha256::digest(envelope.as_bytes()))
}

/// Random 9-digit display name.
pub fn random_asset_name() -> String {
    rand::rng().random_range(100_000_000u32..1_000_000_000).to_string()
}

/// Encrypts trade intents and registers them as protected assets.
pub struct ProtectionClient<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: ProtectionBackend + ?Sized> ProtectionClient<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn protect(&self, intent: &TradeIntent) -> Result<ProtectedAsset, ProtectionError> {
        let sealed = seal_intent(&intent.payload())?;
        let address = asset_address(&sealed.envelope);
        let name = random_asset_name();
        debug!(%address, %name, side = %intent.side(), "sealed trade intent");

        let asset = self
            .backend
            .register_asset(AssetRegistration {
                address,
                name,
                owner: intent.owner().clone(),
                envelope: sealed.envelope,
                data_key: sealed.data_key,
            })
            .await?;

        info!("Protected asset registered: {} ({})", asset.address, asset.name);
        Ok(asset)
    }
}
