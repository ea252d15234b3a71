use backoff::{future::retry, ExponentialBackoffBuilder};
use darkpool_intent::{SettlementArtifact, SignatureError, Trade, TradeHash, TradeSigner};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::chains::SettlementLedger;
use crate::types::{RetryPolicy, SettlementError, SettlementReceipt};

/// Signs matched trades for on-chain settlement.
pub struct SettlementSigner {
    signer: TradeSigner,
}

impl SettlementSigner {
    pub fn from_seed_hex(seed_hex: &str) -> Result<Self, SettlementError> {
        let signer = TradeSigner::from_seed_hex(seed_hex)
            .map_err(|e| SettlementError::Config(format!("Invalid signing key: {}", e)))?;
        Ok(Self { signer })
    }

    /// Loads the seed from the environment variable named `var`.
    pub fn from_env(var: &str) -> Result<Self, SettlementError> {
        let seed = std::env::var(var)
            .map_err(|_| SettlementError::Config(format!("{} is not set", var)))?;
        Self::from_seed_hex(&seed)
    }

    pub fn public_key_hex(&self) -> String {
        self.signer.public_key_hex()
    }

    pub fn sign(&self, trade: &Trade) -> SettlementArtifact {
        self.signer.attest(trade)
    }
}

/// Submits signed trades with bounded retries and at-most-once semantics per
/// trade hash.
pub struct SettlementSubmitter<L: ?Sized> {
    ledger: Arc<L>,
    policy: RetryPolicy,
    trusted_signer: Option<String>,
    settled: Mutex<HashMap<TradeHash, SettlementReceipt>>,
}

impl<L: SettlementLedger + ?Sized> SettlementSubmitter<L> {
    pub fn new(ledger: Arc<L>, policy: RetryPolicy) -> Self {
        Self {
            ledger,
            policy,
            trusted_signer: None,
            settled: Mutex::new(HashMap::new()),
        }
    }

    /// Only artifacts attested by this hex-encoded public key are submitted.
    pub fn with_trusted_signer(mut self, public_key_hex: impl Into<String>) -> Self {
        self.trusted_signer = Some(public_key_hex.into().to_lowercase());
        self
    }

    pub async fn settle(&self, artifact: &SettlementArtifact) -> Result<SettlementReceipt, SettlementError> {
        validate_artifact(artifact)?;
        if let Some(expected) = &self.trusted_signer {
            if !artifact.signer.eq_ignore_ascii_case(expected) {
                warn!("Refusing artifact for {} from signer {}", artifact.trade_hash, artifact.signer);
                return Err(SettlementError::UntrustedSigner {
                    signer: artifact.signer.clone(),
                    expected: expected.clone(),
                });
            }
        }
        let trade_hash = artifact.trade_hash;

        if let Some(receipt) = self.settled.lock().await.get(&trade_hash) {
            info!("Trade {} already settled by this relayer", trade_hash);
            return Ok(SettlementReceipt::already_settled(trade_hash, receipt.tx_hash.clone()));
        }

        match self.ledger.is_settled(&trade_hash).await {
            Ok(true) => {
                info!("Trade {} already settled on chain", trade_hash);
                let receipt = SettlementReceipt::already_settled(trade_hash, None);
                self.settled.lock().await.insert(trade_hash, receipt.clone());
                return Ok(receipt);
            }
            Ok(false) => {}
            Err(e) => warn!("Could not check settlement status of {}: {}", trade_hash, e),
        }

        let receipt = self.submit_with_retry(artifact).await?;
        self.settled.lock().await.insert(trade_hash, receipt.clone());
        Ok(receipt)
    }

    /// Submits the artifact, retrying transient failures with exponential
    /// backoff until the attempt budget or the overall timeout runs out.
    async fn submit_with_retry(&self, artifact: &SettlementArtifact) -> Result<SettlementReceipt, SettlementError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.policy.initial_delay)
            .with_max_interval(self.policy.max_delay)
            .with_max_elapsed_time(Some(self.policy.timeout))
            .build();

        let attempts = AtomicU32::new(0);
        let attempts_ref = &attempts;
        let ledger = &self.ledger;
        let max_attempts = self.policy.attempts.max(1);

        let result = retry(backoff, || async move {
            let attempt = attempts_ref.fetch_add(1, Ordering::SeqCst) + 1;
            debug!("Settlement attempt {} for {}", attempt, artifact.trade_hash);

            match ledger.submit_settlement(artifact).await {
                Ok(tx_hash) => Ok(tx_hash),
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    warn!("Settlement attempt {} failed: {}", attempt, e);
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await;

        let attempts = attempts.load(Ordering::SeqCst);
        match result {
            Ok(tx_hash) => {
                info!(
                    "Trade {} settled in tx {} after {} attempt(s)",
                    artifact.trade_hash, tx_hash, attempts
                );
                Ok(SettlementReceipt::submitted(artifact.trade_hash, tx_hash, attempts))
            }
            Err(e) => {
                error!("Settlement of {} failed: {}", artifact.trade_hash, e);
                Err(SettlementError::SettlementFailure {
                    attempts,
                    last_error: e.to_string(),
                })
            }
        }
    }
}

fn validate_artifact(artifact: &SettlementArtifact) -> Result<(), SettlementError> {
    let trade = &artifact.trade;
    if trade.base_amount == 0 || trade.quote_amount == 0 {
        return Err(SettlementError::InvalidArtifact(
            "trade amounts must be positive".to_string(),
        ));
    }
    if trade.maker == trade.taker {
        return Err(SettlementError::InvalidArtifact(
            "maker and taker must differ".to_string(),
        ));
    }

    artifact.verify().map_err(|e| match e {
        SignatureError::HashMismatch { .. } => SettlementError::InvalidArtifact(e.to_string()),
        other => SettlementError::InvalidSignature(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chains::InMemoryLedger;
    use darkpool_intent::Address;
    use std::time::Duration;

    fn trade() -> Trade {
        Trade {
            maker: Address::parse("0x00000000000000000000000000000000000000a1").unwrap(),
            taker: Address::parse("0x00000000000000000000000000000000000000b2").unwrap(),
            base_asset: "IDP".to_string(),
            quote_asset: "PYUSD".to_string(),
            base_amount: 1,
            quote_amount: 100,
            price: 100,
            nonce: 42,
        }
    }

    fn signer() -> SettlementSigner {
        SettlementSigner::from_seed_hex(&"11".repeat(32)).unwrap()
    }

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn test_signer_rejects_bad_seed() {
        assert!(matches!(
            SettlementSigner::from_seed_hex("zz"),
            Err(SettlementError::Config(_))
        ));
        assert!(SettlementSigner::from_env("DARKPOOL_TEST_UNSET_SIGNING_KEY").is_err());
    }

    #[test]
    fn test_signer_from_env_matches_seed() {
        std::env::set_var("DARKPOOL_TEST_SIGNING_KEY_FROM_ENV", "11".repeat(32));
        let from_env = SettlementSigner::from_env("DARKPOOL_TEST_SIGNING_KEY_FROM_ENV").unwrap();
        assert_eq!(from_env.public_key_hex(), signer().public_key_hex());
        assert_eq!(from_env.sign(&trade()), signer().sign(&trade()));
    }

    #[tokio::test]
    async fn test_pinned_signer_accepts_own_artifacts() {
        let ledger = Arc::new(InMemoryLedger::new());
        let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3))
            .with_trusted_signer(signer().public_key_hex().to_uppercase());

        let receipt = submitter.settle(&signer().sign(&trade())).await.unwrap();
        assert!(!receipt.already_settled);
        assert_eq!(ledger.submissions().await, 1);
    }

    #[tokio::test]
    async fn test_settle_once() {
        let ledger = Arc::new(InMemoryLedger::new());
        let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3));
        let artifact = signer().sign(&trade());

        let receipt = submitter.settle(&artifact).await.unwrap();
        assert_eq!(receipt.attempts, 1);
        assert!(!receipt.already_settled);
        assert_eq!(ledger.settled_tx(&artifact.trade_hash).await, receipt.tx_hash);
    }

    #[tokio::test]
    async fn test_rejects_tampered_artifact() {
        let ledger = Arc::new(InMemoryLedger::new());
        let submitter = SettlementSubmitter::new(Arc::clone(&ledger), fast_policy(3));

        let mut artifact = signer().sign(&trade());
        artifact.trade.quote_amount = 1;
        assert!(matches!(
            submitter.settle(&artifact).await,
            Err(SettlementError::InvalidArtifact(_))
        ));
        assert_eq!(ledger.submissions().await, 0);
    }
}
