use chrono::{DateTime, Utc};
use darkpool_intent::{Address, SignatureError, TradeHash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Core records and error taxonomy of the protect, grant, dispatch, settle pipeline

pub type Identity = Address;
pub type AssetHandle = Address;
pub type AppId = Address;
pub type PoolId = Address;

/// An encrypted trade intent registered with the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectedAsset {
    pub address: AssetHandle,
    pub name: String,
    pub owner: Identity,
    /// `enc:v1:` envelope holding nonce and ciphertext.
    pub encrypted_payload_ref: String,
    pub created_at: DateTime<Utc>,
}

/// Restriction triple carried by every grant. The zero address means any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Restrictions {
    pub app: Address,
    pub workerpool: Address,
    pub requester: Address,
}

impl Restrictions {
    /// The restrictions the protocol applies when the caller names none:
    /// bound to the authorized app and user, any workerpool.
    pub fn bound_to(app: &AppId, user: &Identity) -> Self {
        Self {
            app: app.clone(),
            workerpool: Address::zero(),
            requester: user.clone(),
        }
    }
}

/// Parameters of a grant issuance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantRequest {
    pub dataset: AssetHandle,
    pub authorized_app: AppId,
    pub authorized_user: Identity,
    pub price_per_access: u64,
    pub number_of_access: u64,
    pub restrictions: Option<Restrictions>,
}

impl GrantRequest {
    pub fn new(
        dataset: AssetHandle,
        authorized_app: AppId,
        authorized_user: Identity,
        price_per_access: u64,
        number_of_access: u64,
    ) -> Self {
        Self {
            dataset,
            authorized_app,
            authorized_user,
            price_per_access,
            number_of_access,
            restrictions: None,
        }
    }

    /// Builds a request from untrusted textual price and volume values.
    pub fn from_raw_terms(
        dataset: AssetHandle,
        authorized_app: AppId,
        authorized_user: Identity,
        price_per_access: &str,
        number_of_access: &str,
    ) -> Result<Self, GrantError> {
        let price = parse_non_negative_integer("pricePerAccess", price_per_access)?;
        let volume = parse_non_negative_integer("numberOfAccess", number_of_access)?;
        Ok(Self::new(dataset, authorized_app, authorized_user, price, volume))
    }

    pub fn with_restrictions(mut self, restrictions: Restrictions) -> Self {
        self.restrictions = Some(restrictions);
        self
    }

    pub fn effective_restrictions(&self) -> Restrictions {
        self.restrictions
            .clone()
            .unwrap_or_else(|| Restrictions::bound_to(&self.authorized_app, &self.authorized_user))
    }

    /// Restrictions may narrow a grant but never exclude the app and user it
    /// authorizes. A zero volume is valid and yields an exhausted grant.
    pub fn validate(&self) -> Result<(), GrantError> {
        let restrictions = self.effective_restrictions();
        if !restrictions.app.admits(&self.authorized_app) {
            return Err(GrantError::InvalidParameter {
                field: "appRestrict",
                reason: format!("excludes the authorized app {}", self.authorized_app),
            });
        }
        if !restrictions.requester.admits(&self.authorized_user) {
            return Err(GrantError::InvalidParameter {
                field: "requesterRestrict",
                reason: format!("excludes the authorized user {}", self.authorized_user),
            });
        }
        Ok(())
    }
}

/// Parses a non-negative integral amount, rejecting signs, fractions and
/// exponents.
pub fn parse_non_negative_integer(field: &'static str, raw: &str) -> Result<u64, GrantError> {
    let trimmed = raw.trim();
    let invalid = |reason: &str| GrantError::InvalidParameter {
        field,
        reason: format!("{reason}: {trimmed:?}"),
    };

    if trimmed.starts_with('-') {
        return Err(invalid("must not be negative"));
    }
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid("must be a whole number"));
    }
    trimmed.parse::<u64>().map_err(|_| invalid("out of range"))
}

/// A grant as the access-control service reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessGrant {
    pub dataset: AssetHandle,
    #[serde(rename = "authorizedapp")]
    pub authorized_app: AppId,
    #[serde(rename = "authorizeduser")]
    pub authorized_user: Identity,
    #[serde(rename = "datasetprice")]
    pub dataset_price: u64,
    /// Remaining uses.
    pub volume: u64,
    #[serde(rename = "apprestrict")]
    pub app_restrict: Address,
    #[serde(rename = "workerpoolrestrict")]
    pub workerpool_restrict: Address,
    #[serde(rename = "requesterrestrict")]
    pub requester_restrict: Address,
    pub salt: String,
    pub sign: String,
}

impl AccessGrant {
    pub fn is_exhausted(&self) -> bool {
        self.volume == 0
    }

    /// Whether the grant was issued for this (app, user) pair.
    pub fn covers(&self, app: &AppId, user: &Identity) -> bool {
        self.authorized_app.admits(app) && self.authorized_user.admits(user)
    }

    /// Whether `app` may run on the dataset for `requester` right now.
    pub fn authorizes(&self, app: &AppId, requester: &Identity) -> bool {
        !self.is_exhausted()
            && self.covers(app, requester)
            && self.app_restrict.admits(app)
            && self.requester_restrict.admits(requester)
    }
}

/// Ephemeral request to run the confidential app over a protected asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingRequest {
    pub protected_asset: AssetHandle,
    pub app: AppId,
    pub app_max_price: u64,
    pub workerpool: Option<PoolId>,
}

/// Per-use prices the protocol resolved for a processing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionQuote {
    pub app: AppId,
    pub app_price: u64,
    pub workerpool: PoolId,
    pub workerpool_price: u64,
    pub dataset_price: u64,
}

impl ExecutionQuote {
    /// The amount charged against `appMaxPrice`.
    pub fn execution_price(&self) -> Option<u64> {
        self.app_price.checked_add(self.workerpool_price)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub deal_id: String,
    pub task_id: String,
    pub tx_hash: String,
    pub workerpool: PoolId,
    pub price: u64,
    pub dispatched_at: DateTime<Utc>,
}

/// Confirmation that a signed trade is recorded on the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub trade_hash: TradeHash,
    /// Absent when the trade was found already settled.
    pub tx_hash: Option<String>,
    pub attempts: u32,
    pub already_settled: bool,
    pub settled_at: DateTime<Utc>,
}

impl SettlementReceipt {
    pub fn submitted(trade_hash: TradeHash, tx_hash: String, attempts: u32) -> Self {
        Self {
            trade_hash,
            tx_hash: Some(tx_hash),
            attempts,
            already_settled: false,
            settled_at: Utc::now(),
        }
    }

    pub fn already_settled(trade_hash: TradeHash, tx_hash: Option<String>) -> Self {
        Self {
            trade_hash,
            tx_hash,
            attempts: 0,
            already_settled: true,
            settled_at: Utc::now(),
        }
    }
}

/// What to do when grant issuance fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantFailurePolicy {
    /// Log the failure and dispatch anyway.
    #[default]
    Proceed,
    Abort,
}

impl fmt::Display for GrantFailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrantFailurePolicy::Proceed => write!(f, "proceed"),
            GrantFailurePolicy::Abort => write!(f, "abort"),
        }
    }
}

impl std::str::FromStr for GrantFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "proceed" => Ok(GrantFailurePolicy::Proceed),
            "abort" => Ok(GrantFailurePolicy::Abort),
            other => Err(format!("grant failure policy must be proceed or abort, got `{other}`")),
        }
    }
}

/// Relayer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayerConfig {
    pub wallet: WalletConfig,
    pub chain: ChainConfig,
    pub protocol: ProtocolConfig,
    pub settlement: SettlementConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletConfig {
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    pub app: String,
    pub price_per_access: u64,
    pub number_of_access: u64,
    pub app_max_price: u64,
    #[serde(default)]
    pub workerpool: Option<String>,
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub grant_failure_policy: GrantFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementConfig {
    pub rpc_url: String,
    pub contract_address: String,
    /// Name of the environment variable holding the hex ed25519 seed. When set,
    /// `settle` only accepts artifacts signed by that key.
    pub signing_key_env: String,
    pub retry_attempts: u32,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl SettlementConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_attempts,
            initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
            max_delay: Duration::from_millis(self.max_retry_delay_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Bounds on settlement resubmission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum ProtectionError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Protected asset already registered: {0}")]
    Duplicate(AssetHandle),

    #[error("Protection rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum GrantError {
    #[error("{caller} does not own dataset {dataset}")]
    NotOwner {
        dataset: AssetHandle,
        caller: Identity,
    },

    #[error("Unknown dataset: {0}")]
    UnknownDataset(AssetHandle),

    #[error("Invalid {field}: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    #[error("Grant rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Budget exceeded: price {price} over max {max}")]
    BudgetExceeded { price: u64, max: u64 },

    #[error("No authorized workerpool: {0}")]
    NoAuthorizedWorkerpool(String),

    #[error("App {app} is not authorized on dataset {dataset}")]
    NotAuthorized { dataset: AssetHandle, app: AppId },

    #[error("Unknown app: {0}")]
    UnknownApp(AppId),

    #[error("Dispatch rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("Invalid settlement artifact: {0}")]
    InvalidArtifact(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    #[error("Artifact signed by {signer}, expected {expected}")]
    UntrustedSigner { signer: String, expected: String },

    #[error("Chain submission failed: {reason}")]
    ChainSubmission { reason: String, reverted: bool },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout error: {0}")]
    Timeout(String),

    #[error("Settlement failed after {attempts} attempts: {last_error}")]
    SettlementFailure { attempts: u32, last_error: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

impl SettlementError {
    /// Whether resubmitting the same artifact can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SettlementError::Network(_) | SettlementError::Timeout(_) => true,
            SettlementError::ChainSubmission { reverted, .. } => !reverted,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SettlementError {
    fn from(err: serde_json::Error) -> Self {
        SettlementError::Serialization(err.to_string())
    }
}

impl From<reqwest::Error> for SettlementError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SettlementError::Timeout(err.to_string())
        } else {
            SettlementError::Network(err.to_string())
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Protection failed: {0}")]
    Protection(#[from] ProtectionError),

    #[error("Grant failed: {0}")]
    Grant(#[from] GrantError),

    #[error("Grant query failed: {0}")]
    GrantQuery(GrantError),

    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Settlement failed: {0}")]
    Settlement(#[from] SettlementError),

    #[error("Session is no longer valid")]
    SessionInvalid,

    #[error("A submission is already in flight for this session")]
    SubmissionInFlight,

    #[error("{operation} cancelled (in flight: {in_flight})")]
    Cancelled {
        operation: &'static str,
        in_flight: bool,
    },

    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("Configuration error: {0}")]
    Config(String),
}
