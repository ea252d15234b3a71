//! Seams to the external data-protection and compute marketplace.
//!
//! The pipeline components only ever talk to the protocol through these
//! traits, so a networked client and the in-process [`LocalProtocol`] are
//! interchangeable.

use async_trait::async_trait;

use crate::protection::DataKey;
use crate::types::{
    AccessGrant, AppId, AssetHandle, DispatchError, DispatchReceipt, ExecutionQuote, GrantError,
    GrantRequest, Identity, ProcessingRequest, ProtectedAsset, ProtectionError,
};

pub mod local;

pub use local::{LocalProtocol, Operation};

/// Everything the protocol needs to register a protected asset.
#[derive(Debug, Clone)]
pub struct AssetRegistration {
    pub address: AssetHandle,
    pub name: String,
    pub owner: Identity,
    pub envelope: String,
    /// Handed to the protocol's secret store, never logged.
    pub data_key: DataKey,
}

#[async_trait]
pub trait ProtectionBackend: Send + Sync {
    async fn register_asset(
        &self,
        registration: AssetRegistration,
    ) -> Result<ProtectedAsset, ProtectionError>;
}

#[async_trait]
pub trait AccessBackend: Send + Sync {
    async fn grant_access(
        &self,
        caller: &Identity,
        request: &GrantRequest,
    ) -> Result<AccessGrant, GrantError>;

    /// All grants recorded for the tuple, oldest first.
    async fn granted_access(
        &self,
        dataset: &AssetHandle,
        app: &AppId,
        user: &Identity,
    ) -> Result<Vec<AccessGrant>, GrantError>;
}

#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Resolves the prices and workerpool a request would run with.
    async fn quote(
        &self,
        requester: &Identity,
        request: &ProcessingRequest,
    ) -> Result<ExecutionQuote, DispatchError>;

    /// Places the deal. Consumes one use of the matching grant.
    async fn execute(
        &self,
        requester: &Identity,
        request: &ProcessingRequest,
        quote: &ExecutionQuote,
    ) -> Result<DispatchReceipt, DispatchError>;
}

/// The full marketplace surface a session needs.
pub trait ProtocolBackend: ProtectionBackend + AccessBackend + ExecutionBackend {}

impl<T: ProtectionBackend + AccessBackend + ExecutionBackend> ProtocolBackend for T {}
