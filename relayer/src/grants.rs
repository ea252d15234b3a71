use std::sync::Arc;
use tracing::{debug, info};

use crate::protocol::AccessBackend;
use crate::types::{AccessGrant, AppId, AssetHandle, GrantError, GrantRequest, Identity};

/// Issues and looks up access grants on protected assets.
pub struct AccessGrantManager<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: AccessBackend + ?Sized> AccessGrantManager<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Issues a new grant. Earlier grants on the same tuple stay in force.
    pub async fn grant(
        &self,
        caller: &Identity,
        request: &GrantRequest,
    ) -> Result<AccessGrant, GrantError> {
        request.validate()?;

        let grant = self.backend.grant_access(caller, request).await?;
        info!(
            "Access granted on {} to app {} for {} (price {}, volume {})",
            grant.dataset,
            grant.authorized_app,
            grant.authorized_user,
            grant.dataset_price,
            grant.volume
        );
        Ok(grant)
    }

    /// The usable grant for the tuple, if any.
    pub async fn query(
        &self,
        dataset: &AssetHandle,
        app: &AppId,
        user: &Identity,
    ) -> Result<Option<AccessGrant>, GrantError> {
        let grants = self.backend.granted_access(dataset, app, user).await?;
        debug!(%dataset, count = grants.len(), "granted access lookup");
        Ok(select_grant(grants))
    }
}

/// Picks the grant to honour among those the protocol returned, oldest first.
///
/// Exhausted grants count as absent. The highest remaining volume wins and
/// ties go to the most recently issued grant.
pub fn select_grant(grants: Vec<AccessGrant>) -> Option<AccessGrant> {
    grants
        .into_iter()
        .enumerate()
        .filter(|(_, grant)| !grant.is_exhausted())
        .max_by_key(|(issued, grant)| (grant.volume, *issued))
        .map(|(_, grant)| grant)
}
