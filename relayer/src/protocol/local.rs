use async_trait::async_trait;
use chrono::Utc;
use darkpool_intent::IntentPayload;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::debug;

use super::{AccessBackend, AssetRegistration, ExecutionBackend, ProtectionBackend};
use crate::protection::{open_envelope, DataKey};
use crate::types::{
    AccessGrant, AppId, AssetHandle, DispatchError, DispatchReceipt, ExecutionQuote, GrantError,
    GrantRequest, Identity, PoolId, ProcessingRequest, ProtectedAsset, ProtectionError,
};

/// Protocol operations that can be observed or made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RegisterAsset,
    GrantAccess,
    GrantedAccess,
    Quote,
    Execute,
}

struct StoredAsset {
    asset: ProtectedAsset,
    data_key: DataKey,
}

#[derive(Default)]
struct LocalState {
    assets: HashMap<AssetHandle, StoredAsset>,
    /// Append-only, issuance order.
    grants: Vec<AccessGrant>,
    apps: HashMap<AppId, u64>,
    /// Registration order decides which pool is picked when none is named.
    workerpools: Vec<(PoolId, u64)>,
    faults: HashMap<Operation, VecDeque<String>>,
    calls: HashMap<Operation, usize>,
    deals: u64,
}

impl LocalState {
    fn enter(&mut self, op: Operation) -> Option<String> {
        *self.calls.entry(op).or_default() += 1;
        self.faults.get_mut(&op).and_then(VecDeque::pop_front)
    }

    /// Index of the grant a request would consume: highest remaining volume,
    /// most recent on ties.
    fn best_grant(
        &self,
        dataset: &AssetHandle,
        app: &AppId,
        requester: &Identity,
        workerpool: Option<&PoolId>,
    ) -> Option<usize> {
        self.grants
            .iter()
            .enumerate()
            .filter(|(_, g)| &g.dataset == dataset && g.authorizes(app, requester))
            .filter(|(_, g)| workerpool.map_or(true, |pool| g.workerpool_restrict.admits(pool)))
            .max_by_key(|(i, g)| (g.volume, *i))
            .map(|(i, _)| i)
    }
}

/// In-process simulation of the data-protection marketplace.
///
/// Keeps assets, grants with their remaining volume, registered apps and
/// workerpools. Every operation can be slowed down or scripted to fail.
#[derive(Default)]
pub struct LocalProtocol {
    state: Mutex<LocalState>,
    latency_ms: AtomicU64,
}

impl LocalProtocol {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_app(mut self, app: AppId, price: u64) -> Self {
        self.state.get_mut().apps.insert(app, price);
        self
    }

    pub fn with_workerpool(mut self, pool: PoolId, price: u64) -> Self {
        self.state.get_mut().workerpools.push((pool, price));
        self
    }

    /// Delay applied to every subsequent operation.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Makes the next call to `op` fail with `message`.
    pub async fn fail_next(&self, op: Operation, message: impl Into<String>) {
        self.state
            .lock()
            .await
            .faults
            .entry(op)
            .or_default()
            .push_back(message.into());
    }

    /// How many times `op` was invoked.
    pub async fn calls(&self, op: Operation) -> usize {
        self.state.lock().await.calls.get(&op).copied().unwrap_or(0)
    }

    pub async fn asset(&self, address: &AssetHandle) -> Option<ProtectedAsset> {
        self.state
            .lock()
            .await
            .assets
            .get(address)
            .map(|stored| stored.asset.clone())
    }

    /// Decrypts a stored asset the way the enclave would after key release.
    pub async fn open_asset(&self, address: &AssetHandle) -> Result<IntentPayload, ProtectionError> {
        let state = self.state.lock().await;
        let stored = state
            .assets
            .get(address)
            .ok_or_else(|| ProtectionError::Rejected(format!("unknown asset {address}")))?;
        open_envelope(&stored.asset.encrypted_payload_ref, &stored.data_key)
    }

    async fn simulate_latency(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }
}

fn digest_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update((part.len() as u32).to_be_bytes());
        hasher.update(part);
    }
    format!("0x{}", hex::encode(hasher.finalize()))
}

#[async_trait]
impl ProtectionBackend for LocalProtocol {
    async fn register_asset(
        &self,
        registration: AssetRegistration,
    ) -> Result<ProtectedAsset, ProtectionError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(message) = state.enter(Operation::RegisterAsset) {
            return Err(ProtectionError::Rejected(message));
        }
        if state.assets.contains_key(&registration.address) {
            return Err(ProtectionError::Duplicate(registration.address));
        }

        let asset = ProtectedAsset {
            address: registration.address.clone(),
            name: registration.name,
            owner: registration.owner,
            encrypted_payload_ref: registration.envelope,
            created_at: Utc::now(),
        };
        state.assets.insert(
            registration.address,
            StoredAsset {
                asset: asset.clone(),
                data_key: registration.data_key,
            },
        );
        debug!(address = %asset.address, "asset stored");
        Ok(asset)
    }
}

#[async_trait]
impl AccessBackend for LocalProtocol {
    async fn grant_access(
        &self,
        caller: &Identity,
        request: &GrantRequest,
    ) -> Result<AccessGrant, GrantError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(message) = state.enter(Operation::GrantAccess) {
            return Err(GrantError::Rejected(message));
        }

        let owner = state
            .assets
            .get(&request.dataset)
            .map(|stored| stored.asset.owner.clone())
            .ok_or_else(|| GrantError::UnknownDataset(request.dataset.clone()))?;
        if &owner != caller {
            return Err(GrantError::NotOwner {
                dataset: request.dataset.clone(),
                caller: caller.clone(),
            });
        }

        let restrictions = request.effective_restrictions();
        let salt = format!("0x{}", hex::encode(rand::rng().random::<[u8; 32]>()));
        let sign = digest_hex(&[
            request.dataset.as_str().as_bytes(),
            request.authorized_app.as_str().as_bytes(),
            request.authorized_user.as_str().as_bytes(),
            restrictions.app.as_str().as_bytes(),
            restrictions.workerpool.as_str().as_bytes(),
            restrictions.requester.as_str().as_bytes(),
            &request.price_per_access.to_be_bytes(),
            &request.number_of_access.to_be_bytes(),
            salt.as_bytes(),
        ]);

        let grant = AccessGrant {
            dataset: request.dataset.clone(),
            authorized_app: request.authorized_app.clone(),
            authorized_user: request.authorized_user.clone(),
            dataset_price: request.price_per_access,
            volume: request.number_of_access,
            app_restrict: restrictions.app,
            workerpool_restrict: restrictions.workerpool,
            requester_restrict: restrictions.requester,
            salt,
            sign,
        };
        state.grants.push(grant.clone());
        Ok(grant)
    }

    async fn granted_access(
        &self,
        dataset: &AssetHandle,
        app: &AppId,
        user: &Identity,
    ) -> Result<Vec<AccessGrant>, GrantError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(message) = state.enter(Operation::GrantedAccess) {
            return Err(GrantError::Rejected(message));
        }

        Ok(state
            .grants
            .iter()
            .filter(|g| &g.dataset == dataset)
            .filter(|g| g.covers(app, user))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ExecutionBackend for LocalProtocol {
    async fn quote(
        &self,
        requester: &Identity,
        request: &ProcessingRequest,
    ) -> Result<ExecutionQuote, DispatchError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(message) = state.enter(Operation::Quote) {
            return Err(DispatchError::Rejected(message));
        }

        let app_price = *state
            .apps
            .get(&request.app)
            .ok_or_else(|| DispatchError::UnknownApp(request.app.clone()))?;

        let dataset = &request.protected_asset;
        if state.best_grant(dataset, &request.app, requester, None).is_none() {
            return Err(DispatchError::NotAuthorized {
                dataset: dataset.clone(),
                app: request.app.clone(),
            });
        }

        let candidates: Vec<(PoolId, u64)> = match &request.workerpool {
            Some(pool) => {
                let registered = state.workerpools.iter().find(|(p, _)| p == pool).cloned();
                match registered {
                    Some(entry) => vec![entry],
                    None => {
                        return Err(DispatchError::NoAuthorizedWorkerpool(format!(
                            "workerpool {pool} is not available"
                        )))
                    }
                }
            }
            None => state.workerpools.clone(),
        };

        let (workerpool, workerpool_price, grant) = candidates
            .into_iter()
            .find_map(|(pool, price)| {
                state
                    .best_grant(dataset, &request.app, requester, Some(&pool))
                    .map(|index| (pool, price, index))
            })
            .ok_or_else(|| {
                DispatchError::NoAuthorizedWorkerpool(format!(
                    "no workerpool satisfies the grant restrictions on {dataset}"
                ))
            })?;

        Ok(ExecutionQuote {
            app: request.app.clone(),
            app_price,
            workerpool,
            workerpool_price,
            dataset_price: state.grants[grant].dataset_price,
        })
    }

    async fn execute(
        &self,
        requester: &Identity,
        request: &ProcessingRequest,
        quote: &ExecutionQuote,
    ) -> Result<DispatchReceipt, DispatchError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;
        if let Some(message) = state.enter(Operation::Execute) {
            return Err(DispatchError::Rejected(message));
        }

        let dataset = &request.protected_asset;
        let index = state
            .best_grant(dataset, &request.app, requester, Some(&quote.workerpool))
            .ok_or_else(|| DispatchError::NotAuthorized {
                dataset: dataset.clone(),
                app: request.app.clone(),
            })?;
        state.grants[index].volume -= 1;
        state.deals += 1;

        let deal = state.deals.to_be_bytes();
        let price = quote.execution_price().unwrap_or(u64::MAX);
        Ok(DispatchReceipt {
            deal_id: digest_hex(&[b"deal", dataset.as_str().as_bytes(), &deal]),
            task_id: digest_hex(&[b"task", dataset.as_str().as_bytes(), &deal]),
            tx_hash: digest_hex(&[b"tx", dataset.as_str().as_bytes(), &deal]),
            workerpool: quote.workerpool.clone(),
            price,
            dispatched_at: Utc::now(),
        })
    }
}
