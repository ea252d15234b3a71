use std::sync::Arc;
use tracing::{info, warn};

use crate::protocol::ExecutionBackend;
use crate::types::{DispatchError, DispatchReceipt, Identity, ProcessingRequest};

/// Submits processing requests for protected assets under a price ceiling.
pub struct ExecutionDispatcher<B: ?Sized> {
    backend: Arc<B>,
}

impl<B: ExecutionBackend + ?Sized> ExecutionDispatcher<B> {
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    pub async fn dispatch(
        &self,
        requester: &Identity,
        request: &ProcessingRequest,
    ) -> Result<DispatchReceipt, DispatchError> {
        let quote = self.backend.quote(requester, request).await?;

        let price = quote.execution_price().ok_or(DispatchError::BudgetExceeded {
            price: u64::MAX,
            max: request.app_max_price,
        })?;
        if price > request.app_max_price {
            warn!(
                "Execution of {} costs {} (app {} + workerpool {}), over budget {}",
                request.protected_asset,
                price,
                quote.app_price,
                quote.workerpool_price,
                request.app_max_price
            );
            return Err(DispatchError::BudgetExceeded {
                price,
                max: request.app_max_price,
            });
        }

        let receipt = self.backend.execute(requester, request, &quote).await?;
        info!(
            "Processing dispatched: deal {} task {} on workerpool {}",
            receipt.deal_id, receipt.task_id, receipt.workerpool
        );
        Ok(receipt)
    }
}
