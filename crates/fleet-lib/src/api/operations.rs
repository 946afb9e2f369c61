//! Waiting on long-running operations
//!
//! Wait requests are scoped the way the operation is: zonal
//! operations wait on the zone endpoint, regional on the region
//! endpoint, everything else globally. The wait endpoint blocks
//! server-side until the operation progresses, so the polling loops
//! here re-issue it without sleeping in between.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::models::Operation;

use super::backoff::execute_with_backoff;
use super::batch::{BatchExecutor, BatchOutcome};
use super::{ApiRequest, ApiResponse, ComputeApi};

/// True while a wait response is not terminal. Only `DONE` ends a
/// wait; unknown statuses keep polling.
pub fn operation_pending(response: &ApiResponse) -> bool {
    match response.as_operation() {
        Some(op) => !op.is_done(),
        None => false,
    }
}

/// Polls long-running operations until they reach `DONE`
pub struct OperationPoller {
    api: Arc<dyn ComputeApi>,
    executor: BatchExecutor,
    project: String,
}

impl OperationPoller {
    pub fn new(api: Arc<dyn ComputeApi>, project: impl Into<String>) -> Self {
        let executor = BatchExecutor::new(Arc::clone(&api));
        Self {
            api,
            executor,
            project: project.into(),
        }
    }

    /// The wait request for one operation
    pub fn wait_request(&self, operation: &Operation) -> ApiRequest {
        ApiRequest::WaitOperation {
            project: self.project.clone(),
            scope: operation.scope(),
            operation: operation.name.clone(),
        }
    }

    /// Wait for every operation, multiplexed through the batch
    /// executor. Ids are positional; the outcome maps carry terminal
    /// states and permanent failures.
    pub async fn wait_all(&self, operations: &[Operation]) -> Result<BatchOutcome> {
        let requests: Vec<ApiRequest> =
            operations.iter().map(|op| self.wait_request(op)).collect();
        let mut outcome = self
            .executor
            .execute_until(requests.clone(), operation_pending)
            .await?;

        // A wait must come back as an operation; anything else is a
        // transport fault, not a finished wait.
        let done = std::mem::take(&mut outcome.done);
        for (id, response) in done {
            match response.into_operation() {
                Ok(op) => {
                    outcome.done.insert(id, ApiResponse::Operation(op));
                }
                Err(error) => {
                    warn!(id, error = %error, "wait finished with a non-operation response");
                    outcome
                        .failed
                        .insert(id, (requests[id as usize].clone(), error));
                }
            }
        }
        Ok(outcome)
    }

    /// Wait for one operation, polling until it reports `DONE`
    pub async fn wait_one(&self, operation: &Operation) -> Result<Operation> {
        let request = self.wait_request(operation);
        info!(operation = %operation.name, "waiting for operation to finish");
        loop {
            let latest = execute_with_backoff(self.api.as_ref(), &request)
                .await?
                .into_operation()?;
            if latest.is_done() {
                info!(operation = %latest.name, "operation done");
                return Ok(latest);
            }
            debug!(
                operation = %latest.name,
                status = ?latest.status,
                "operation still in progress"
            );
        }
    }

    /// All operations sharing the given operation's group id, from one
    /// filtered list call in the operation's scope
    pub async fn group_operations(&self, operation: &Operation) -> Result<Vec<Operation>> {
        let group_id = operation
            .operation_group_id
            .as_deref()
            .ok_or_else(|| Error::MissingOperationGroup(operation.name.clone()))?;

        let request = ApiRequest::ListOperations {
            project: self.project.clone(),
            scope: operation.scope(),
            filter: format!("operationGroupId={}", group_id),
        };
        let page = execute_with_backoff(self.api.as_ref(), &request)
            .await?
            .into_operations()?;
        Ok(page.items)
    }
}
