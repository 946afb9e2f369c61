//! Batched execution of control-plane worklists
//!
//! The executor drains a worklist of independent requests through
//! bounded batch round trips, classifying each outcome and
//! re-submitting only what is still pending. Transient per-request
//! failures stay in the worklist; permanent ones land in the failed
//! map; everything else resolves into the done map. The loop runs
//! until the worklist is empty, so a caller needing a deadline wraps
//! the call in its own timeout.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::ApiError;
use crate::observability::ApiMetrics;

use super::backoff::with_backoff;
use super::{ApiRequest, ApiResponse, ComputeApi, RequestId};

/// Most requests submitted in one batch round trip
pub const BATCH_LIMIT: usize = 1000;

/// Outcome of a drained worklist. Every submitted request ends up in
/// exactly one of the two maps.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Terminal responses by request id
    pub done: BTreeMap<RequestId, ApiResponse>,
    /// Permanently failed requests with their errors
    pub failed: BTreeMap<RequestId, (ApiRequest, ApiError)>,
}

/// Drives worklists of requests to completion in bounded batches
pub struct BatchExecutor {
    api: Arc<dyn ComputeApi>,
    batch_limit: usize,
    metrics: ApiMetrics,
}

impl BatchExecutor {
    pub fn new(api: Arc<dyn ComputeApi>) -> Self {
        Self {
            api,
            batch_limit: BATCH_LIMIT,
            metrics: ApiMetrics::new(),
        }
    }

    /// Lower the batch limit, mainly for tests
    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    /// Execute requests with ids assigned by position and no pending
    /// predicate
    pub async fn execute(&self, requests: Vec<ApiRequest>) -> Result<BatchOutcome, ApiError> {
        self.execute_until(requests, |_| false).await
    }

    /// Execute requests with ids assigned by position. Successful
    /// responses for which `still_pending` returns true go back into
    /// the worklist.
    pub async fn execute_until<P>(
        &self,
        requests: Vec<ApiRequest>,
        still_pending: P,
    ) -> Result<BatchOutcome, ApiError>
    where
        P: Fn(&ApiResponse) -> bool,
    {
        let keyed = requests
            .into_iter()
            .enumerate()
            .map(|(i, request)| (i as RequestId, request))
            .collect();
        self.execute_keyed(keyed, still_pending).await
    }

    /// Execute requests keyed by caller-chosen ids
    pub async fn execute_keyed<P>(
        &self,
        requests: Vec<(RequestId, ApiRequest)>,
        still_pending: P,
    ) -> Result<BatchOutcome, ApiError>
    where
        P: Fn(&ApiResponse) -> bool,
    {
        let mut outcome = BatchOutcome::default();
        let mut worklist: VecDeque<(RequestId, ApiRequest)> = requests.into();

        while !worklist.is_empty() {
            // Oldest-first, stable order; resolved requests are
            // filtered out below without disturbing the rest.
            let round: Vec<(RequestId, ApiRequest)> =
                worklist.iter().take(self.batch_limit).cloned().collect();
            self.metrics.inc_batch_rounds();
            debug!(
                batch = round.len(),
                remaining = worklist.len(),
                "submitting batch round"
            );

            let results = with_backoff(|| self.api.call_batch(&round)).await?;
            let mut round_map: BTreeMap<RequestId, ApiRequest> = round.into_iter().collect();

            let mut resolved = BTreeSet::new();
            for (rid, result) in results {
                match result {
                    Ok(response) => {
                        if still_pending(&response) {
                            debug!(id = rid, "response not terminal yet, re-batching");
                            continue;
                        }
                        if round_map.remove(&rid).is_some() {
                            resolved.insert(rid);
                            outcome.done.insert(rid, response);
                        } else {
                            warn!(id = rid, "response for an unsubmitted request id");
                        }
                    }
                    Err(e) if e.is_transient() => {
                        debug!(id = rid, error = %e, "transient failure, re-batching");
                    }
                    Err(e) => {
                        warn!(id = rid, error = %e, "request failed");
                        if let Some(request) = round_map.remove(&rid) {
                            resolved.insert(rid);
                            outcome.failed.insert(rid, (request, e));
                        }
                    }
                }
            }

            worklist.retain(|(rid, _)| !resolved.contains(rid));
        }

        Ok(outcome)
    }
}
