//! Retry with exponential backoff for single control-plane calls

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::ApiError;
use crate::observability::ApiMetrics;

use super::{ApiRequest, ApiResponse, ComputeApi};

/// Longest single backoff sleep, in seconds
pub const MAX_BACKOFF_SECS: u64 = 60;

/// Run `op` until it succeeds or fails permanently.
///
/// Transient errors sleep 2, 4, 8... seconds, capped at
/// [`MAX_BACKOFF_SECS`], and retry forever; callers never see them.
/// Transport timeouts retry immediately without touching the backoff.
/// Any other error propagates at once.
pub async fn with_backoff<T, F, Fut>(mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let metrics = ApiMetrics::new();
    let mut retry = 0u32;
    let mut wait = 1u64;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                retry += 1;
                wait = (wait * 2).min(MAX_BACKOFF_SECS);
                error!(retry, sleep_secs = wait, error = %e, "transient error, backing off");
                metrics.inc_api_retries("transient");
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            Err(e) if e.is_timeout() => {
                debug!(error = %e, "transport timeout, retrying");
                metrics.inc_api_retries("timeout");
            }
            Err(e) => {
                error!(error = %e, "request failed");
                return Err(e);
            }
        }
    }
}

/// Issue one request through [`with_backoff`]
pub async fn execute_with_backoff(
    api: &dyn ComputeApi,
    request: &ApiRequest,
) -> Result<ApiResponse, ApiError> {
    with_backoff(|| api.call(request)).await
}
