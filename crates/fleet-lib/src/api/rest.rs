//! REST transport for the control plane
//!
//! Maps [`ApiRequest`] values onto the control plane's REST surface
//! and classifies failures so the retry layers can tell transient
//! causes apart. Batch submission fans out over the single-call
//! transport with bounded concurrency; wire-level batch framing is
//! deliberately not modeled.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::debug;
use url::Url;

use crate::error::ApiError;
use crate::metadata::MetadataClient;
use crate::models::OperationScope;
use crate::observability::ApiMetrics;

use super::{ApiRequest, ApiResponse, ComputeApi, RequestId};

/// Default control-plane endpoint
pub const DEFAULT_BASE_URL: &str = "https://compute.googleapis.com/compute/v1/";

const USER_AGENT: &str = concat!("fleet-lib/", env!("CARGO_PKG_VERSION"));

/// Fields projected by the aggregated instance listing
const INSTANCE_FIELDS: &str = "items.zones.instances(name,zone,status),nextPageToken";
/// Fields projected by the aggregated machine type listing
const MACHINE_TYPE_FIELDS: &str =
    "items.zones.machineTypes(name,zone,guestCpus,memoryMb,accelerators),nextPageToken";

/// Source of bearer tokens for control-plane requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, ApiError>;
}

/// Fixed token, for tests and externally managed credentials
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.token.clone())
    }
}

/// Service-account token from the metadata server, cached until close
/// to expiry
pub struct MetadataTokenProvider {
    metadata: MetadataClient,
    cached: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    token: String,
    expires_at: tokio::time::Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

impl MetadataTokenProvider {
    pub fn new(metadata: MetadataClient) -> Self {
        Self {
            metadata,
            cached: RwLock::new(None),
        }
    }
}

#[async_trait]
impl TokenProvider for MetadataTokenProvider {
    async fn access_token(&self) -> Result<String, ApiError> {
        {
            let cached = self.cached.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > tokio::time::Instant::now() {
                    return Ok(token.token.clone());
                }
            }
        }

        let body = self
            .metadata
            .instance("service-accounts/default/token")
            .await
            .ok_or_else(|| ApiError::transport("no token available from metadata service"))?;
        let parsed: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::transport(format!("malformed token response: {}", e)))?;

        // Refresh 30 s ahead of expiry.
        let expires_at = tokio::time::Instant::now()
            + Duration::from_secs(parsed.expires_in.saturating_sub(30));
        let token = parsed.access_token.clone();
        *self.cached.write().await = Some(CachedToken {
            token: parsed.access_token,
            expires_at,
        });
        Ok(token)
    }
}

/// REST implementation of [`ComputeApi`]
pub struct RestComputeApi {
    client: Client,
    base_url: Url,
    tokens: Arc<dyn TokenProvider>,
    batch_concurrency: usize,
    metrics: ApiMetrics,
}

/// Builder for [`RestComputeApi`]
pub struct RestComputeApiBuilder {
    base_url: String,
    timeout: Duration,
    batch_concurrency: usize,
    tokens: Option<Arc<dyn TokenProvider>>,
}

impl Default for RestComputeApiBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RestComputeApiBuilder {
    pub fn new() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: Duration::from_secs(60),
            batch_concurrency: 32,
            tokens: None,
        }
    }

    /// Override the control-plane endpoint
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Per-request transport timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Concurrent requests per batch round trip
    pub fn batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn token_provider(mut self, tokens: Arc<dyn TokenProvider>) -> Self {
        self.tokens = Some(tokens);
        self
    }

    pub fn build(self) -> Result<RestComputeApi> {
        let tokens = self
            .tokens
            .context("no token provider configured")?;
        let client = Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base = self.base_url;
        if !base.ends_with('/') {
            base.push('/');
        }
        let base_url = Url::parse(&base).context("Invalid control-plane URL")?;

        Ok(RestComputeApi {
            client,
            base_url,
            tokens,
            batch_concurrency: self.batch_concurrency,
            metrics: ApiMetrics::new(),
        })
    }
}

impl RestComputeApi {
    pub fn builder() -> RestComputeApiBuilder {
        RestComputeApiBuilder::new()
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base_url
            .join(path)
            .map_err(|e| ApiError::transport(format!("invalid request path {}: {}", path, e)))
    }

    async fn send<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, ApiError> {
        let token = self.tokens.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(remote_error(status, &body));
        }
        response.json().await.map_err(map_reqwest_error)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "GET");
        self.send(self.client.get(url).query(query)).await
    }

    async fn post_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path)?;
        debug!(url = %url, "POST");
        self.send(self.client.post(url)).await
    }
}

fn scope_path(scope: &OperationScope) -> String {
    match scope {
        OperationScope::Zone(zone) => format!("zones/{}", zone),
        OperationScope::Region(region) => format!("regions/{}", region),
        OperationScope::Global => "global".to_string(),
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ApiError {
    if e.is_timeout() {
        ApiError::timeout(e.to_string())
    } else {
        ApiError::transport(e.to_string())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
}

/// Keep the remote message intact; transient classification matches
/// substrings in it.
fn remote_error(status: StatusCode, body: &str) -> ApiError {
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) if !parsed.error.message.is_empty() => ApiError::remote(parsed.error.message),
        _ => ApiError::remote(format!("HTTP {}: {}", status, body)),
    }
}

#[async_trait]
impl ComputeApi for RestComputeApi {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        self.metrics.inc_api_requests();
        match request {
            ApiRequest::WaitOperation {
                project,
                scope,
                operation,
            } => {
                let path = format!(
                    "projects/{}/{}/operations/{}/wait",
                    project,
                    scope_path(scope),
                    operation
                );
                Ok(ApiResponse::Operation(self.post_json(&path).await?))
            }
            ApiRequest::ListOperations {
                project,
                scope,
                filter,
            } => {
                let path = format!("projects/{}/{}/operations", project, scope_path(scope));
                let page = self.get_json(&path, &[("filter", filter.as_str())]).await?;
                Ok(ApiResponse::Operations(page))
            }
            ApiRequest::GetMachineType {
                project,
                zone,
                machine_type,
            } => {
                let path = format!(
                    "projects/{}/zones/{}/machineTypes/{}",
                    project, zone, machine_type
                );
                Ok(ApiResponse::MachineType(self.get_json(&path, &[]).await?))
            }
            ApiRequest::ListInstanceTemplates { project, filter } => {
                let path = format!("projects/{}/global/instanceTemplates", project);
                let page: crate::models::TemplateListPage =
                    self.get_json(&path, &[("filter", filter.as_str())]).await?;
                Ok(ApiResponse::Templates(page.items))
            }
            ApiRequest::AggregatedListInstances {
                project,
                filter,
                page_token,
            } => {
                let path = format!("projects/{}/aggregated/instances", project);
                let mut query = vec![("filter", filter.as_str()), ("fields", INSTANCE_FIELDS)];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                Ok(ApiResponse::Instances(self.get_json(&path, &query).await?))
            }
            ApiRequest::AggregatedListMachineTypes {
                project,
                page_token,
            } => {
                let path = format!("projects/{}/aggregated/machineTypes", project);
                let mut query = vec![("fields", MACHINE_TYPE_FIELDS)];
                if let Some(token) = page_token.as_deref() {
                    query.push(("pageToken", token));
                }
                Ok(ApiResponse::MachineTypes(
                    self.get_json(&path, &query).await?,
                ))
            }
        }
    }

    async fn call_batch(
        &self,
        requests: &[(RequestId, ApiRequest)],
    ) -> Result<Vec<(RequestId, Result<ApiResponse, ApiError>)>, ApiError> {
        let results = stream::iter(requests.iter().cloned())
            .map(|(rid, request)| async move { (rid, self.call(&request).await) })
            .buffered(self.batch_concurrency)
            .collect::<Vec<_>>()
            .await;
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;

    use super::*;
    use crate::models::OperationStatus;

    fn test_api(server: &mockito::Server) -> RestComputeApi {
        RestComputeApi::builder()
            .base_url(server.url())
            .token_provider(Arc::new(StaticTokenProvider::new("test-token")))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn wait_posts_to_the_zonal_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/projects/p0/zones/us-central1-a/operations/op-1/wait")
            .match_header("authorization", "Bearer test-token")
            .match_header("user-agent", Matcher::Regex("^fleet-lib/".to_string()))
            .with_body(r#"{"name": "op-1", "zone": "zones/us-central1-a", "status": "DONE"}"#)
            .create_async()
            .await;

        let api = test_api(&server);
        let response = api
            .call(&ApiRequest::WaitOperation {
                project: "p0".to_string(),
                scope: OperationScope::Zone("us-central1-a".to_string()),
                operation: "op-1".to_string(),
            })
            .await
            .unwrap();

        let op = response.into_operation().unwrap();
        assert_eq!(op.status, OperationStatus::Done);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn rate_limit_body_classifies_as_transient() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/projects/p0/global/operations/op-2/wait")
            .with_status(403)
            .with_body(r#"{"error": {"code": 403, "message": "Rate Limit Exceeded"}}"#)
            .create_async()
            .await;

        let api = test_api(&server);
        let err = api
            .call(&ApiRequest::WaitOperation {
                project: "p0".to_string(),
                scope: OperationScope::Global,
                operation: "op-2".to_string(),
            })
            .await
            .unwrap_err();

        assert!(err.is_transient());
        assert!(matches!(err, ApiError::Remote { .. }));
    }

    #[tokio::test]
    async fn not_found_body_is_permanent() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/projects/p0/zones/us-central1-a/machineTypes/n1-standard-2")
            .with_status(404)
            .with_body(r#"{"error": {"code": 404, "message": "machine type not found"}}"#)
            .create_async()
            .await;

        let api = test_api(&server);
        let err = api
            .call(&ApiRequest::GetMachineType {
                project: "p0".to_string(),
                zone: "us-central1-a".to_string(),
                machine_type: "n1-standard-2".to_string(),
            })
            .await
            .unwrap_err();

        assert!(!err.is_transient());
        assert_eq!(err.message(), "machine type not found");
    }

    #[tokio::test]
    async fn aggregated_listing_sends_filter_fields_and_token() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/projects/p0/aggregated/instances")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("filter".to_string(), "name=c0-*".to_string()),
                Matcher::UrlEncoded("fields".to_string(), INSTANCE_FIELDS.to_string()),
                Matcher::UrlEncoded("pageToken".to_string(), "page-2".to_string()),
            ]))
            .with_body(r#"{"items": {}}"#)
            .create_async()
            .await;

        let api = test_api(&server);
        let response = api
            .call(&ApiRequest::AggregatedListInstances {
                project: "p0".to_string(),
                filter: "name=c0-*".to_string(),
                page_token: Some("page-2".to_string()),
            })
            .await
            .unwrap();

        let page = response.into_instances().unwrap();
        assert!(page.items.is_empty());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn call_batch_returns_an_outcome_per_id() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/projects/p0/global/operations/ok/wait")
            .with_body(r#"{"name": "ok", "status": "DONE"}"#)
            .create_async()
            .await;
        server
            .mock("POST", "/projects/p0/global/operations/missing/wait")
            .with_status(404)
            .with_body(r#"{"error": {"message": "operation not found"}}"#)
            .create_async()
            .await;

        let wait = |name: &str| ApiRequest::WaitOperation {
            project: "p0".to_string(),
            scope: OperationScope::Global,
            operation: name.to_string(),
        };

        let api = test_api(&server);
        let results = api
            .call_batch(&[(7, wait("ok")), (8, wait("missing"))])
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].0, 7);
        assert!(results[0].1.is_ok());
        assert_eq!(results[1].0, 8);
        assert!(results[1].1.is_err());
    }
}
