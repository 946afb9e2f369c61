//! Instance metadata access
//!
//! Key-path lookups against the local metadata service. Every read
//! returns `None` on failure rather than an error; callers treat an
//! absent value as "not running on a managed instance".

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Client;
use tracing::error;
use url::Url;

/// Root of the local metadata service
pub const METADATA_ROOT: &str = "http://metadata.google.internal/computeMetadata/v1/";

const METADATA_FLAVOR_HEADER: &str = "Metadata-Flavor";
const METADATA_FLAVOR: &str = "Google";

/// Client for the local instance metadata service
#[derive(Debug, Clone)]
pub struct MetadataClient {
    client: Client,
    root: Url,
}

impl MetadataClient {
    /// Client against the standard local endpoint
    pub fn new() -> Result<Self> {
        Self::with_root(METADATA_ROOT)
    }

    /// Client against a custom endpoint
    pub fn with_root(root: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        // Url::join drops the last path segment unless the base ends
        // with a slash.
        let mut root = root.to_string();
        if !root.ends_with('/') {
            root.push('/');
        }
        let root = Url::parse(&root).context("Invalid metadata root URL")?;

        Ok(Self { client, root })
    }

    /// Fetch a key path relative to the metadata root, `None` on any
    /// failure
    pub async fn get(&self, path: &str) -> Option<String> {
        let url = match self.root.join(path) {
            Ok(url) => url,
            Err(e) => {
                error!(path = %path, error = %e, "invalid metadata path");
                return None;
            }
        };

        let result = self
            .client
            .get(url.clone())
            .header(METADATA_FLAVOR_HEADER, METADATA_FLAVOR)
            .send()
            .await
            .and_then(|resp| resp.error_for_status());

        match result {
            Ok(resp) => match resp.text().await {
                Ok(text) => Some(text),
                Err(e) => {
                    error!(url = %url, error = %e, "error reading metadata response");
                    None
                }
            },
            Err(e) => {
                error!(url = %url, error = %e, "error while getting metadata");
                None
            }
        }
    }

    /// Fetch an instance-scoped key
    pub async fn instance(&self, path: &str) -> Option<String> {
        self.get(&format!("instance/{}", path)).await
    }

    /// Fetch an instance attribute by key
    pub async fn instance_attribute(&self, key: &str) -> Option<String> {
        self.instance(&format!("attributes/{}", key)).await
    }

    /// Project this instance runs in
    pub async fn project_id(&self) -> Option<String> {
        self.get("project/project-id").await
    }

    /// Fully qualified hostname of this instance
    pub async fn hostname(&self) -> Option<String> {
        self.instance("hostname").await
    }
}
