//! Client library for the cluster control plane
//!
//! This crate provides the core functionality for:
//! - Batched execution of control-plane requests with transient-error
//!   retries
//! - Waiting on long-running operations across zone, region and global
//!   scopes
//! - Node name parsing and memoized resource lookups
//! - Cluster configuration loading and normalization

pub mod api;
pub mod config;
pub mod error;
pub mod lookup;
pub mod metadata;
pub mod models;
pub mod observability;

pub use api::{
    execute_with_backoff, with_backoff, ApiRequest, ApiResponse, BatchExecutor, BatchOutcome,
    ComputeApi, MetadataTokenProvider, OperationPoller, RequestId, RestComputeApi,
    RestComputeApiBuilder, StaticTokenProvider, TokenProvider,
};
pub use config::ClusterConfig;
pub use error::{ApiError, Error, Result};
pub use lookup::{Lookup, NodeIdentifier, TemplateNode};
pub use metadata::MetadataClient;
pub use models::*;
pub use observability::ApiMetrics;
