//! Control-plane API access
//!
//! [`ComputeApi`] is the seam between this library and the remote
//! control plane: issue one request, or a keyed set of requests as a
//! single batch round trip with a per-request outcome each. On top of
//! it sit [`with_backoff`] for transparent transient-error retries,
//! [`BatchExecutor`] for driving whole worklists to completion, and
//! [`OperationPoller`] for waiting on long-running operations.
//! [`RestComputeApi`] is the production transport.

mod backoff;
mod batch;
mod operations;
mod rest;


pub use backoff::{execute_with_backoff, with_backoff, MAX_BACKOFF_SECS};
pub use batch::{BatchExecutor, BatchOutcome, BATCH_LIMIT};
pub use operations::{operation_pending, OperationPoller};
pub use rest::{
    MetadataTokenProvider, RestComputeApi, RestComputeApiBuilder, StaticTokenProvider,
    TokenProvider,
};

use crate::error::ApiError;
use crate::models::{
    InstanceAggregatedPage, InstanceTemplate, MachineTypeAggregatedPage, MachineTypeDetails,
    Operation, OperationListPage, OperationScope,
};

pub use async_trait::async_trait;

/// Identifier of one request within a worklist
pub type RequestId = u64;

/// A single control-plane request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiRequest {
    /// Wait server-side for an operation to progress and return its
    /// latest state
    WaitOperation {
        project: String,
        scope: OperationScope,
        operation: String,
    },
    /// List operations in one scope matching a filter
    ListOperations {
        project: String,
        scope: OperationScope,
        filter: String,
    },
    /// Point lookup of a machine type in one zone
    GetMachineType {
        project: String,
        zone: String,
        machine_type: String,
    },
    /// List instance templates matching a filter
    ListInstanceTemplates { project: String, filter: String },
    /// One page of the aggregated instance listing
    AggregatedListInstances {
        project: String,
        filter: String,
        page_token: Option<String>,
    },
    /// One page of the aggregated machine type listing
    AggregatedListMachineTypes {
        project: String,
        page_token: Option<String>,
    },
}

/// A successful control-plane response
#[derive(Debug, Clone)]
pub enum ApiResponse {
    Operation(Operation),
    Operations(OperationListPage),
    MachineType(MachineTypeDetails),
    Templates(Vec<InstanceTemplate>),
    Instances(InstanceAggregatedPage),
    MachineTypes(MachineTypeAggregatedPage),
}

impl ApiResponse {
    fn kind(&self) -> &'static str {
        match self {
            Self::Operation(_) => "operation",
            Self::Operations(_) => "operation list",
            Self::MachineType(_) => "machine type",
            Self::Templates(_) => "template list",
            Self::Instances(_) => "instance page",
            Self::MachineTypes(_) => "machine type page",
        }
    }

    fn mismatch(&self, wanted: &str) -> ApiError {
        ApiError::transport(format!("expected {} response, got {}", wanted, self.kind()))
    }

    pub fn as_operation(&self) -> Option<&Operation> {
        match self {
            Self::Operation(op) => Some(op),
            _ => None,
        }
    }

    pub fn into_operation(self) -> Result<Operation, ApiError> {
        match self {
            Self::Operation(op) => Ok(op),
            other => Err(other.mismatch("operation")),
        }
    }

    pub fn into_operations(self) -> Result<OperationListPage, ApiError> {
        match self {
            Self::Operations(page) => Ok(page),
            other => Err(other.mismatch("operation list")),
        }
    }

    pub fn into_machine_type(self) -> Result<MachineTypeDetails, ApiError> {
        match self {
            Self::MachineType(details) => Ok(details),
            other => Err(other.mismatch("machine type")),
        }
    }

    pub fn into_templates(self) -> Result<Vec<InstanceTemplate>, ApiError> {
        match self {
            Self::Templates(templates) => Ok(templates),
            other => Err(other.mismatch("template list")),
        }
    }

    pub fn into_instances(self) -> Result<InstanceAggregatedPage, ApiError> {
        match self {
            Self::Instances(page) => Ok(page),
            other => Err(other.mismatch("instance page")),
        }
    }

    pub fn into_machine_types(self) -> Result<MachineTypeAggregatedPage, ApiError> {
        match self {
            Self::MachineTypes(page) => Ok(page),
            other => Err(other.mismatch("machine type page")),
        }
    }
}

/// Credentialed access to the remote control plane
///
/// Implementations own transport concerns (connections, auth tokens).
/// Retry policy lives in the callers; errors come back with the remote
/// message intact so transient causes stay recognizable.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Issue a single request
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError>;

    /// Issue a set of requests as one batch round trip, returning an
    /// outcome per submitted id.
    ///
    /// The default runs requests serially over [`ComputeApi::call`];
    /// transports with a cheaper fan-out override it. An `Err` means
    /// the whole round trip failed and nothing was resolved.
    async fn call_batch(
        &self,
        requests: &[(RequestId, ApiRequest)],
    ) -> Result<Vec<(RequestId, Result<ApiResponse, ApiError>)>, ApiError> {
        let mut results = Vec::with_capacity(requests.len());
        for (rid, request) in requests {
            results.push((*rid, self.call(request).await));
        }
        Ok(results)
    }
}
