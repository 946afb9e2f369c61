//! Error types for the control-plane client and lookup layers.

use thiserror::Error;

/// Control-plane error messages carrying these substrings are retried
/// rather than surfaced.
const TRANSIENT_MARKERS: [&str; 2] = ["Rate Limit Exceeded", "Quota Exceeded"];

/// Errors surfaced by the remote control plane or its transport.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    /// The control plane returned an error response.
    #[error("remote error: {message}")]
    Remote { message: String },
    /// The transport timed out before a response arrived.
    #[error("transport timeout: {message}")]
    Timeout { message: String },
    /// The transport failed below the API layer.
    #[error("transport error: {message}")]
    Transport { message: String },
}

impl ApiError {
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote { message: message.into() }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout { message: message.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// The human-readable message, whatever the kind.
    pub fn message(&self) -> &str {
        match self {
            Self::Remote { message } | Self::Timeout { message } | Self::Transport { message } => {
                message
            }
        }
    }

    /// True for rate-limit and quota errors, which are expected to clear
    /// on their own and are never surfaced to callers.
    pub fn is_transient(&self) -> bool {
        !self.is_timeout() && TRANSIENT_MARKERS.iter().any(|m| self.message().contains(m))
    }

    /// True for transport timeouts, retried without backoff.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Local lookup and validation failures.
#[derive(Debug, Error)]
pub enum Error {
    /// The node name does not match `<name>-<template>-<partition>-<index>`.
    #[error("node name {0:?} is not valid")]
    InvalidNodeName(String),
    /// No node group in the node's partition references its template.
    #[error("node {node} not found among partition {partition} node groups")]
    NodeNotFound { node: String, partition: String },
    /// No instance template matched the cluster-scoped name filter.
    #[error("no instance template found matching {filter}")]
    TemplateNotFound { template: String, filter: String },
    /// The machine type appears in no zone of the aggregated listing.
    #[error("machine type {name} not found in project {project}")]
    MachineTypeNotFound { name: String, project: String },
    /// The operation carries no group id, so siblings cannot be listed.
    #[error("operation {0} has no operation group id")]
    MissingOperationGroup(String),
    /// No project in the configuration and none resolvable from metadata.
    #[error("no project configured and none available from instance metadata")]
    MissingProject,
    /// A remote call failed permanently.
    #[error(transparent)]
    Api(#[from] ApiError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
