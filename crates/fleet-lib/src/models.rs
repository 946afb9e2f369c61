//! Data models for control-plane resources and derived node metadata

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a long-running control-plane operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationStatus {
    Pending,
    Running,
    Done,
    /// Statuses this client does not know; treated as not yet terminal
    #[serde(other)]
    Unknown,
}

impl OperationStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done)
    }
}

/// Scope of an operation, inferred from which scope field it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationScope {
    Zone(String),
    Region(String),
    Global,
}

/// A long-running control-plane operation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub name: String,
    /// Zone URL, present only for zonal operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// Region URL, present only for regional operations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    pub status: OperationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_group_id: Option<String>,
}

impl Operation {
    /// Scope for wait/list endpoints. Zone and region fields are URLs;
    /// the endpoints take the bare name, so only the last path segment
    /// is kept.
    pub fn scope(&self) -> OperationScope {
        if let Some(zone) = &self.zone {
            OperationScope::Zone(last_segment(zone).to_string())
        } else if let Some(region) = &self.region {
            OperationScope::Region(last_segment(region).to_string())
        } else {
            OperationScope::Global
        }
    }

    pub fn is_done(&self) -> bool {
        self.status.is_done()
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Machine type specs as reported by the control plane
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypeDetails {
    pub name: String,
    pub zone: String,
    pub guest_cpus: u32,
    pub memory_mb: u64,
    #[serde(default)]
    pub accelerators: Vec<Accelerator>,
}

/// Accelerator attachment on a machine type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Accelerator {
    pub guest_accelerator_type: String,
    pub guest_accelerator_count: u32,
}

/// Usable machine shape derived from reported machine type specs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MachineShape {
    pub cpus: u32,
    pub memory_mb: u64,
    pub gpu_type: Option<String>,
    pub gpu_count: u32,
}

impl MachineShape {
    /// Derive the usable shape from reported specs. The host kernel and
    /// OS keep part of the reported memory; measurements put the cost
    /// around 400 MB plus up to 30 MB per GB, so that much is reserved.
    /// Accelerator type and count come from the first attachment only.
    pub fn from_machine_type(details: &MachineTypeDetails) -> Self {
        let gb = details.memory_mb / 1024;
        let memory_mb = details.memory_mb.saturating_sub(400 + 30 * gb);
        let (gpu_type, gpu_count) = match details.accelerators.first() {
            Some(acc) => (Some(acc.guest_accelerator_type.clone()), acc.guest_accelerator_count),
            None => (None, 0),
        };
        Self { cpus: details.guest_cpus, memory_mb, gpu_type, gpu_count }
    }
}

/// Instance template as returned by the template list endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceTemplate {
    pub name: String,
    pub self_link: String,
    pub creation_timestamp: DateTime<Utc>,
    pub properties: InstanceProperties,
}

/// Subset of template properties this client consumes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceProperties {
    pub machine_type: String,
}

/// Template metadata enriched with the derived machine shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateProperties {
    pub name: String,
    pub self_link: String,
    pub creation_timestamp: DateTime<Utc>,
    pub machine_type: String,
    pub machine: MachineShape,
}

/// Instance fields projected by the aggregated instance listing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSummary {
    pub name: String,
    pub zone: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// One zone's shard of an aggregated instance listing. Shards for
/// zones with no matches carry a warning instead of an instance list.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstancesScopedList {
    #[serde(default)]
    pub instances: Vec<InstanceSummary>,
}

/// One page of the aggregated instance listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceAggregatedPage {
    #[serde(default)]
    pub items: BTreeMap<String, InstancesScopedList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One zone's shard of an aggregated machine type listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypesScopedList {
    #[serde(default)]
    pub machine_types: Vec<MachineTypeDetails>,
}

/// One page of the aggregated machine type listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineTypeAggregatedPage {
    #[serde(default)]
    pub items: BTreeMap<String, MachineTypesScopedList>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One page of an instance template listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateListPage {
    #[serde(default)]
    pub items: Vec<InstanceTemplate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}

/// One page of an operation listing
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationListPage {
    #[serde(default)]
    pub items: Vec<Operation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page_token: Option<String>,
}
