//! Node identity resolution against the control plane
//!
//! A [`Lookup`] turns structured node names into partition, template,
//! and machine facts. Remote listings are fetched once per key and the
//! results are kept for the process lifetime; entries are immutable
//! snapshots and never revalidated against the control plane.

mod memo;
mod node_name;

#[cfg(test)]
mod tests;

pub use node_name::NodeIdentifier;

use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::api::{execute_with_backoff, ApiRequest, ComputeApi};
use crate::config::{ClusterConfig, NodeGroup};
use crate::error::{Error, Result};
use crate::metadata::MetadataClient;
use crate::models::{MachineShape, MachineTypeDetails, TemplateProperties};
use crate::observability::ApiMetrics;

use self::memo::MemoMap;

/// Metadata attribute naming the role of the host instance
const ROLE_ATTRIBUTE: &str = "instance_type";

/// A node-group declaration tagged with its owning partition and
/// annotated with resolved template details
#[derive(Debug, Clone, Serialize)]
pub struct TemplateNode {
    pub partition: String,
    pub group: NodeGroup,
    pub details: Arc<TemplateProperties>,
}

/// Memoizing resolver from node names to cluster and control-plane
/// facts
pub struct Lookup {
    cfg: ClusterConfig,
    api: Arc<dyn ComputeApi>,
    metadata: MetadataClient,
    default_project: Option<String>,
    metrics: ApiMetrics,
    instance_zones: MemoMap<(String, String), BTreeMap<String, String>>,
    machine_types: MemoMap<String, BTreeMap<String, BTreeMap<String, MachineTypeDetails>>>,
    machine_type_in_zone: MemoMap<(String, String, String), MachineTypeDetails>,
    template_details: MemoMap<String, TemplateProperties>,
    template_nodes: OnceCell<BTreeMap<String, Vec<TemplateNode>>>,
    node_role: OnceCell<Option<String>>,
}

impl Lookup {
    /// Resolver over a loaded configuration. When the configuration
    /// pins no project, instance metadata is probed once here for the
    /// fallback.
    pub async fn new(cfg: ClusterConfig, api: Arc<dyn ComputeApi>) -> anyhow::Result<Self> {
        let metadata = MetadataClient::new()?;
        let default_project = match &cfg.project {
            Some(_) => None,
            None => metadata.project_id().await,
        };
        Ok(Self::with_fallback_project(cfg, api, metadata, default_project))
    }

    /// Resolver with an explicit metadata client and fallback project,
    /// skipping the metadata probe
    pub fn with_fallback_project(
        cfg: ClusterConfig,
        api: Arc<dyn ComputeApi>,
        metadata: MetadataClient,
        default_project: Option<String>,
    ) -> Self {
        Self {
            cfg,
            api,
            metadata,
            default_project,
            metrics: ApiMetrics::new(),
            instance_zones: MemoMap::new(),
            machine_types: MemoMap::new(),
            machine_type_in_zone: MemoMap::new(),
            template_details: MemoMap::new(),
            template_nodes: OnceCell::new(),
            node_role: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.cfg
    }

    /// Project remote calls are scoped to. The configured project wins;
    /// otherwise the one captured from instance metadata.
    pub fn project(&self) -> Result<&str> {
        self.cfg
            .project
            .as_deref()
            .or(self.default_project.as_deref())
            .ok_or(Error::MissingProject)
    }

    /// True when jobs get whole nodes, through the exclusive flag or
    /// because placement groups are enabled
    pub fn is_exclusive(&self) -> bool {
        self.cfg.is_exclusive()
    }

    /// Role advertised for this host in instance metadata, if any
    pub async fn node_role(&self) -> Option<String> {
        self.node_role
            .get_or_init(|| self.metadata.instance_attribute(ROLE_ATTRIBUTE))
            .await
            .clone()
    }

    pub fn parse_node_name(&self, node_name: &str) -> Result<NodeIdentifier> {
        NodeIdentifier::parse(node_name)
    }

    pub fn node_template(&self, node_name: &str) -> Result<String> {
        Ok(self.parse_node_name(node_name)?.template)
    }

    pub fn node_partition(&self, node_name: &str) -> Result<String> {
        Ok(self.parse_node_name(node_name)?.partition)
    }

    pub fn node_index(&self, node_name: &str) -> Result<u64> {
        Ok(self.parse_node_name(node_name)?.index)
    }

    /// The node-group declaration a node belongs to, found through its
    /// partition and template fields
    pub fn node_config(&self, node_name: &str) -> Result<&NodeGroup> {
        let id = self.parse_node_name(node_name)?;
        let not_found = |id: &NodeIdentifier| Error::NodeNotFound {
            node: node_name.to_string(),
            partition: id.partition.clone(),
        };
        let partition = self
            .cfg
            .partitions
            .get(&id.partition)
            .ok_or_else(|| not_found(&id))?;
        partition
            .nodes
            .iter()
            .find(|group| group.template == id.template)
            .ok_or_else(|| not_found(&id))
    }

    /// Resolved template details for a node, through its template field
    pub async fn node_template_details(&self, node_name: &str) -> Result<Arc<TemplateProperties>> {
        let template = self.node_template(node_name)?;
        self.template_details(&template).await
    }

    /// Zone of every cluster instance, keyed by instance name. Pages of
    /// the aggregated listing are followed until no token remains. The
    /// overrides default to the configured project and cluster; results
    /// are cached per (project, cluster).
    pub async fn instance_zones(
        &self,
        project: Option<&str>,
        cluster: Option<&str>,
    ) -> Result<Arc<BTreeMap<String, String>>> {
        let project = match project {
            Some(project) => project.to_string(),
            None => self.project()?.to_string(),
        };
        let cluster = cluster.unwrap_or(&self.cfg.cluster_name).to_string();
        let key = (project.clone(), cluster.clone());
        if let Some(cached) = self.instance_zones.get(&key) {
            self.metrics.inc_cache_hit("instance_zones");
            return Ok(cached);
        }
        self.metrics.inc_cache_miss("instance_zones");
        self.instance_zones
            .get_or_try_insert_with(key, || self.fetch_instance_zones(project, cluster))
            .await
    }

    /// Zone holding a named instance, if the instance exists
    pub async fn instance_zone(
        &self,
        instance_name: &str,
        project: Option<&str>,
        cluster: Option<&str>,
    ) -> Result<Option<String>> {
        let zones = self.instance_zones(project, cluster).await?;
        Ok(zones.get(instance_name).cloned())
    }

    async fn fetch_instance_zones(
        &self,
        project: String,
        cluster: String,
    ) -> Result<BTreeMap<String, String>> {
        let filter = format!("name={}-*", cluster);
        info!(project = %project, filter = %filter, "listing instance zones");
        let mut zones = BTreeMap::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = ApiRequest::AggregatedListInstances {
                project: project.clone(),
                filter: filter.clone(),
                page_token: page_token.clone(),
            };
            let page = execute_with_backoff(self.api.as_ref(), &request)
                .await?
                .into_instances()?;
            for scoped in page.items.into_values() {
                for instance in scoped.instances {
                    zones.insert(instance.name, zone_name(&instance.zone).to_string());
                }
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        debug!(instances = zones.len(), "instance zones listed");
        Ok(zones)
    }

    /// Machine type specs in every zone, keyed by name then zone. A
    /// machine type may report different specs per zone, hence the
    /// nested map. The project override defaults to the configured one;
    /// results are cached per project.
    pub async fn machine_types(
        &self,
        project: Option<&str>,
    ) -> Result<Arc<BTreeMap<String, BTreeMap<String, MachineTypeDetails>>>> {
        let project = match project {
            Some(project) => project.to_string(),
            None => self.project()?.to_string(),
        };
        if let Some(cached) = self.machine_types.get(&project) {
            self.metrics.inc_cache_hit("machine_types");
            return Ok(cached);
        }
        self.metrics.inc_cache_miss("machine_types");
        self.machine_types
            .get_or_try_insert_with(project.clone(), || self.fetch_machine_types(project))
            .await
    }

    async fn fetch_machine_types(
        &self,
        project: String,
    ) -> Result<BTreeMap<String, BTreeMap<String, MachineTypeDetails>>> {
        info!(project = %project, "listing machine types");
        let mut by_name: BTreeMap<String, BTreeMap<String, MachineTypeDetails>> = BTreeMap::new();
        let mut page_token: Option<String> = None;
        loop {
            let request = ApiRequest::AggregatedListMachineTypes {
                project: project.clone(),
                page_token: page_token.clone(),
            };
            let page = execute_with_backoff(self.api.as_ref(), &request)
                .await?
                .into_machine_types()?;
            for scoped in page.items.into_values() {
                for details in scoped.machine_types {
                    by_name
                        .entry(details.name.clone())
                        .or_default()
                        .insert(details.zone.clone(), details);
                }
            }
            page_token = page.next_page_token;
            if page_token.is_none() {
                break;
            }
        }
        Ok(by_name)
    }

    /// Machine type specs by name. With a zone this is a point lookup
    /// against that zone; without one, the first zone in the aggregated
    /// listing is used and the choice is arbitrary when specs differ
    /// between zones.
    pub async fn machine_type(
        &self,
        name: &str,
        project: Option<&str>,
        zone: Option<&str>,
    ) -> Result<Arc<MachineTypeDetails>> {
        let project = match project {
            Some(project) => project.to_string(),
            None => self.project()?.to_string(),
        };
        let Some(zone) = zone else {
            let types = self.machine_types(Some(&project)).await?;
            let details = types
                .get(name)
                .and_then(|by_zone| by_zone.values().next())
                .ok_or_else(|| Error::MachineTypeNotFound {
                    name: name.to_string(),
                    project: project.clone(),
                })?;
            return Ok(Arc::new(details.clone()));
        };

        let key = (name.to_string(), project.clone(), zone.to_string());
        if let Some(cached) = self.machine_type_in_zone.get(&key) {
            self.metrics.inc_cache_hit("machine_type");
            return Ok(cached);
        }
        self.metrics.inc_cache_miss("machine_type");
        let request = ApiRequest::GetMachineType {
            project,
            zone: zone.to_string(),
            machine_type: name.to_string(),
        };
        self.machine_type_in_zone
            .get_or_try_insert_with(key, || async move {
                let response = execute_with_backoff(self.api.as_ref(), &request).await?;
                Ok(response.into_machine_type()?)
            })
            .await
    }

    /// Template metadata for a template token, enriched with the
    /// derived machine shape. On first use the cluster's templates are
    /// listed under a name filter and the earliest created match is
    /// kept.
    pub async fn template_details(&self, template: &str) -> Result<Arc<TemplateProperties>> {
        let key = template.to_string();
        if let Some(cached) = self.template_details.get(&key) {
            self.metrics.inc_cache_hit("template_details");
            return Ok(cached);
        }
        self.metrics.inc_cache_miss("template_details");
        self.template_details
            .get_or_try_insert_with(key, || self.fetch_template_details(template))
            .await
    }

    async fn fetch_template_details(&self, template: &str) -> Result<TemplateProperties> {
        let project = self.project()?.to_string();
        let filter = format!("(name={}-{}-*)", self.cfg.cluster_name, template);
        info!(template = %template, filter = %filter, "fetching template details");
        let request = ApiRequest::ListInstanceTemplates {
            project,
            filter: filter.clone(),
        };
        let mut matches = execute_with_backoff(self.api.as_ref(), &request)
            .await?
            .into_templates()?;
        matches.sort_by_key(|t| t.creation_timestamp);
        let earliest = matches
            .into_iter()
            .next()
            .ok_or_else(|| Error::TemplateNotFound {
                template: template.to_string(),
                filter,
            })?;

        let machine = self
            .machine_type(&earliest.properties.machine_type, None, None)
            .await?;
        Ok(TemplateProperties {
            name: earliest.name,
            self_link: earliest.self_link,
            creation_timestamp: earliest.creation_timestamp,
            machine_type: earliest.properties.machine_type,
            machine: MachineShape::from_machine_type(&machine),
        })
    }

    /// Node-group declarations grouped by template, each tagged with
    /// its partition and annotated with resolved template details.
    /// Details for distinct templates are prefetched concurrently on a
    /// pool sized to the host's parallelism. Computed once.
    pub async fn template_nodes(&self) -> Result<&BTreeMap<String, Vec<TemplateNode>>> {
        self.template_nodes
            .get_or_try_init(|| self.fetch_template_nodes())
            .await
    }

    async fn fetch_template_nodes(&self) -> Result<BTreeMap<String, Vec<TemplateNode>>> {
        let mut groups: BTreeMap<String, Vec<(String, NodeGroup)>> = BTreeMap::new();
        for (partition_name, partition) in &self.cfg.partitions {
            for group in &partition.nodes {
                groups
                    .entry(group.template.clone())
                    .or_default()
                    .push((partition_name.clone(), group.clone()));
            }
        }

        let templates: Vec<String> = groups.keys().cloned().collect();
        let workers = std::thread::available_parallelism().map_or(1, NonZeroUsize::get);
        debug!(templates = templates.len(), workers, "prefetching template details");
        let details: BTreeMap<String, Arc<TemplateProperties>> = stream::iter(templates)
            .map(|template| async move {
                let details = self.template_details(&template).await;
                (template, details)
            })
            .buffer_unordered(workers)
            .map(|(template, details)| details.map(|d| (template, d)))
            .try_collect()
            .await?;

        Ok(details
            .into_iter()
            .map(|(template, details)| {
                let nodes = groups
                    .remove(&template)
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(partition, group)| TemplateNode {
                        partition,
                        group,
                        details: Arc::clone(&details),
                    })
                    .collect();
                (template, nodes)
            })
            .collect())
    }
}

fn zone_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
