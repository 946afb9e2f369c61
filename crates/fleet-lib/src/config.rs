//! Cluster configuration
//!
//! Statically typed view of the cluster configuration file. Missing
//! required keys fail at load time rather than turning into silent
//! absent values. The one mutation is [`ClusterConfig::normalize`],
//! which resolves the symbolic `$controller` storage address once.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Symbolic server address resolved to the controller hostname at load
pub const CONTROLLER_PLACEHOLDER: &str = "$controller";

/// Cluster configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name, prefixed onto every managed resource name
    pub cluster_name: String,

    /// Project owning the cluster's resources; falls back to instance
    /// metadata when unset
    #[serde(default)]
    pub project: Option<String>,

    /// Partitions by name, each holding node group declarations
    #[serde(default)]
    pub partitions: BTreeMap<String, Partition>,

    /// Cluster-wide network storage mounts
    #[serde(default)]
    pub network_storage: Vec<NetworkStorageMount>,

    /// Network storage mounted on login nodes only
    #[serde(default)]
    pub login_network_storage: Vec<NetworkStorageMount>,

    /// Nodes are not shared between jobs
    #[serde(default)]
    pub exclusive: bool,

    /// Placement policies requested at instance creation; implies
    /// exclusive scheduling
    #[serde(default)]
    pub enable_placement: bool,

    /// Service account credentials file exported for the API client
    #[serde(default)]
    pub google_app_cred_path: Option<PathBuf>,
}

/// A named subdivision of the cluster holding node groups
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Partition {
    /// Node group declarations in this partition
    #[serde(default)]
    pub nodes: Vec<NodeGroup>,

    /// Network storage mounted on this partition's nodes
    #[serde(default)]
    pub network_storage: Vec<NetworkStorageMount>,
}

/// Declaration of a group of identical nodes built from one template
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeGroup {
    /// Template the group's nodes are created from
    pub template: String,

    /// Maximum number of nodes in the group
    #[serde(default)]
    pub count: u32,

    /// Extra mounts for this group only
    #[serde(default)]
    pub network_storage: Vec<NetworkStorageMount>,
}

/// A network storage mount declaration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkStorageMount {
    pub server_ip: String,
    pub remote_mount: String,
    pub local_mount: String,
    pub fs_type: String,
    #[serde(default)]
    pub mount_options: String,
}

impl NetworkStorageMount {
    fn resolve_controller(&mut self, controller: &str) {
        if self.server_ip == CONTROLLER_PLACEHOLDER {
            self.server_ip = controller.to_string();
        }
    }
}

impl ClusterConfig {
    /// Load configuration from a file plus `FLEET_`-prefixed
    /// environment overrides, then normalize it
    pub fn load(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix("FLEET"))
            .build()
            .with_context(|| format!("reading configuration from {}", path.display()))?;

        let mut cfg: ClusterConfig = settings
            .try_deserialize()
            .context("cluster configuration has missing or mistyped keys")?;
        cfg.normalize();
        Ok(cfg)
    }

    /// Hostname of the cluster controller
    pub fn controller_host(&self) -> String {
        format!("{}-controller", self.cluster_name)
    }

    /// Whole-node scheduling is in effect when either flag is set
    pub fn is_exclusive(&self) -> bool {
        self.exclusive || self.enable_placement
    }

    /// Resolve `$controller` in the cluster, login and partition
    /// storage lists
    pub fn normalize(&mut self) {
        let controller = self.controller_host();
        for mount in self
            .network_storage
            .iter_mut()
            .chain(self.login_network_storage.iter_mut())
        {
            mount.resolve_controller(&controller);
        }
        for partition in self.partitions.values_mut() {
            for mount in partition.network_storage.iter_mut() {
                mount.resolve_controller(&controller);
            }
        }
    }
}
