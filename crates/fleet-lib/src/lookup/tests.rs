//! Integration tests for the lookup layer
//!
//! These tests verify:
//! - Node-group resolution through parsed node names
//! - Page merging for the aggregated listings
//! - One remote fetch per cached key
//! - Template selection and machine shape derivation

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use super::*;
use crate::api::{async_trait, ApiResponse};
use crate::error::ApiError;
use crate::models::{
    Accelerator, InstanceAggregatedPage, InstanceProperties, InstanceSummary, InstanceTemplate,
    MachineTypeAggregatedPage, MachineTypesScopedList,
};

/// API double returning a fixed response per route and counting hits
struct RoutedApi {
    routes: Mutex<Vec<(ApiRequest, Result<ApiResponse, ApiError>, usize)>>,
}

impl RoutedApi {
    fn new(
        routes: impl IntoIterator<Item = (ApiRequest, Result<ApiResponse, ApiError>)>,
    ) -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(
                routes
                    .into_iter()
                    .map(|(request, response)| (request, response, 0))
                    .collect(),
            ),
        })
    }

    fn hits(&self, request: &ApiRequest) -> usize {
        self.routes
            .lock()
            .unwrap()
            .iter()
            .find(|(route, _, _)| route == request)
            .map_or(0, |(_, _, hits)| *hits)
    }

    fn total_calls(&self) -> usize {
        self.routes.lock().unwrap().iter().map(|(_, _, hits)| hits).sum()
    }
}

#[async_trait]
impl ComputeApi for RoutedApi {
    async fn call(&self, request: &ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut routes = self.routes.lock().unwrap();
        let (_, response, hits) = routes
            .iter_mut()
            .find(|(route, _, _)| route == request)
            .unwrap_or_else(|| panic!("unexpected request: {:?}", request));
        *hits += 1;
        response.clone()
    }
}

fn test_config() -> ClusterConfig {
    let mut partitions = BTreeMap::new();
    partitions.insert(
        "batch".to_string(),
        crate::config::Partition {
            nodes: vec![
                NodeGroup {
                    template: "n2s4".to_string(),
                    count: 10,
                    network_storage: vec![],
                },
                NodeGroup {
                    template: "a2-high-8".to_string(),
                    count: 2,
                    network_storage: vec![],
                },
            ],
            network_storage: vec![],
        },
    );
    partitions.insert(
        "debug".to_string(),
        crate::config::Partition {
            nodes: vec![NodeGroup {
                template: "n2s4".to_string(),
                count: 1,
                network_storage: vec![],
            }],
            network_storage: vec![],
        },
    );
    ClusterConfig {
        cluster_name: "c0".to_string(),
        project: Some("p0".to_string()),
        partitions,
        ..ClusterConfig::default()
    }
}

fn lookup_with(cfg: ClusterConfig, api: Arc<RoutedApi>) -> Lookup {
    let metadata = MetadataClient::new().unwrap();
    Lookup::with_fallback_project(cfg, api, metadata, None)
}

fn machine(name: &str, zone: &str, memory_mb: u64) -> MachineTypeDetails {
    MachineTypeDetails {
        name: name.to_string(),
        zone: zone.to_string(),
        guest_cpus: 4,
        memory_mb,
        accelerators: vec![],
    }
}

fn machine_types_page(machines: Vec<MachineTypeDetails>, token: Option<&str>) -> ApiResponse {
    let mut items: BTreeMap<String, MachineTypesScopedList> = BTreeMap::new();
    for m in machines {
        items
            .entry(format!("zones/{}", m.zone))
            .or_default()
            .machine_types
            .push(m);
    }
    ApiResponse::MachineTypes(MachineTypeAggregatedPage {
        items,
        next_page_token: token.map(str::to_string),
    })
}

fn instances_page(instances: Vec<(&str, &str)>, token: Option<&str>) -> ApiResponse {
    let mut items: BTreeMap<String, crate::models::InstancesScopedList> = BTreeMap::new();
    for (name, zone) in instances {
        items
            .entry(format!("zones/{}", zone))
            .or_default()
            .instances
            .push(InstanceSummary {
                name: name.to_string(),
                zone: format!("projects/p0/zones/{}", zone),
                status: Some("RUNNING".to_string()),
            });
    }
    ApiResponse::Instances(InstanceAggregatedPage {
        items,
        next_page_token: token.map(str::to_string),
    })
}

fn template(name: &str, machine_type: &str, created: &str) -> InstanceTemplate {
    InstanceTemplate {
        name: name.to_string(),
        self_link: format!("projects/p0/global/instanceTemplates/{}", name),
        creation_timestamp: created.parse().unwrap(),
        properties: InstanceProperties {
            machine_type: machine_type.to_string(),
        },
    }
}

fn aggregated_instances(token: Option<&str>) -> ApiRequest {
    ApiRequest::AggregatedListInstances {
        project: "p0".to_string(),
        filter: "name=c0-*".to_string(),
        page_token: token.map(str::to_string),
    }
}

fn aggregated_machine_types(token: Option<&str>) -> ApiRequest {
    ApiRequest::AggregatedListMachineTypes {
        project: "p0".to_string(),
        page_token: token.map(str::to_string),
    }
}

fn list_templates(template: &str) -> ApiRequest {
    ApiRequest::ListInstanceTemplates {
        project: "p0".to_string(),
        filter: format!("(name=c0-{}-*)", template),
    }
}

mod node_lookup_tests {
    use super::*;

    #[test]
    fn projections_follow_the_grammar() {
        let lookup = lookup_with(test_config(), RoutedApi::new([]));
        assert_eq!(lookup.node_template("c0-a2-high-8-batch-3").unwrap(), "a2-high-8");
        assert_eq!(lookup.node_partition("c0-a2-high-8-batch-3").unwrap(), "batch");
        assert_eq!(lookup.node_index("c0-a2-high-8-batch-3").unwrap(), 3);
    }

    #[test]
    fn node_config_resolves_the_declaring_group() {
        let lookup = lookup_with(test_config(), RoutedApi::new([]));
        let group = lookup.node_config("c0-n2s4-batch-0").unwrap();
        assert_eq!(group.template, "n2s4");
        assert_eq!(group.count, 10);
    }

    #[test]
    fn node_config_fails_for_unknown_partition() {
        let lookup = lookup_with(test_config(), RoutedApi::new([]));
        let err = lookup.node_config("c0-n2s4-gpu-0").unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { partition, .. } if partition == "gpu"));
    }

    #[test]
    fn node_config_fails_when_no_group_uses_the_template() {
        let lookup = lookup_with(test_config(), RoutedApi::new([]));
        let err = lookup.node_config("c0-ghost-batch-0").unwrap_err();
        assert!(matches!(err, Error::NodeNotFound { node, .. } if node == "c0-ghost-batch-0"));
    }

    #[test]
    fn malformed_names_are_rejected_up_front() {
        let lookup = lookup_with(test_config(), RoutedApi::new([]));
        let err = lookup.node_config("web-tmplA-part1-x").unwrap_err();
        assert!(matches!(err, Error::InvalidNodeName(_)));
    }
}

mod instance_zone_tests {
    use super::*;

    #[tokio::test]
    async fn listing_merges_pages_and_strips_zone_urls() {
        let api = RoutedApi::new([
            (
                aggregated_instances(None),
                Ok(instances_page(
                    vec![("c0-n2s4-batch-0", "us-central1-a")],
                    Some("t1"),
                )),
            ),
            (
                aggregated_instances(Some("t1")),
                Ok(instances_page(
                    vec![
                        ("c0-n2s4-batch-1", "us-central1-b"),
                        ("c0-a2-high-8-batch-0", "us-central1-a"),
                    ],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api.clone());

        let zones = lookup.instance_zones(None, None).await.unwrap();
        assert_eq!(zones.len(), 3);
        assert_eq!(zones["c0-n2s4-batch-0"], "us-central1-a");
        assert_eq!(zones["c0-n2s4-batch-1"], "us-central1-b");
        assert_eq!(api.total_calls(), 2);

        // Cached on the second read, per (project, cluster).
        lookup.instance_zones(None, None).await.unwrap();
        assert_eq!(api.total_calls(), 2);
    }

    #[tokio::test]
    async fn single_instance_lookup_is_optional() {
        let api = RoutedApi::new([(
            aggregated_instances(None),
            Ok(instances_page(
                vec![("c0-n2s4-batch-0", "us-central1-a")],
                None,
            )),
        )]);
        let lookup = lookup_with(test_config(), api);

        let zone = lookup.instance_zone("c0-n2s4-batch-0", None, None).await.unwrap();
        assert_eq!(zone.as_deref(), Some("us-central1-a"));
        assert_eq!(lookup.instance_zone("c0-gone-batch-9", None, None).await.unwrap(), None);
    }

    #[tokio::test]
    async fn overrides_scope_the_listing_and_the_cache_key() {
        let api = RoutedApi::new([
            (
                aggregated_instances(None),
                Ok(instances_page(
                    vec![("c0-n2s4-batch-0", "us-central1-a")],
                    None,
                )),
            ),
            (
                ApiRequest::AggregatedListInstances {
                    project: "p1".to_string(),
                    filter: "name=c1-*".to_string(),
                    page_token: None,
                },
                Ok(instances_page(
                    vec![("c1-n2s4-batch-0", "europe-west4-a")],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api.clone());

        let defaults = lookup.instance_zones(None, None).await.unwrap();
        let other = lookup
            .instance_zones(Some("p1"), Some("c1"))
            .await
            .unwrap();
        assert_eq!(defaults["c0-n2s4-batch-0"], "us-central1-a");
        assert_eq!(other["c1-n2s4-batch-0"], "europe-west4-a");

        // Each (project, cluster) pair is listed once.
        lookup.instance_zones(Some("p1"), Some("c1")).await.unwrap();
        lookup.instance_zones(None, None).await.unwrap();
        assert_eq!(api.total_calls(), 2);
    }
}

mod machine_type_tests {
    use super::*;

    #[tokio::test]
    async fn aggregated_listing_builds_the_nested_map() {
        let api = RoutedApi::new([
            (
                aggregated_machine_types(None),
                Ok(machine_types_page(
                    vec![machine("n2s4", "us-central1-a", 8192)],
                    Some("t1"),
                )),
            ),
            (
                aggregated_machine_types(Some("t1")),
                Ok(machine_types_page(
                    vec![
                        machine("n2s4", "us-central1-b", 8192),
                        machine("e2-small", "us-central1-a", 2048),
                    ],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api.clone());

        let types = lookup.machine_types(None).await.unwrap();
        assert_eq!(types["n2s4"].len(), 2);
        assert_eq!(types["e2-small"].len(), 1);
        assert_eq!(api.total_calls(), 2);

        lookup.machine_types(None).await.unwrap();
        assert_eq!(api.total_calls(), 2);
    }

    #[tokio::test]
    async fn zone_given_makes_a_point_lookup() {
        let request = ApiRequest::GetMachineType {
            project: "p0".to_string(),
            zone: "us-central1-a".to_string(),
            machine_type: "n2s4".to_string(),
        };
        let api = RoutedApi::new([(
            request.clone(),
            Ok(ApiResponse::MachineType(machine("n2s4", "us-central1-a", 8192))),
        )]);
        let lookup = lookup_with(test_config(), api.clone());

        let details = lookup.machine_type("n2s4", None, Some("us-central1-a")).await.unwrap();
        assert_eq!(details.memory_mb, 8192);
        lookup.machine_type("n2s4", None, Some("us-central1-a")).await.unwrap();
        assert_eq!(api.hits(&request), 1);
    }

    #[tokio::test]
    async fn zone_omitted_falls_back_to_the_aggregated_cache() {
        let api = RoutedApi::new([(
            aggregated_machine_types(None),
            Ok(machine_types_page(
                vec![
                    machine("n2s4", "us-central1-b", 8192),
                    machine("n2s4", "us-central1-a", 8192),
                ],
                None,
            )),
        )]);
        let lookup = lookup_with(test_config(), api);

        let details = lookup.machine_type("n2s4", None, None).await.unwrap();
        assert_eq!(details.name, "n2s4");

        let err = lookup.machine_type("ghost", None, None).await.unwrap_err();
        assert!(matches!(err, Error::MachineTypeNotFound { name, .. } if name == "ghost"));
    }

    #[tokio::test]
    async fn project_override_scopes_the_point_lookup() {
        let request = ApiRequest::GetMachineType {
            project: "p1".to_string(),
            zone: "us-central1-a".to_string(),
            machine_type: "n2s4".to_string(),
        };
        let api = RoutedApi::new([(
            request.clone(),
            Ok(ApiResponse::MachineType(machine("n2s4", "us-central1-a", 4096))),
        )]);
        let lookup = lookup_with(test_config(), api.clone());

        let details = lookup
            .machine_type("n2s4", Some("p1"), Some("us-central1-a"))
            .await
            .unwrap();
        assert_eq!(details.memory_mb, 4096);

        // Cached under the overridden project, not the configured one.
        lookup
            .machine_type("n2s4", Some("p1"), Some("us-central1-a"))
            .await
            .unwrap();
        assert_eq!(api.hits(&request), 1);
    }
}

mod template_tests {
    use super::*;

    #[tokio::test]
    async fn details_pick_the_earliest_match_and_derive_the_shape() {
        let api = RoutedApi::new([
            (
                list_templates("n2s4"),
                Ok(ApiResponse::Templates(vec![
                    template("c0-n2s4-v2", "n2-standard-8", "2024-03-01T00:00:00Z"),
                    template("c0-n2s4-v1", "n2-standard-4", "2024-01-15T00:00:00Z"),
                ])),
            ),
            (
                aggregated_machine_types(None),
                Ok(machine_types_page(
                    vec![
                        machine("n2-standard-4", "us-central1-a", 8192),
                        machine("n2-standard-8", "us-central1-a", 16384),
                    ],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api.clone());

        let details = lookup.template_details("n2s4").await.unwrap();
        assert_eq!(details.name, "c0-n2s4-v1");
        assert_eq!(details.machine_type, "n2-standard-4");
        assert_eq!(details.machine.memory_mb, 7552);
        assert_eq!(details.machine.gpu_count, 0);

        // Second call returns the identical cached object.
        let again = lookup.template_details("n2s4").await.unwrap();
        assert!(Arc::ptr_eq(&details, &again));
        assert_eq!(api.hits(&list_templates("n2s4")), 1);
    }

    #[tokio::test]
    async fn node_details_resolve_through_the_template_field() {
        let api = RoutedApi::new([
            (
                list_templates("n2s4"),
                Ok(ApiResponse::Templates(vec![template(
                    "c0-n2s4-v1",
                    "n2-standard-4",
                    "2024-01-15T00:00:00Z",
                )])),
            ),
            (
                aggregated_machine_types(None),
                Ok(machine_types_page(
                    vec![machine("n2-standard-4", "us-central1-a", 8192)],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api);

        let details = lookup
            .node_template_details("c0-n2s4-batch-7")
            .await
            .unwrap();
        assert_eq!(details.name, "c0-n2s4-v1");

        let err = lookup.node_template_details("not a node").await.unwrap_err();
        assert!(matches!(err, Error::InvalidNodeName(_)));
    }

    #[tokio::test]
    async fn missing_template_is_an_error() {
        let api = RoutedApi::new([(list_templates("ghost"), Ok(ApiResponse::Templates(vec![])))]);
        let lookup = lookup_with(test_config(), api);

        let err = lookup.template_details("ghost").await.unwrap_err();
        assert!(matches!(err, Error::TemplateNotFound { template, .. } if template == "ghost"));
    }

    #[tokio::test]
    async fn template_nodes_group_declarations_and_annotate_details() {
        let api = RoutedApi::new([
            (
                list_templates("n2s4"),
                Ok(ApiResponse::Templates(vec![template(
                    "c0-n2s4-v1",
                    "n2-standard-4",
                    "2024-01-15T00:00:00Z",
                )])),
            ),
            (
                list_templates("a2-high-8"),
                Ok(ApiResponse::Templates(vec![template(
                    "c0-a2-high-8-v1",
                    "a2-highgpu-8g",
                    "2024-02-01T00:00:00Z",
                )])),
            ),
            (
                aggregated_machine_types(None),
                Ok(machine_types_page(
                    vec![
                        machine("n2-standard-4", "us-central1-a", 8192),
                        MachineTypeDetails {
                            name: "a2-highgpu-8g".to_string(),
                            zone: "us-central1-a".to_string(),
                            guest_cpus: 96,
                            memory_mb: 87040,
                            accelerators: vec![Accelerator {
                                guest_accelerator_type: "nvidia-tesla-a100".to_string(),
                                guest_accelerator_count: 8,
                            }],
                        },
                    ],
                    None,
                )),
            ),
        ]);
        let lookup = lookup_with(test_config(), api.clone());

        let nodes = lookup.template_nodes().await.unwrap();
        assert_eq!(nodes.keys().collect::<Vec<_>>(), vec!["a2-high-8", "n2s4"]);

        let shared = &nodes["n2s4"];
        assert_eq!(shared.len(), 2);
        let partitions: Vec<_> = shared.iter().map(|node| node.partition.as_str()).collect();
        assert_eq!(partitions, vec!["batch", "debug"]);
        assert_eq!(shared[0].group.count, 10);
        assert_eq!(shared[0].details.machine.memory_mb, 7552);

        let gpu = &nodes["a2-high-8"];
        assert_eq!(gpu.len(), 1);
        assert_eq!(gpu[0].partition, "batch");
        assert_eq!(gpu[0].details.machine.gpu_count, 8);
        assert_eq!(gpu[0].details.machine.gpu_type.as_deref(), Some("nvidia-tesla-a100"));

        // Each template listed once, and the grouping is computed once.
        assert_eq!(api.hits(&list_templates("n2s4")), 1);
        assert_eq!(api.hits(&list_templates("a2-high-8")), 1);
        let calls = api.total_calls();
        lookup.template_nodes().await.unwrap();
        assert_eq!(api.total_calls(), calls);
    }
}

mod project_tests {
    use super::*;

    #[tokio::test]
    async fn missing_project_is_reported() {
        let cfg = ClusterConfig {
            project: None,
            ..test_config()
        };
        let lookup = lookup_with(cfg, RoutedApi::new([]));
        assert!(matches!(lookup.project(), Err(Error::MissingProject)));
        let err = lookup.instance_zones(None, None).await.unwrap_err();
        assert!(matches!(err, Error::MissingProject));
    }

    #[tokio::test]
    async fn metadata_project_scopes_requests_when_unconfigured() {
        let api = RoutedApi::new([(
            ApiRequest::AggregatedListInstances {
                project: "meta-p".to_string(),
                filter: "name=c0-*".to_string(),
                page_token: None,
            },
            Ok(instances_page(
                vec![("c0-n2s4-batch-0", "us-central1-a")],
                None,
            )),
        )]);
        let cfg = ClusterConfig {
            project: None,
            ..test_config()
        };
        let metadata = MetadataClient::new().unwrap();
        let lookup =
            Lookup::with_fallback_project(cfg, api, metadata, Some("meta-p".to_string()));

        assert_eq!(lookup.project().unwrap(), "meta-p");
        let zones = lookup.instance_zones(None, None).await.unwrap();
        assert_eq!(zones.len(), 1);
    }
}
