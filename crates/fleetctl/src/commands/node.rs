//! Node name commands

use anyhow::Result;
use tabled::Tabled;

use fleet_lib::Lookup;

use crate::output::{format_gpus, format_mb, print_table, OutputFormat};

/// Row for parsed node names
#[derive(Tabled)]
struct NodeRow {
    #[tabled(rename = "Cluster")]
    cluster: String,
    #[tabled(rename = "Template")]
    template: String,
    #[tabled(rename = "Partition")]
    partition: String,
    #[tabled(rename = "Index")]
    index: u64,
}

/// Row for node-group declarations
#[derive(Tabled)]
struct GroupRow {
    #[tabled(rename = "Partition")]
    partition: String,
    #[tabled(rename = "Template")]
    template: String,
    #[tabled(rename = "Count")]
    count: u32,
    #[tabled(rename = "Mounts")]
    mounts: usize,
}

/// Row for resolved node details
#[derive(Tabled)]
struct DetailsRow {
    #[tabled(rename = "Node")]
    node: String,
    #[tabled(rename = "Template")]
    template: String,
    #[tabled(rename = "Machine Type")]
    machine_type: String,
    #[tabled(rename = "CPUs")]
    cpus: u32,
    #[tabled(rename = "Usable Memory")]
    memory: String,
    #[tabled(rename = "GPUs")]
    gpus: String,
}

/// Parse a node name into its grammar fields
pub fn parse(lookup: &Lookup, node: &str, format: OutputFormat) -> Result<()> {
    let id = lookup.parse_node_name(node)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&id)?),
        OutputFormat::Table => {
            let rows = vec![NodeRow {
                cluster: id.name,
                template: id.template,
                partition: id.partition,
                index: id.index,
            }];
            print_table(rows);
        }
    }
    Ok(())
}

/// Show the node-group declaration a node belongs to
pub fn config(lookup: &Lookup, node: &str, format: OutputFormat) -> Result<()> {
    let group = lookup.node_config(node)?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(group)?),
        OutputFormat::Table => {
            let rows = vec![GroupRow {
                partition: lookup.node_partition(node)?,
                template: group.template.clone(),
                count: group.count,
                mounts: group.network_storage.len(),
            }];
            print_table(rows);
        }
    }
    Ok(())
}

/// Show resolved template details for a node
pub async fn details(lookup: &Lookup, node: &str, format: OutputFormat) -> Result<()> {
    let details = lookup.node_template_details(node).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*details)?),
        OutputFormat::Table => {
            let rows = vec![DetailsRow {
                node: node.to_string(),
                template: details.name.clone(),
                machine_type: details.machine_type.clone(),
                cpus: details.machine.cpus,
                memory: format_mb(details.machine.memory_mb),
                gpus: format_gpus(details.machine.gpu_type.as_deref(), details.machine.gpu_count),
            }];
            print_table(rows);
        }
    }
    Ok(())
}

