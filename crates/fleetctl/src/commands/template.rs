//! Instance template commands

use anyhow::Result;
use tabled::Tabled;

use fleet_lib::Lookup;

use crate::output::{format_gpus, format_mb, print_table, print_warning, OutputFormat};

/// Row for resolved template details
#[derive(Tabled)]
struct TemplateRow {
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
    #[tabled(rename = "Created")]
    created: String,
}

/// Row for node groups annotated with template details
#[derive(Tabled)]
struct TemplateNodeRow {
    #[tabled(rename = "Template")]
    template: String,
    #[tabled(rename = "Partition")]
    partition: String,
    #[tabled(rename = "Count")]
    count: u32,
    #[tabled(rename = "Machine Type")]
    machine_type: String,
    #[tabled(rename = "Usable Memory")]
    memory: String,
    #[tabled(rename = "GPUs")]
    gpus: String,
}

/// Show resolved details for one template
pub async fn show(lookup: &Lookup, template: &str, format: OutputFormat) -> Result<()> {
    let details = lookup.template_details(template).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*details)?),
        OutputFormat::Table => {
            let rows = vec![TemplateRow {
                template: details.name.clone(),
                machine_type: details.machine_type.clone(),
                cpus: details.machine.cpus,
                memory: format_mb(details.machine.memory_mb),
                gpus: format_gpus(details.machine.gpu_type.as_deref(), details.machine.gpu_count),
                created: details.creation_timestamp.to_rfc3339(),
            }];
            print_table(rows);
        }
    }
    Ok(())
}

/// List every node group by template with resolved details
pub async fn nodes(lookup: &Lookup, format: OutputFormat) -> Result<()> {
    let nodes = lookup.template_nodes().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(nodes)?),
        OutputFormat::Table => {
            if nodes.is_empty() {
                print_warning("No node groups declared");
                return Ok(());
            }
            let rows: Vec<TemplateNodeRow> = nodes
                .values()
                .flatten()
                .map(|node| TemplateNodeRow {
                    template: node.group.template.clone(),
                    partition: node.partition.clone(),
                    count: node.group.count,
                    machine_type: node.details.machine_type.clone(),
                    memory: format_mb(node.details.machine.memory_mb),
                    gpus: format_gpus(
                        node.details.machine.gpu_type.as_deref(),
                        node.details.machine.gpu_count,
                    ),
                })
                .collect();
            let total = rows.len();
            print_table(rows);
            println!("\nTotal: {} node groups", total);
        }
    }
    Ok(())
}
