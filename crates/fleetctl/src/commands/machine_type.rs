//! Machine type commands

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use fleet_lib::{Lookup, MachineShape};

use crate::output::{format_gpus, format_mb, print_table, OutputFormat};

/// Row for machine type specs alongside the derived usable shape
#[derive(Tabled)]
struct MachineTypeRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Zone")]
    zone: String,
    #[tabled(rename = "CPUs")]
    cpus: u32,
    #[tabled(rename = "Memory")]
    memory: String,
    #[tabled(rename = "Usable Memory")]
    usable_memory: String,
    #[tabled(rename = "GPUs")]
    gpus: String,
}

/// Show specs and the derived usable shape for a machine type
pub async fn get(
    lookup: &Lookup,
    name: &str,
    zone: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let details = lookup.machine_type(name, None, zone).await?;
    let shape = MachineShape::from_machine_type(&details);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "machineType": &*details,
                    "shape": shape,
                }))?
            );
        }
        OutputFormat::Table => {
            let rows = vec![MachineTypeRow {
                name: details.name.clone(),
                zone: details.zone.clone(),
                cpus: details.guest_cpus,
                memory: format_mb(details.memory_mb),
                usable_memory: format_mb(shape.memory_mb),
                gpus: format_gpus(shape.gpu_type.as_deref(), shape.gpu_count),
            }];
            print_table(rows);
        }
    }
    Ok(())
}
