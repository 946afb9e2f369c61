//! Cluster instance commands

use anyhow::Result;
use serde_json::json;
use tabled::Tabled;

use fleet_lib::Lookup;

use crate::output::{print_table, print_warning, OutputFormat};

/// Row for instance zone listings
#[derive(Tabled)]
struct InstanceRow {
    #[tabled(rename = "Instance")]
    instance: String,
    #[tabled(rename = "Zone")]
    zone: String,
}

/// List cluster instances and the zones holding them
pub async fn zones(lookup: &Lookup, instance: Option<&str>, format: OutputFormat) -> Result<()> {
    if let Some(name) = instance {
        let Some(zone) = lookup.instance_zone(name, None, None).await? else {
            print_warning(&format!("Instance {} not found in the cluster", name));
            return Ok(());
        };
        match format {
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&json!({ "instance": name, "zone": zone }))?
                );
            }
            OutputFormat::Table => print_table(vec![InstanceRow {
                instance: name.to_string(),
                zone,
            }]),
        }
        return Ok(());
    }

    let zones = lookup.instance_zones(None, None).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&*zones)?),
        OutputFormat::Table => {
            if zones.is_empty() {
                print_warning("No instances found");
                return Ok(());
            }
            let rows: Vec<InstanceRow> = zones
                .iter()
                .map(|(instance, zone)| InstanceRow {
                    instance: instance.clone(),
                    zone: zone.clone(),
                })
                .collect();
            print_table(rows);
            println!("\nTotal: {} instances", zones.len());
        }
    }
    Ok(())
}
