//! Long-running operation commands

use anyhow::{Context, Result};
use tabled::Tabled;

use fleet_lib::api::{execute_with_backoff, ApiRequest};
use fleet_lib::{ComputeApi, Operation, OperationPoller, OperationScope, OperationStatus};

use crate::output::{color_status, print_success, print_table, print_warning, OutputFormat};

/// Row for operation listings
#[derive(Tabled)]
struct OperationRow {
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Scope")]
    scope: String,
    #[tabled(rename = "Group")]
    group: String,
}

fn operation_stub(name: &str, zone: Option<String>, region: Option<String>) -> Operation {
    Operation {
        name: name.to_string(),
        zone,
        region,
        status: OperationStatus::Unknown,
        operation_group_id: None,
    }
}

fn status_text(status: OperationStatus) -> &'static str {
    match status {
        OperationStatus::Pending => "PENDING",
        OperationStatus::Running => "RUNNING",
        OperationStatus::Done => "DONE",
        OperationStatus::Unknown => "UNKNOWN",
    }
}

fn scope_text(operation: &Operation) -> String {
    match operation.scope() {
        OperationScope::Zone(zone) => format!("zone/{}", zone),
        OperationScope::Region(region) => format!("region/{}", region),
        OperationScope::Global => "global".to_string(),
    }
}

fn operation_row(operation: &Operation) -> OperationRow {
    OperationRow {
        name: operation.name.clone(),
        status: color_status(status_text(operation.status)),
        scope: scope_text(operation),
        group: operation
            .operation_group_id
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    }
}

/// Poll one operation until it is done
pub async fn wait(
    poller: &OperationPoller,
    name: &str,
    zone: Option<String>,
    region: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let finished = poller.wait_one(&operation_stub(name, zone, region)).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&finished)?),
        OutputFormat::Table => {
            print_success(&format!("Operation {} finished", finished.name));
            print_table(vec![operation_row(&finished)]);
        }
    }
    Ok(())
}

/// List sibling operations sharing an operation group
pub async fn group(
    api: &dyn ComputeApi,
    poller: &OperationPoller,
    project: &str,
    name: &str,
    zone: Option<String>,
    region: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let stub = operation_stub(name, zone, region);
    let request = ApiRequest::ListOperations {
        project: project.to_string(),
        scope: stub.scope(),
        filter: format!("name={}", name),
    };
    let operation = execute_with_backoff(api, &request)
        .await?
        .into_operations()?
        .items
        .into_iter()
        .next()
        .with_context(|| format!("operation {} not found", name))?;

    let siblings = poller.group_operations(&operation).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&siblings)?),
        OutputFormat::Table => {
            if siblings.is_empty() {
                print_warning("No operations in the group");
                return Ok(());
            }
            let total = siblings.len();
            print_table(siblings.iter().map(operation_row).collect());
            println!("\nTotal: {} operations", total);
        }
    }
    Ok(())
}
