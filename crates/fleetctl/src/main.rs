//! Fleet control CLI
//!
//! A command-line tool for resolving node names, inspecting templates,
//! machine types and instances, and waiting on control-plane
//! operations.

mod commands;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use fleet_lib::{
    ClusterConfig, ComputeApi, Lookup, MetadataClient, MetadataTokenProvider, OperationPoller,
    RestComputeApi, StaticTokenProvider, TokenProvider,
};

use commands::{instance, machine_type, node, operation, template};

/// Fleet control CLI
#[derive(Parser)]
#[command(name = "fleetctl")]
#[command(author, version, about = "CLI for the cluster control plane", long_about = None)]
pub struct Cli {
    /// Cluster configuration file
    #[arg(
        long,
        short,
        env = "FLEET_CONFIG",
        default_value = "/etc/fleet/config.yaml"
    )]
    pub config: PathBuf,

    /// Control-plane base URL override
    #[arg(long, env = "FLEET_API_URL")]
    pub api_url: Option<String>,

    /// Bearer token (defaults to instance metadata credentials)
    #[arg(long, env = "FLEET_API_TOKEN")]
    pub token: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Parse and resolve node names
    #[command(subcommand)]
    Node(NodeCommands),

    /// Inspect instance templates
    #[command(subcommand)]
    Template(TemplateCommands),

    /// Inspect cluster instances
    #[command(subcommand)]
    Instance(InstanceCommands),

    /// Inspect machine types
    #[command(subcommand)]
    MachineType(MachineTypeCommands),

    /// Wait on and inspect long-running operations
    #[command(subcommand)]
    Operation(OperationCommands),
}

#[derive(Subcommand)]
pub enum NodeCommands {
    /// Parse a node name into its fields
    Parse {
        /// Node name, `<cluster>-<template>-<partition>-<index>`
        node: String,
    },

    /// Show the node-group declaration a node belongs to
    Config {
        /// Node name
        node: String,
    },

    /// Show resolved template details for a node
    Details {
        /// Node name
        node: String,
    },
}

#[derive(Subcommand)]
pub enum TemplateCommands {
    /// Show resolved details for one template
    Show {
        /// Template token as it appears in node names
        template: String,
    },

    /// List every node group by template with resolved details
    Nodes,
}

#[derive(Subcommand)]
pub enum InstanceCommands {
    /// List cluster instances and the zones holding them
    Zones {
        /// Show only this instance
        #[arg(long, short)]
        instance: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum MachineTypeCommands {
    /// Show specs and the derived usable shape for a machine type
    Get {
        /// Machine type name
        machine_type: String,

        /// Zone to read from; first aggregated entry when omitted
        #[arg(long, short)]
        zone: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum OperationCommands {
    /// Poll one operation until it is done
    Wait {
        /// Operation name
        operation: String,

        /// Zone of a zonal operation
        #[arg(long, conflicts_with = "region")]
        zone: Option<String>,

        /// Region of a regional operation
        #[arg(long)]
        region: Option<String>,
    },

    /// List sibling operations sharing an operation group
    Group {
        /// Operation name
        operation: String,

        /// Zone of a zonal operation
        #[arg(long, conflicts_with = "region")]
        zone: Option<String>,

        /// Region of a regional operation
        #[arg(long)]
        region: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let cfg = ClusterConfig::load(&cli.config)?;
    if let Some(cred_path) = &cfg.google_app_cred_path {
        std::env::set_var("GOOGLE_APPLICATION_CREDENTIALS", cred_path);
    }

    let tokens: Arc<dyn TokenProvider> = match &cli.token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.clone())),
        None => Arc::new(MetadataTokenProvider::new(MetadataClient::new()?)),
    };
    let mut builder = RestComputeApi::builder().token_provider(tokens);
    if let Some(url) = &cli.api_url {
        builder = builder.base_url(url.clone());
    }
    let api: Arc<dyn ComputeApi> = Arc::new(builder.build()?);
    let lookup = Lookup::new(cfg, Arc::clone(&api)).await?;
    debug!(
        config = %cli.config.display(),
        cluster = %lookup.config().cluster_name,
        "configuration loaded"
    );

    match cli.command {
        Commands::Node(cmd) => match cmd {
            NodeCommands::Parse { node } => node::parse(&lookup, &node, cli.format)?,
            NodeCommands::Config { node } => node::config(&lookup, &node, cli.format)?,
            NodeCommands::Details { node } => node::details(&lookup, &node, cli.format).await?,
        },
        Commands::Template(cmd) => match cmd {
            TemplateCommands::Show { template } => {
                template::show(&lookup, &template, cli.format).await?;
            }
            TemplateCommands::Nodes => template::nodes(&lookup, cli.format).await?,
        },
        Commands::Instance(cmd) => match cmd {
            InstanceCommands::Zones { instance } => {
                instance::zones(&lookup, instance.as_deref(), cli.format).await?;
            }
        },
        Commands::MachineType(cmd) => match cmd {
            MachineTypeCommands::Get { machine_type: name, zone } => {
                machine_type::get(&lookup, &name, zone.as_deref(), cli.format).await?;
            }
        },
        Commands::Operation(cmd) => {
            let project = lookup.project()?.to_string();
            let poller = OperationPoller::new(Arc::clone(&api), project.clone());
            match cmd {
                OperationCommands::Wait { operation, zone, region } => {
                    operation::wait(&poller, &operation, zone, region, cli.format).await?;
                }
                OperationCommands::Group { operation, zone, region } => {
                    operation::group(
                        api.as_ref(),
                        &poller,
                        &project,
                        &operation,
                        zone,
                        region,
                        cli.format,
                    )
                    .await?;
                }
            }
        }
    }

    Ok(())
}
