//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
}

/// Print rows as a rounded table
pub fn print_table<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format a mebibyte count as a human-readable string
pub fn format_mb(mb: u64) -> String {
    if mb >= 1024 {
        format!("{:.1}Gi", mb as f64 / 1024.0)
    } else {
        format!("{}Mi", mb)
    }
}

/// Accelerator column text
pub fn format_gpus(gpu_type: Option<&str>, count: u32) -> String {
    match gpu_type {
        Some(gpu) if count > 0 => format!("{}x {}", count, gpu),
        _ => "-".to_string(),
    }
}

/// Color an operation status based on how terminal it is
pub fn color_status(status: &str) -> String {
    match status {
        "DONE" => status.green().to_string(),
        "RUNNING" => status.yellow().to_string(),
        "PENDING" => status.blue().to_string(),
        _ => status.to_string(),
    }
}
