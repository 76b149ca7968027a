//! Output formatting utilities

use clap::ValueEnum;
use colored::Colorize;
use serde::Serialize;
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

/// Print a value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print rows as a rounded table
pub fn print_rows<T: Tabled>(rows: Vec<T>) {
    let table = Table::new(rows).with(Style::rounded()).to_string();
    println!("{}", table);
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Color a health, breaker or incident status
pub fn color_status(status: &str) -> String {
    match status.to_lowercase().as_str() {
        "healthy" | "closed" | "resolved" | "succeeded" => status.green().to_string(),
        "degraded" | "half_open" | "in_progress" | "skipped" => status.yellow().to_string(),
        "critical" | "open" | "failed" | "timed_out" => status.red().to_string(),
        _ => status.to_string(),
    }
}

/// Color a severity level
pub fn color_severity(severity: &str) -> String {
    match severity.to_lowercase().as_str() {
        "low" => severity.normal().to_string(),
        "medium" => severity.yellow().to_string(),
        "high" => severity.red().to_string(),
        "critical" => severity.red().bold().to_string(),
        _ => severity.to_string(),
    }
}

/// Format an RFC 3339 timestamp for display
pub fn format_timestamp(ts: &str) -> String {
    chrono::DateTime::parse_from_rfc3339(ts)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| ts.to_string())
}

/// Format a fraction as a percentage
pub fn format_percent(fraction: f64) -> String {
    format!("{:.1}%", fraction * 100.0)
}

/// Shorten a UUID to its first segment
pub fn truncate_id(id: &str) -> String {
    id.split('-').next().unwrap_or(id).to_string()
}
