//! Control plane overview

use anyhow::Result;
use colored::Colorize;

use crate::client::{ApiClient, PlaneStatus};
use crate::commands::breakers::print_breakers;
use crate::output::{color_status, format_percent, format_timestamp, print_json, print_warning, OutputFormat};

/// Show health, breakers and incident counts
pub async fn show_status(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let status: PlaneStatus = client.get("api/v1/status").await?;

    if let OutputFormat::Json = format {
        return print_json(&status);
    }

    println!("{}", "Control Plane Status".bold());
    println!("{}", "=".repeat(60));
    println!("Health:            {}", color_status(&status.health.status));
    if !status.health.breached.is_empty() {
        println!("Breached:          {}", status.health.breached.join(", ").red());
    }
    match &status.health.latest {
        Some(sample) => {
            println!("Last sample:       {}", format_timestamp(&sample.timestamp));
            println!("  CPU:             {}", format_percent(sample.cpu));
            println!("  Memory:          {}", format_percent(sample.memory));
            println!("  Error rate:      {}", format_percent(sample.error_rate));
            println!("  Response time:   {:.1} ms", sample.avg_response_time_ms);
            println!("  Requests:        {}", sample.request_count);
            for (dependency, health) in &sample.dependencies {
                println!(
                    "  {:<16} {} errors, {:.1} ms over {} requests",
                    dependency,
                    format_percent(health.error_rate),
                    health.avg_response_time_ms,
                    health.request_count
                );
            }
        }
        None => println!("Last sample:       {}", "none yet".dimmed()),
    }
    println!(
        "Samples retained:  {}/{} ({} evicted)",
        status.health.ring.samples, status.health.ring.capacity, status.health.ring.evicted
    );
    println!("Active incidents:  {}", status.active_incidents);
    println!("Recovery attempts: {}", status.recovery_attempts);
    if status.rate_limiter_degraded {
        print_warning("Rate limiter cannot reach its counter store");
    }
    println!();

    if status.breakers.is_empty() {
        println!("{}", "No dependencies called yet".dimmed());
    } else {
        print_breakers(&status.breakers);
    }

    Ok(())
}
