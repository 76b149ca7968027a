//! Recovery commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, ApiError, RecoverRequest, RecoveryAttempt};
use crate::output::{
    color_status, format_timestamp, print_error, print_info, print_json, print_rows, print_success,
    print_warning, truncate_id, OutputFormat,
};

/// Row for attempts table
#[derive(Tabled)]
struct AttemptRow {
    #[tabled(rename = "Incident")]
    incident: String,
    #[tabled(rename = "Procedure")]
    procedure: String,
    #[tabled(rename = "Trigger")]
    trigger: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Completed")]
    completed_at: String,
    #[tabled(rename = "Error")]
    error: String,
}

fn outcome(attempt: &RecoveryAttempt) -> &'static str {
    if attempt.success {
        "succeeded"
    } else if attempt.timed_out {
        "timed_out"
    } else {
        "failed"
    }
}

/// Trigger recovery for an incident, or for the oldest unresolved one
pub async fn recover(client: &ApiClient, incident: Option<String>, format: OutputFormat) -> Result<()> {
    if let OutputFormat::Table = format {
        print_info("Running recovery procedure...");
    }
    let request = RecoverRequest {
        incident_id: incident,
    };

    let attempt: RecoveryAttempt = match client.post("api/v1/recovery", &request).await {
        Ok(attempt) => attempt,
        Err(err) => match err.downcast_ref::<ApiError>() {
            // A timed-out attempt still carries its record
            Some(api) if api.status == 504 => serde_json::from_str(&api.body)?,
            _ => return Err(err),
        },
    };

    match format {
        OutputFormat::Json => print_json(&attempt)?,
        OutputFormat::Table => {
            let summary = format!(
                "{} for incident {}",
                attempt.procedure, attempt.incident_id
            );
            if attempt.success {
                print_success(&format!("Recovery succeeded: {}", summary));
            } else if attempt.timed_out {
                print_error(&format!("Recovery timed out: {}", summary));
            } else {
                print_error(&format!(
                    "Recovery failed: {} ({})",
                    summary,
                    attempt.error.as_deref().unwrap_or("unknown error")
                ));
            }
        }
    }
    Ok(())
}

/// List recovery attempts
pub async fn list_attempts(
    client: &ApiClient,
    incident: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = match &incident {
        Some(id) => format!("api/v1/recovery/attempts?incident={}", id),
        None => "api/v1/recovery/attempts".to_string(),
    };
    let attempts: Vec<RecoveryAttempt> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&attempts)?,
        OutputFormat::Table => {
            if attempts.is_empty() {
                print_warning("No recovery attempts recorded");
                return Ok(());
            }
            let count = attempts.len();
            let rows = attempts
                .iter()
                .map(|a| AttemptRow {
                    incident: truncate_id(&a.incident_id),
                    procedure: a.procedure.clone(),
                    trigger: if a.automatic { "auto" } else { "manual" }.to_string(),
                    outcome: color_status(outcome(a)),
                    completed_at: format_timestamp(&a.completed_at),
                    error: a.error.clone().unwrap_or_default(),
                })
                .collect();
            print_rows::<AttemptRow>(rows);
            println!("\nTotal: {} attempts", count);
        }
    }
    Ok(())
}
