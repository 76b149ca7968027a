//! Incident commands

use anyhow::Result;
use colored::Colorize;
use tabled::Tabled;

use crate::client::{ApiClient, Incident, IncidentDetail, OpenIncidentRequest};
use crate::output::{
    color_severity, color_status, format_timestamp, print_json, print_rows, print_success,
    print_warning, truncate_id, OutputFormat,
};

/// Row for incidents table
#[derive(Tabled)]
struct IncidentRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Severity")]
    severity: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Opened")]
    created_at: String,
    #[tabled(rename = "Actions")]
    actions: usize,
}

/// Row for an incident's response timeline
#[derive(Tabled)]
struct ActionRow {
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Outcome")]
    outcome: String,
    #[tabled(rename = "Detail")]
    detail: String,
}

/// List incidents
pub async fn list_incidents(client: &ApiClient, active: bool, format: OutputFormat) -> Result<()> {
    let path = if active {
        "api/v1/incidents?active=true"
    } else {
        "api/v1/incidents"
    };
    let incidents: Vec<Incident> = client.get(path).await?;

    match format {
        OutputFormat::Json => print_json(&incidents)?,
        OutputFormat::Table => {
            if incidents.is_empty() {
                print_warning("No incidents found");
                return Ok(());
            }
            let count = incidents.len();
            let rows = incidents
                .into_iter()
                .map(|i| IncidentRow {
                    id: truncate_id(&i.id),
                    kind: i.kind,
                    severity: color_severity(&i.severity),
                    status: color_status(&i.status),
                    title: i.title,
                    created_at: format_timestamp(&i.created_at),
                    actions: i.actions.len(),
                })
                .collect();
            print_rows::<IncidentRow>(rows);
            println!("\nTotal: {} incidents", count);
        }
    }
    Ok(())
}

/// Show one incident with its timeline, status history and recovery attempts
pub async fn show_incident(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let detail: IncidentDetail = client.get(&format!("api/v1/incidents/{}", id)).await?;

    if let OutputFormat::Json = format {
        return print_json(&detail);
    }

    let incident = &detail.incident;
    println!("{}", "Incident".bold());
    println!("{}", "=".repeat(60));
    println!("ID:        {}", incident.id.cyan());
    println!("Title:     {}", incident.title);
    println!("Type:      {}", incident.kind);
    println!("Severity:  {}", color_severity(&incident.severity));
    println!("Status:    {}", color_status(&incident.status));
    if let Some(target) = &incident.target {
        println!("Target:    {}", target);
    }
    println!("Opened:    {}", format_timestamp(&incident.created_at));
    if let Some(resolved) = &incident.resolved_at {
        println!("Resolved:  {}", format_timestamp(resolved));
    }
    println!();

    if incident.actions.is_empty() {
        println!("{}", "No response actions yet".dimmed());
    } else {
        println!("{}", "Response Timeline".bold());
        let rows = incident
            .actions
            .iter()
            .map(|a| ActionRow {
                at: format_timestamp(&a.timestamp),
                action: a.action.clone(),
                outcome: color_status(&a.outcome),
                detail: a.detail.clone().unwrap_or_default(),
            })
            .collect();
        print_rows::<ActionRow>(rows);
    }

    if !detail.history.is_empty() {
        println!("\n{}", "Status History".bold());
        for change in &detail.history {
            let from = change.from.as_deref().unwrap_or("-");
            println!(
                "  #{:<4} {}  {} -> {}",
                change.seq,
                format_timestamp(&change.at),
                from,
                color_status(&change.to)
            );
        }
    }

    if !detail.attempts.is_empty() {
        println!("\n{}", "Recovery Attempts".bold());
        for attempt in &detail.attempts {
            let outcome = if attempt.success {
                "succeeded".green().to_string()
            } else if attempt.timed_out {
                "timed out".red().to_string()
            } else {
                "failed".red().to_string()
            };
            println!(
                "  {}  {}  {}",
                format_timestamp(&attempt.completed_at),
                attempt.procedure,
                outcome
            );
        }
    }

    Ok(())
}

/// Open an incident by hand
pub async fn open_incident(
    client: &ApiClient,
    request: OpenIncidentRequest,
    format: OutputFormat,
) -> Result<()> {
    let incident: Incident = client.post("api/v1/incidents", &request).await?;

    match format {
        OutputFormat::Json => print_json(&incident)?,
        OutputFormat::Table => print_success(&format!(
            "Opened {} incident {} ({})",
            incident.kind, incident.id, incident.severity
        )),
    }
    Ok(())
}

/// Mark an incident resolved
pub async fn resolve_incident(client: &ApiClient, id: &str, format: OutputFormat) -> Result<()> {
    let incident: Incident = client
        .post_empty(&format!("api/v1/incidents/{}/resolve", id))
        .await?;

    match format {
        OutputFormat::Json => print_json(&incident)?,
        OutputFormat::Table => print_success(&format!("Incident {} resolved", incident.id)),
    }
    Ok(())
}
