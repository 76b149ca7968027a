//! Circuit breaker commands

use anyhow::Result;
use tabled::Tabled;

use crate::client::{ApiClient, Breaker, Transition};
use crate::output::{
    color_status, format_timestamp, print_json, print_rows, print_success, print_warning,
    OutputFormat,
};

/// Row for breakers table
#[derive(Tabled)]
struct BreakerRow {
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "State")]
    state: String,
    #[tabled(rename = "Failures")]
    failures: u32,
    #[tabled(rename = "Probe OK")]
    successes: u32,
    #[tabled(rename = "Since")]
    since: String,
    #[tabled(rename = "Probation")]
    probation: String,
}

/// Row for transitions table
#[derive(Tabled)]
struct TransitionRow {
    #[tabled(rename = "Seq")]
    seq: u64,
    #[tabled(rename = "At")]
    at: String,
    #[tabled(rename = "Dependency")]
    dependency: String,
    #[tabled(rename = "From")]
    from: String,
    #[tabled(rename = "To")]
    to: String,
    #[tabled(rename = "Cause")]
    cause: String,
}

pub(crate) fn print_breakers(breakers: &[Breaker]) {
    let rows = breakers
        .iter()
        .map(|b| BreakerRow {
            dependency: b.dependency.clone(),
            state: color_status(&b.state),
            failures: b.failures,
            successes: b.successes,
            since: format_timestamp(&b.last_transition),
            probation: if b.probation { "yes" } else { "-" }.to_string(),
        })
        .collect();
    print_rows::<BreakerRow>(rows);
}

/// List every known breaker
pub async fn list_breakers(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let breakers: Vec<Breaker> = client.get("api/v1/breakers").await?;

    match format {
        OutputFormat::Json => print_json(&breakers)?,
        OutputFormat::Table => {
            if breakers.is_empty() {
                print_warning("No breakers yet");
                return Ok(());
            }
            print_breakers(&breakers);
        }
    }
    Ok(())
}

/// Force a breaker closed
pub async fn reset_breaker(client: &ApiClient, dependency: &str, format: OutputFormat) -> Result<()> {
    let path = format!("api/v1/breakers/{}/reset", dependency);
    let transition: Transition = client.post_empty(&path).await?;

    match format {
        OutputFormat::Json => print_json(&transition)?,
        OutputFormat::Table => print_success(&format!(
            "Breaker for {} reset ({} -> {})",
            transition.dependency, transition.from, transition.to
        )),
    }
    Ok(())
}

/// Show the transition audit log
pub async fn list_transitions(
    client: &ApiClient,
    dependency: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let path = match &dependency {
        Some(dep) => format!("api/v1/transitions?dependency={}", dep),
        None => "api/v1/transitions".to_string(),
    };
    let transitions: Vec<Transition> = client.get(&path).await?;

    match format {
        OutputFormat::Json => print_json(&transitions)?,
        OutputFormat::Table => {
            if transitions.is_empty() {
                print_warning("No transitions recorded");
                return Ok(());
            }
            let count = transitions.len();
            let rows = transitions
                .into_iter()
                .map(|t| TransitionRow {
                    seq: t.seq,
                    at: format_timestamp(&t.at),
                    dependency: t.dependency,
                    from: color_status(&t.from),
                    to: color_status(&t.to),
                    cause: t.cause,
                })
                .collect();
            print_rows::<TransitionRow>(rows);
            println!("\nTotal: {} transitions", count);
        }
    }
    Ok(())
}
