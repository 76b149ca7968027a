//! guardctl - operator CLI for the resilience control plane
//!
//! Talks to a running agent's HTTP API to inspect health, breakers and
//! incidents, and to trigger recovery by hand.

mod client;
mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{breakers, incidents, recovery, status};

/// Resilience control plane CLI
#[derive(Parser)]
#[command(name = "guardctl")]
#[command(author, version, about = "CLI for the resilience control plane", long_about = None)]
pub struct Cli {
    /// Agent API URL (falls back to ~/.config/guardctl/config.json, then http://localhost:8080)
    #[arg(long, env = "GUARDCTL_API_URL")]
    pub api_url: Option<String>,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show health, breakers and incident counts
    Status,

    /// Circuit breaker commands
    #[command(subcommand)]
    Breakers(BreakerCommands),

    /// Show the breaker transition log
    Transitions {
        /// Only transitions of this dependency
        #[arg(long, short)]
        dependency: Option<String>,
    },

    /// Incident commands
    #[command(subcommand)]
    Incidents(IncidentCommands),

    /// Run recovery for an incident (the oldest unresolved one by default)
    Recover {
        /// Incident ID
        #[arg(long, short)]
        incident: Option<String>,
    },

    /// List recovery attempts
    Attempts {
        /// Only attempts for this incident
        #[arg(long, short)]
        incident: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum BreakerCommands {
    /// List breakers and their state
    List,

    /// Force a breaker closed
    Reset {
        /// Dependency ID
        dependency: String,
    },
}

#[derive(Subcommand)]
pub enum IncidentCommands {
    /// List incidents
    List {
        /// Only unresolved incidents
        #[arg(long)]
        active: bool,
    },

    /// Show an incident with its timeline
    Show {
        /// Incident ID
        id: String,
    },

    /// Open an incident by hand
    Open {
        /// resource-exhaustion, dependency-failure, security-event or anomaly
        #[arg(long = "type")]
        kind: String,

        /// low, medium, high or critical
        #[arg(long)]
        severity: String,

        #[arg(long)]
        title: Option<String>,

        /// Dependency the incident concerns
        #[arg(long)]
        target: Option<String>,
    },

    /// Mark an incident resolved
    Resolve {
        /// Incident ID
        id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_config = config::Config::load()?;
    let api_url = config::resolve_api_url(cli.api_url, &file_config);
    let client = client::ApiClient::new(&api_url)?;
    let format = cli.format;

    match cli.command {
        Commands::Status => status::show_status(&client, format).await?,
        Commands::Breakers(cmd) => match cmd {
            BreakerCommands::List => breakers::list_breakers(&client, format).await?,
            BreakerCommands::Reset { dependency } => {
                breakers::reset_breaker(&client, &dependency, format).await?
            }
        },
        Commands::Transitions { dependency } => {
            breakers::list_transitions(&client, dependency, format).await?
        }
        Commands::Incidents(cmd) => match cmd {
            IncidentCommands::List { active } => {
                incidents::list_incidents(&client, active, format).await?
            }
            IncidentCommands::Show { id } => incidents::show_incident(&client, &id, format).await?,
            IncidentCommands::Open {
                kind,
                severity,
                title,
                target,
            } => {
                let request = client::OpenIncidentRequest {
                    kind,
                    severity,
                    title,
                    target,
                };
                incidents::open_incident(&client, request, format).await?
            }
            IncidentCommands::Resolve { id } => {
                incidents::resolve_incident(&client, &id, format).await?
            }
        },
        Commands::Recover { incident } => recovery::recover(&client, incident, format).await?,
        Commands::Attempts { incident } => {
            recovery::list_attempts(&client, incident, format).await?
        }
    }

    Ok(())
}
