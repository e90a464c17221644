//! Health command.

use anyhow::Result;
use colored::Colorize;
use serde::{Deserialize, Serialize};

use crate::error::CliError;
use crate::output::{print_json, OutputFormat};

use super::CommandContext;

/// Readiness response from the apiserver.
#[derive(Debug, Serialize, Deserialize)]
struct HealthResponse {
    status: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    watchers: Option<usize>,
}

pub async fn run(ctx: CommandContext) -> Result<()> {
    let client = ctx.client()?;

    let health: HealthResponse = match client.get("/readyz", &[]).await {
        Ok(health) => health,
        Err(CliError::Api { status: 503, .. }) => HealthResponse {
            status: "shutting_down".to_string(),
            version: None,
            watchers: None,
        },
        Err(e) => return Err(e.into()),
    };

    match ctx.format {
        OutputFormat::Json => print_json(&health),
        OutputFormat::Table => {
            let status = if health.status == "ok" {
                health.status.green().bold()
            } else {
                health.status.yellow().bold()
            };
            println!("{} {}", "Apiserver:".bold(), status);
            if let Some(version) = &health.version {
                println!("Version:   {version}");
            }
            if let Some(watchers) = health.watchers {
                println!("Watchers:  {watchers}");
            }
        }
    }
    Ok(())
}
