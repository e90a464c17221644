//! CLI commands.

mod apply;
mod health;
mod pods;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::client::ApiClient;
use crate::output::OutputFormat;

/// minipod CLI - Schedule and inspect pods.
#[derive(Debug, Parser)]
#[command(name = "minipodctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Output format (table or json).
    #[arg(long, global = true, default_value = "table")]
    format: String,

    /// Apiserver base URL.
    #[arg(
        long,
        global = true,
        env = "MINIPOD_APISERVER_URL",
        default_value = "http://127.0.0.1:8080"
    )]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Create pods from a spec file.
    Apply(apply::ApplyCommand),

    /// List pods, or show one pod.
    Get(pods::GetCommand),

    /// Delete a pod.
    Delete(pods::DeleteCommand),

    /// Check apiserver health.
    Health,
}

impl Cli {
    /// Run the CLI command.
    pub async fn run(self) -> Result<()> {
        let ctx = CommandContext {
            format: OutputFormat::parse(&self.format),
            server: self.server,
        };

        match self.command {
            Commands::Apply(cmd) => cmd.run(ctx).await,
            Commands::Get(cmd) => cmd.run(ctx).await,
            Commands::Delete(cmd) => cmd.run(ctx).await,
            Commands::Health => health::run(ctx).await,
        }
    }
}

/// Context passed to all commands.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub format: OutputFormat,
    pub server: String,
}

impl CommandContext {
    pub fn client(&self) -> Result<ApiClient> {
        ApiClient::new(&self.server)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_apply() {
        let cli = Cli::try_parse_from([
            "minipodctl",
            "--server",
            "http://10.0.0.1:8080",
            "apply",
            "-f",
            "pods.yaml",
            "--node",
            "node-1",
        ])
        .unwrap();
        assert_eq!(cli.server, "http://10.0.0.1:8080");
        assert!(matches!(cli.command, Commands::Apply(_)));
    }

    #[test]
    fn test_delete_requires_uid() {
        assert!(Cli::try_parse_from(["minipodctl", "delete", "--node", "n"]).is_err());
    }

    #[test]
    fn test_global_format_after_subcommand() {
        let cli = Cli::try_parse_from(["minipodctl", "get", "--format", "json"]).unwrap();
        assert_eq!(OutputFormat::parse(&cli.format), OutputFormat::Json);
    }
}
