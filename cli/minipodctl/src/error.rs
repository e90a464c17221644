//! Error handling and display for the CLI.

use colored::Colorize;
use thiserror::Error;

/// CLI-specific errors.
#[derive(Debug, Error)]
pub enum CliError {
    #[error("API error: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl CliError {
    pub fn api(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Print an error in a user-friendly format.
pub fn print_error(err: &anyhow::Error) {
    eprintln!("{} {}", "Error:".red().bold(), err);

    if let Some(cli_err) = err.downcast_ref::<CliError>() {
        match cli_err {
            CliError::Api { code, .. } if code == "invalid_spec" => {
                eprintln!(
                    "\n{}",
                    "Hint: Check the image and port fields of the spec file.".yellow()
                );
            }
            CliError::Api { code, .. } if code == "nodename_required" => {
                eprintln!(
                    "\n{}",
                    "Hint: Pass --node or set MINIPOD_NODE_NAME.".yellow()
                );
            }
            CliError::Api { status: 503, .. } => {
                eprintln!("\n{}", "Hint: The apiserver is shutting down.".yellow());
            }
            CliError::Network(_) => {
                eprintln!(
                    "\n{}",
                    "Hint: Check that the apiserver is running and --server is correct.".yellow()
                );
            }
            _ => {}
        }
    }
}
