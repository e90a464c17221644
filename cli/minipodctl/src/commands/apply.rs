//! Apply command: create pods from a spec file.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use minipod_api::Pod;
use minipod_spec::SpecFile;

use crate::output::{print_success, OutputFormat};

use super::pods::print_pods;
use super::CommandContext;

#[derive(Debug, Args)]
pub struct ApplyCommand {
    /// Path to the spec file (YAML).
    #[arg(short = 'f', long = "file")]
    file: PathBuf,

    /// Node to schedule the pods on.
    #[arg(long, env = "MINIPOD_NODE_NAME")]
    node: String,
}

impl ApplyCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let spec_file = SpecFile::from_file(&self.file)
            .with_context(|| format!("Failed to load {}", self.file.display()))?;
        let client = ctx.client()?;

        let mut created: Vec<Pod> = Vec::new();
        for spec in spec_file.pod_specs() {
            let pod: Pod = client
                .post("/v1/pods", &[("nodename", self.node.as_str())], &spec)
                .await
                .with_context(|| format!("Failed to create pod for image {}", spec.container.image))?;
            created.push(pod);
        }

        if ctx.format == OutputFormat::Table {
            print_success(&format!(
                "Created {} pod(s) on node {}",
                created.len(),
                self.node
            ));
        }
        print_pods(&created, ctx.format);
        Ok(())
    }
}
