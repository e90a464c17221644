//! Pod commands.

use anyhow::Result;
use clap::Args;
use minipod_api::Pod;
use tabled::Tabled;
use uuid::Uuid;

use crate::error::CliError;
use crate::output::{print_json, print_output, print_success, OutputFormat};

use super::CommandContext;

#[derive(Debug, Args)]
pub struct GetCommand {
    /// Only pods scheduled on this node.
    #[arg(long, env = "MINIPOD_NODE_NAME")]
    node: Option<String>,

    /// Show a single pod. Requires --node.
    #[arg(long, requires = "node")]
    uid: Option<Uuid>,
}

#[derive(Debug, Args)]
pub struct DeleteCommand {
    /// Node the pod is scheduled on.
    #[arg(long, env = "MINIPOD_NODE_NAME")]
    node: String,

    /// Pod UID.
    #[arg(long)]
    uid: Uuid,
}

/// One table row per pod.
#[derive(Debug, Clone, Tabled)]
pub(crate) struct PodRow {
    #[tabled(rename = "UID")]
    uid: String,

    #[tabled(rename = "Node")]
    node: String,

    #[tabled(rename = "Image")]
    image: String,

    #[tabled(rename = "Ports")]
    ports: String,

    #[tabled(rename = "State")]
    state: String,
}

impl From<&Pod> for PodRow {
    fn from(pod: &Pod) -> Self {
        let ports = pod
            .spec
            .container
            .ports
            .iter()
            .map(|p| {
                if p.hostport.is_empty() {
                    p.containerport.clone()
                } else {
                    format!("{}:{}", p.hostport, p.containerport)
                }
            })
            .collect::<Vec<_>>()
            .join(",");

        Self {
            uid: pod.uid.to_string(),
            node: pod.nodename.clone(),
            image: pod.image().to_string(),
            ports: if ports.is_empty() { "-".to_string() } else { ports },
            state: pod.state.to_string(),
        }
    }
}

pub(crate) fn print_pods(pods: &[Pod], format: OutputFormat) {
    let rows: Vec<PodRow> = pods.iter().map(PodRow::from).collect();
    print_output(&rows, pods, format);
}

impl GetCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;

        let pods: Vec<Pod> = match (self.node.as_deref(), self.uid) {
            (Some(node), Some(uid)) => {
                let uid = uid.to_string();
                let pod: Pod = client
                    .get("/v1/pods", &[("nodename", node), ("uid", &uid)])
                    .await
                    .map_err(|e| match e {
                        CliError::Api { status: 404, .. } => {
                            CliError::NotFound(format!("Pod '{uid}' not found on node '{node}'"))
                        }
                        other => other,
                    })?;
                vec![pod]
            }
            (Some(node), None) => client.get("/v1/pods", &[("nodename", node)]).await?,
            (None, _) => client.get("/v1/pods", &[]).await?,
        };

        print_pods(&pods, ctx.format);
        Ok(())
    }
}

impl DeleteCommand {
    pub async fn run(self, ctx: CommandContext) -> Result<()> {
        let client = ctx.client()?;

        let pod: Pod = client
            .delete(
                &format!("/v1/pods/{}", self.uid),
                &[("nodename", self.node.as_str())],
            )
            .await
            .map_err(|e| match e {
                CliError::Api { status: 404, .. } => CliError::NotFound(format!(
                    "Pod '{}' not found on node '{}'",
                    self.uid, self.node
                )),
                other => other,
            })?;

        match ctx.format {
            OutputFormat::Table => print_success(&format!("Deleted pod {}", pod.uid)),
            OutputFormat::Json => print_json(&pod),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use minipod_api::{Container, PodSpec, Port};

    #[test]
    fn test_pod_row() {
        let pod = Pod::new(
            "node-1",
            PodSpec {
                container: Container {
                    image: "nginx".to_string(),
                    ports: vec![
                        Port {
                            hostport: "8080".to_string(),
                            containerport: "80".to_string(),
                        },
                        Port {
                            hostport: String::new(),
                            containerport: "443".to_string(),
                        },
                    ],
                    ..Default::default()
                },
            },
        );
        let row = PodRow::from(&pod);
        assert_eq!(row.node, "node-1");
        assert_eq!(row.ports, "8080:80,443");
        assert_eq!(row.state, "pending");
    }
}
