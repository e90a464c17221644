//! Apiserver client for the node agent.
//!
//! Provides methods for talking to the apiserver:
//! - Health checks
//! - Reading this node's pods
//! - Opening the watch stream

use std::time::Duration;

use anyhow::{bail, Context, Result};
use minipod_api::Pod;
use tracing::{debug, error};
use uuid::Uuid;

use crate::config::Config;
use crate::watch::{HttpEventSource, WatchError};

/// Timeout for plain request/response calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for establishing the watch connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Apiserver API client.
pub struct ApiServerClient {
    client: reqwest::Client,
    base_url: String,
    node_name: String,
}

impl ApiServerClient {
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_base_url(&config.apiserver_url, &config.node_name)
    }

    pub fn with_base_url(base_url: &str, node_name: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            node_name: node_name.to_string(),
        })
    }

    /// Check that the apiserver is up.
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/healthz", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            bail!("apiserver unhealthy: {}", response.status());
        }
        Ok(())
    }

    /// Fetch one of this node's pods.
    pub async fn get_pod(&self, uid: Uuid) -> Result<Pod> {
        let url = format!("{}/v1/pods", self.base_url);
        debug!(pod_uid = %uid, "Fetching pod");

        let response = self
            .client
            .get(&url)
            .query(&[("nodename", self.node_name.as_str()), ("uid", &uid.to_string())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to fetch pod");
            bail!("Failed to fetch pod {uid}: {status} - {body}");
        }

        Ok(response.json().await?)
    }

    /// List all pods assigned to this node.
    pub async fn list_pods(&self) -> Result<Vec<Pod>> {
        let url = format!("{}/v1/pods", self.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[("nodename", self.node_name.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %body, "Failed to list pods");
            bail!("Failed to list pods: {status} - {body}");
        }

        let pods: Vec<Pod> = response.json().await?;
        debug!(pod_count = pods.len(), "Listed pods");
        Ok(pods)
    }

    /// Event source for this node's watch stream.
    pub fn watch_source(&self) -> Result<HttpEventSource, WatchError> {
        HttpEventSource::new(&self.base_url, &self.node_name, CONNECT_TIMEOUT)
    }
}
