//! Docker Engine runtime.
//!
//! Talks to the Engine HTTP API over its unix socket.
//!
//! Reference: https://docs.docker.com/reference/api/engine/

use std::path::Path;

use async_trait::async_trait;
use hyper::{Body, Client, Method, Request, StatusCode};
use hyperlocal::{UnixClientExt, UnixConnector, Uri};
use minipod_spec::CreateContainerOptions;
use serde::Deserialize;
use tracing::{debug, error, info};

use crate::runtime::{ContainerRuntime, RuntimeError};

/// Seconds the engine waits for a container to exit before killing it.
const STOP_TIMEOUT_SECS: u32 = 10;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CreateResponse {
    id: String,
    #[serde(default)]
    warnings: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

/// One line of the image pull progress stream.
#[derive(Debug, Deserialize)]
struct PullProgress {
    #[serde(default)]
    error: Option<String>,
}

/// Container runtime backed by a Docker Engine.
pub struct DockerRuntime {
    socket_path: String,
    client: Client<UnixConnector>,
}

impl DockerRuntime {
    pub fn new<P: AsRef<Path>>(socket_path: P) -> Self {
        let socket_path = socket_path.as_ref().to_string_lossy().to_string();
        let client = Client::unix();
        Self {
            socket_path,
            client,
        }
    }

    pub fn socket_exists(&self) -> bool {
        Path::new(&self.socket_path).exists()
    }

    /// Send a request and return the status and full body.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> Result<(StatusCode, Vec<u8>), RuntimeError> {
        let uri = Uri::new(&self.socket_path, path);
        debug!(method = %method, path = path, "Docker API request");

        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("Accept", "application/json");
        if body.is_some() {
            builder = builder.header("Content-Type", "application/json");
        }
        let request = builder
            .body(body.map(Body::from).unwrap_or_else(Body::empty))
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        let response = self.client.request(request).await.map_err(|e| {
            if e.is_connect() {
                RuntimeError::Unavailable(format!("{}: {e}", self.socket_path))
            } else {
                RuntimeError::Transport(e.to_string())
            }
        })?;
        let status = response.status();
        let body = hyper::body::to_bytes(response.into_body())
            .await
            .map_err(|e| RuntimeError::Transport(e.to_string()))?;
        Ok((status, body.to_vec()))
    }

    fn api_error(status: StatusCode, body: &[u8]) -> RuntimeError {
        let message = serde_json::from_slice::<ErrorResponse>(body)
            .map(|e| e.message)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).to_string());
        error!(status = %status, message = %message, "Docker API error");
        RuntimeError::Api {
            status: status.as_u16(),
            message,
        }
    }

    /// Run a container action where 204 means done and 304 means nothing to do.
    async fn container_action(&self, id: &str, path: &str) -> Result<(), RuntimeError> {
        let (status, body) = self.request(Method::POST, path, None).await?;
        match status {
            StatusCode::NO_CONTENT | StatusCode::NOT_MODIFIED => Ok(()),
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(id.to_string())),
            _ => Err(Self::api_error(status, &body)),
        }
    }
}

/// Split an image reference into the `fromImage` and `tag` query values.
fn image_pull_params(image: &str) -> (String, Option<String>) {
    if image.contains('@') {
        return (image.to_string(), None);
    }
    let name_start = image.rfind('/').map(|i| i + 1).unwrap_or(0);
    match image[name_start..].rfind(':') {
        Some(i) => {
            let split = name_start + i;
            (image[..split].to_string(), Some(image[split + 1..].to_string()))
        }
        None => (image.to_string(), Some("latest".to_string())),
    }
}

/// Path and query for `path` with URL-encoded `params`.
fn with_query(path: &str, params: &[(&str, &str)]) -> Result<String, RuntimeError> {
    let url = reqwest::Url::parse_with_params(&format!("http://docker{path}"), params)
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;
    Ok(match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    })
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<(), RuntimeError> {
        let (status, body) = self.request(Method::GET, "/_ping", None).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(RuntimeError::Unavailable(
                String::from_utf8_lossy(&body).to_string(),
            ))
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        let (from_image, tag) = image_pull_params(image);
        let mut params = vec![("fromImage", from_image.as_str())];
        if let Some(tag) = tag.as_deref() {
            params.push(("tag", tag));
        }
        let path = with_query("/images/create", &params)?;

        info!(image = %image, "Pulling image");
        let (status, body) = self.request(Method::POST, &path, None).await?;
        if !status.is_success() {
            return Err(RuntimeError::ImagePull {
                image: image.to_string(),
                message: Self::api_error(status, &body).to_string(),
            });
        }

        // The engine reports pull failures inside a 200 progress stream.
        for line in body.split(|b| *b == b'\n') {
            if line.is_empty() {
                continue;
            }
            if let Ok(PullProgress {
                error: Some(message),
            }) = serde_json::from_slice(line)
            {
                return Err(RuntimeError::ImagePull {
                    image: image.to_string(),
                    message,
                });
            }
        }
        Ok(())
    }

    async fn create_container(
        &self,
        options: &CreateContainerOptions,
    ) -> Result<String, RuntimeError> {
        let body =
            serde_json::to_vec(options).map_err(|e| RuntimeError::Transport(e.to_string()))?;
        let (status, body) = self
            .request(Method::POST, "/containers/create", Some(body))
            .await?;
        if status != StatusCode::CREATED {
            return Err(Self::api_error(status, &body));
        }

        let created: CreateResponse = serde_json::from_slice(&body)
            .map_err(|e| RuntimeError::Transport(format!("invalid create response: {e}")))?;
        for warning in created.warnings.unwrap_or_default() {
            info!(container_id = %created.id, warning = %warning, "Docker create warning");
        }
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.container_action(id, &format!("/containers/{id}/start"))
            .await
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        let timeout = STOP_TIMEOUT_SECS.to_string();
        let path = with_query(&format!("/containers/{id}/stop"), &[("t", &timeout)])?;
        self.container_action(id, &path).await
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        let path = with_query(
            &format!("/containers/{id}"),
            &[("force", "true"), ("v", "true")],
        )?;
        let (status, body) = self.request(Method::DELETE, &path, None).await?;
        match status {
            StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(RuntimeError::NotFound(id.to_string())),
            _ => Err(Self::api_error(status, &body)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("nginx", "nginx", Some("latest"))]
    #[case("nginx:1.27", "nginx", Some("1.27"))]
    #[case("localhost:5000/app", "localhost:5000/app", Some("latest"))]
    #[case("localhost:5000/app:v2", "localhost:5000/app", Some("v2"))]
    #[case("ghcr.io/org/app@sha256:abc", "ghcr.io/org/app@sha256:abc", None)]
    fn test_image_pull_params(
        #[case] image: &str,
        #[case] from_image: &str,
        #[case] tag: Option<&str>,
    ) {
        let (name, t) = image_pull_params(image);
        assert_eq!(name, from_image);
        assert_eq!(t.as_deref(), tag);
    }

    #[test]
    fn test_with_query_encodes() {
        let path = with_query(
            "/images/create",
            &[("fromImage", "localhost:5000/app"), ("tag", "v2")],
        )
        .unwrap();
        assert_eq!(path, "/images/create?fromImage=localhost%3A5000%2Fapp&tag=v2");
    }

    #[tokio::test]
    async fn test_missing_socket_is_unavailable() {
        let runtime = DockerRuntime::new("/nonexistent/docker.sock");
        assert!(!runtime.socket_exists());
        assert!(runtime.ping().await.is_err());
    }
}
