//! # Backend API Client
//!
//! Typed HTTP client for the Content OS backend. The backend owns
//! authoritative record state and fronts both generation providers; this
//! client is the only place that talks to it.

pub mod types;

use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::config::BackendConfig;
use crate::error::BackendError;
use crate::providers::Provider;
use crate::records::Record;

pub use types::{
    ConnectionStatus, FetchResultResponse, JobStatusResponse, PlatformConnection,
    PlatformPublishResult, PublishResponse,
};

/// HTTP client for the Backend API collaborator.
#[derive(Debug, Clone)]
pub struct BackendClient {
    http: Client,
    base_url: String,
    auth_token: Option<String>,
}

impl BackendClient {
    /// Builds a client from configuration. The base URL is validated here so
    /// malformed configuration fails at startup, not on the first poll.
    pub fn new(config: &BackendConfig) -> Result<Self, BackendError> {
        let parsed =
            Url::parse(&config.base_url).map_err(|source| BackendError::InvalidBaseUrl {
                value: config.base_url.clone(),
                source,
            })?;

        let http = Client::builder()
            .timeout(std::time::Duration::from_millis(config.request_timeout_ms))
            .build()
            .map_err(BackendError::ClientBuild)?;

        Ok(Self {
            http,
            base_url: parsed.as_str().trim_end_matches('/').to_string(),
            auth_token: config.auth_token.clone(),
        })
    }

    /// Poll status for a tracked generation job.
    pub async fn job_status(
        &self,
        provider: Provider,
        job_id: &str,
    ) -> Result<JobStatusResponse, BackendError> {
        let endpoint = format!("/jobs/{}/{}/status", provider.slug(), job_id);
        let request = self.request(Method::GET, &endpoint);
        self.send_json(request, &endpoint).await
    }

    /// Materialize the durable result URL for a completed job.
    pub async fn fetch_result(
        &self,
        provider: Provider,
        job_id: &str,
    ) -> Result<FetchResultResponse, BackendError> {
        let endpoint = format!("/jobs/{}/{}/fetch-result", provider.slug(), job_id);
        let request = self.request(Method::POST, &endpoint);
        self.send_json(request, &endpoint).await
    }

    /// Fetch the authoritative record list for a workspace.
    pub async fn list_records(&self, workspace_id: &str) -> Result<Vec<Record>, BackendError> {
        let request = self
            .request(Method::GET, "/records")
            .query(&[("workspaceId", workspace_id)]);
        self.send_json(request, "/records").await
    }

    pub async fn create_record(&self, record: &Record) -> Result<Record, BackendError> {
        let request = self.request(Method::POST, "/records").json(record);
        self.send_json(request, "/records").await
    }

    pub async fn update_record(&self, record: &Record) -> Result<Record, BackendError> {
        let endpoint = format!("/records/{}", record.id);
        let request = self.request(Method::PATCH, &endpoint).json(record);
        self.send_json(request, &endpoint).await
    }

    pub async fn delete_record(&self, record_id: &str) -> Result<(), BackendError> {
        let endpoint = format!("/records/{record_id}");
        let request = self.request(Method::DELETE, &endpoint);
        self.send_empty(request, &endpoint).await
    }

    /// Publish a record to its target platforms. The backend reports a
    /// per-platform outcome; partial success is the caller's concern.
    pub async fn publish_record(&self, record_id: &str) -> Result<PublishResponse, BackendError> {
        let endpoint = format!("/records/{record_id}/publish");
        let request = self.request(Method::POST, &endpoint);
        self.send_json(request, &endpoint).await
    }

    /// Auxiliary platform-connection summary fetched alongside record loads.
    pub async fn connection_status(
        &self,
        workspace_id: &str,
    ) -> Result<ConnectionStatus, BackendError> {
        let request = self
            .request(Method::GET, "/connection-status")
            .query(&[("workspaceId", workspace_id)]);
        self.send_json(request, "/connection-status").await
    }

    fn request(&self, method: Method, endpoint: &str) -> RequestBuilder {
        let url = format!("{}{endpoint}", self.base_url);
        let mut builder = self.http.request(method, url);
        if let Some(token) = &self.auth_token {
            builder = builder.bearer_auth(token);
        }
        builder
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<T, BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream_error(status, endpoint, response).await);
        }
        response
            .json::<T>()
            .await
            .map_err(|source| BackendError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })
    }

    async fn send_empty(
        &self,
        request: RequestBuilder,
        endpoint: &str,
    ) -> Result<(), BackendError> {
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(self.upstream_error(status, endpoint, response).await);
        }
        Ok(())
    }

    async fn upstream_error(
        &self,
        status: StatusCode,
        endpoint: &str,
        response: reqwest::Response,
    ) -> BackendError {
        let body = response.text().await.unwrap_or_default();
        debug!(
            endpoint,
            status = status.as_u16(),
            "backend request rejected"
        );
        BackendError::upstream(status.as_u16(), endpoint, &body)
    }
}
