use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use crate::error::{error_kind, ExportError};

/// Header carrying the access token on entity API calls
pub const ACCESS_TOKEN_HEADER: &str = "Preservica-Access-Token";

/// Entity/XIP API version used when none is configured
pub const DEFAULT_API_VERSION: &str = "v7.0";

/// Response to an export submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmitResponse {
    pub status: u16,
    /// Progress token on 202, error text otherwise
    pub body: String,
}

/// Response to a progress check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressResponse {
    pub status: u16,
}

/// Response to a content download
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResponse {
    pub status: u16,
    pub bytes: Bytes,
}

/// The three remote operations an export run needs
///
/// Implementations make exactly one HTTP call per method and never retry.
#[async_trait]
pub trait ExportApi: Send + Sync {
    async fn submit_export(
        &self,
        structural_object_id: &str,
        token: &str,
    ) -> Result<SubmitResponse, ExportError>;

    async fn check_progress(
        &self,
        progress_token: &str,
        token: &str,
    ) -> Result<ProgressResponse, ExportError>;

    async fn download_export(
        &self,
        progress_token: &str,
        token: &str,
    ) -> Result<DownloadResponse, ExportError>;
}

/// HTTP client for the Preservica entity API export endpoints
pub struct ExportClient {
    /// Shared HTTP client
    client: Client,

    /// Preservica host, without trailing slash
    base_url: String,

    /// Entity/XIP API version for the export request namespaces
    api_version: String,
}

impl ExportClient {
    /// Create a new export client
    pub fn new(
        base_url: impl Into<String>,
        api_version: impl Into<String>,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self::with_client(client, base_url, api_version))
    }

    /// Create an export client around an existing HTTP client
    pub fn with_client(
        client: Client,
        base_url: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Self {
        let base_url: String = base_url.into();
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version: api_version.into(),
        }
    }

    /// Get the underlying HTTP client
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Export request body: content, metadata, all generations, no parent hierarchy
    pub fn export_action_xml(&self) -> String {
        format!(
            concat!(
                "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>",
                "<ExportAction xmlns=\"http://preservica.com/EntityAPI/{v}\" ",
                "xmlns:xip=\"http://preservica.com/XIP/{v}\">",
                "<IncludeContent>Content</IncludeContent>",
                "<IncludeMetadata>Metadata</IncludeMetadata>",
                "<IncludedGenerations>All</IncludedGenerations>",
                "<IncludeParentHierarchy>false</IncludeParentHierarchy>",
                "</ExportAction>"
            ),
            v = self.api_version
        )
    }

    fn export_url(&self, structural_object_id: &str) -> String {
        format!(
            "{}/api/entity/structural-objects/{}/exports",
            self.base_url, structural_object_id
        )
    }

    fn progress_url(&self, progress_token: &str) -> String {
        format!("{}/api/entity/progress/{}", self.base_url, progress_token)
    }

    fn content_url(&self, progress_token: &str) -> String {
        format!(
            "{}/api/entity/actions/exports/{}/content",
            self.base_url, progress_token
        )
    }

    /// Send a request once, logging transport failures by kind
    async fn send(&self, request: RequestBuilder) -> Result<Response, reqwest::Error> {
        let request = request.build()?;
        let method = request.method().clone();
        let url = request.url().clone();

        tracing::debug!(
            method = %method,
            url = %url,
            "Sending HTTP request"
        );

        match self.client.execute(request).await {
            Ok(response) => {
                tracing::debug!(
                    status = %response.status(),
                    "Received HTTP response"
                );
                Ok(response)
            }
            Err(e) => {
                tracing::warn!(
                    error_kind = error_kind(&e),
                    error = %e,
                    url = %url,
                    "HTTP request error"
                );
                Err(e)
            }
        }
    }
}

#[async_trait]
impl ExportApi for ExportClient {
    async fn submit_export(
        &self,
        structural_object_id: &str,
        token: &str,
    ) -> Result<SubmitResponse, ExportError> {
        let request = self
            .client
            .post(self.export_url(structural_object_id))
            .header(ACCESS_TOKEN_HEADER, token)
            .header("Content-Type", "application/xml;charset=UTF-8")
            .header("Accept", "text/plain;charset=UTF-8")
            .body(self.export_action_xml());

        let response = self
            .send(request)
            .await
            .map_err(|e| ExportError::transport(&e))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| ExportError::transport(&e))?;

        Ok(SubmitResponse {
            status,
            body: body.trim().to_string(),
        })
    }

    async fn check_progress(
        &self,
        progress_token: &str,
        token: &str,
    ) -> Result<ProgressResponse, ExportError> {
        let request = self
            .client
            .get(self.progress_url(progress_token))
            .query(&[("includeErrors", "true")])
            .header(ACCESS_TOKEN_HEADER, token);

        let response = self
            .send(request)
            .await
            .map_err(|e| ExportError::transport(&e))?;

        Ok(ProgressResponse {
            status: response.status().as_u16(),
        })
    }

    async fn download_export(
        &self,
        progress_token: &str,
        token: &str,
    ) -> Result<DownloadResponse, ExportError> {
        let request = self
            .client
            .get(self.content_url(progress_token))
            .header(ACCESS_TOKEN_HEADER, token);

        let response = self
            .send(request)
            .await
            .map_err(|e| ExportError::DownloadFailure(transport_detail(&e)))?;
        let status = response.status();

        // Error bodies are not worth buffering
        if status != StatusCode::OK {
            return Ok(DownloadResponse {
                status: status.as_u16(),
                bytes: Bytes::new(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExportError::DownloadFailure(transport_detail(&e)))?;

        Ok(DownloadResponse {
            status: status.as_u16(),
            bytes,
        })
    }
}

fn transport_detail(e: &reqwest::Error) -> String {
    format!("{} (kind: {})", e, error_kind(e))
}
