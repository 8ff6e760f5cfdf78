//! Provisioning API HTTP client.
//!
//! Thin JSON client shared by the cluster manager and the version source.
//! Status codes are mapped to `RunnerError` here so callers only deal with
//! typed results.
//!
//! # Security
//!
//! - The API token is held as `SecretString` and exposed only when the
//!   `Authorization` header is built
//! - Timeouts prevent hanging connections
//! - Response bodies are logged only for client errors, never request bodies

use crate::errors::RunnerError;
use common::secret::{ExposeSecret, SecretString};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, warn};

/// Default timeout for provider requests in seconds.
const OCM_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum response body length included in error messages.
const MAX_ERROR_BODY_LEN: usize = 256;

/// HTTP client for the cluster provisioning API.
#[derive(Clone)]
pub struct OcmApi {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl OcmApi {
    /// Create a new API client.
    ///
    /// # Errors
    ///
    /// Returns `RunnerError::ClusterApi` if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, token: Option<SecretString>) -> Result<Self, RunnerError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(OCM_REQUEST_TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| {
                error!(target: "e2e.services.ocm", error = %e, "Failed to build HTTP client");
                RunnerError::ClusterApi(format!("failed to build HTTP client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    /// GET a JSON document.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RunnerError> {
        let response = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;

        Self::parse(path, response).await
    }

    /// POST a JSON body and decode the JSON response.
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, RunnerError> {
        let response = self
            .request(Method::POST, path)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;

        Self::parse(path, response).await
    }

    /// DELETE a resource. Returns `Ok(false)` if it was already gone.
    pub async fn delete(&self, path: &str) -> Result<bool, RunnerError> {
        let response = self
            .request(Method::DELETE, path)
            .send()
            .await
            .map_err(|e| transport_error(path, &e))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }

        Self::check_status(path, response).await?;
        Ok(true)
    }

    async fn parse<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, RunnerError> {
        let response = Self::check_status(path, response).await?;
        response.json().await.map_err(|e| {
            error!(target: "e2e.services.ocm", error = %e, path = %path, "Failed to parse provider response");
            RunnerError::ClusterApi(format!("invalid response from {}: {}", path, e))
        })
    }

    async fn check_status(path: &str, response: Response) -> Result<Response, RunnerError> {
        let status = response.status();

        if status.is_success() {
            Ok(response)
        } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            error!(target: "e2e.services.ocm", status = %status, path = %path, "Provider rejected API token");
            Err(RunnerError::ClusterApi(format!(
                "{} returned {}: token rejected",
                path, status
            )))
        } else if status.is_server_error() {
            warn!(target: "e2e.services.ocm", status = %status, path = %path, "Provider returned server error");
            Err(RunnerError::ClusterApi(format!("{} returned {}", path, status)))
        } else {
            let body = response.text().await.unwrap_or_default();
            let body: String = body.chars().take(MAX_ERROR_BODY_LEN).collect();
            warn!(target: "e2e.services.ocm", status = %status, path = %path, body = %body, "Unexpected provider response");
            Err(RunnerError::ClusterApi(format!(
                "{} returned {}: {}",
                path, status, body
            )))
        }
    }
}

fn transport_error(path: &str, e: &reqwest::Error) -> RunnerError {
    warn!(target: "e2e.services.ocm", error = %e, path = %path, "Provider request failed");
    if e.is_timeout() {
        RunnerError::timeout(
            format!("provider request {}", path),
            Duration::from_secs(OCM_REQUEST_TIMEOUT_SECS),
        )
    } else {
        RunnerError::ClusterApi(format!("request to {} failed: {}", path, e))
    }
}
