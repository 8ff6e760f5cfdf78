//! Metrics artifact upload.
//!
//! Uploaded artifacts always land under the `incoming/` prefix of the
//! bucket, keyed by the local file's base name. Credentials and region come
//! from the shared AWS configuration of the host (environment, profile
//! files or instance metadata), never from the run configuration.

use crate::errors::RunnerError;
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::path::Path;
use tokio::sync::OnceCell;
use tracing::{info, instrument, warn};

/// Prefix every uploaded metrics key is placed under.
pub const INCOMING_PREFIX: &str = "incoming";

/// Content type of the Prometheus text exposition format.
const METRICS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Trait for uploading artifacts to object storage (enables mocking).
#[async_trait::async_trait]
pub trait MetricsPublisher: Send + Sync {
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), RunnerError>;
}

/// Object key for a local metrics file: `incoming/<basename>`.
pub fn metrics_key(local_path: &Path) -> Result<String, RunnerError> {
    let name = local_path
        .file_name()
        .and_then(|n| n.to_str())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| {
            RunnerError::MetricsUpload(format!("{} has no file name", local_path.display()))
        })?;
    Ok(format!("{}/{}", INCOMING_PREFIX, name))
}

/// `MetricsPublisher` writing to S3 (or an S3-compatible endpoint).
///
/// The client is built on first upload, so runs that never publish never
/// resolve AWS configuration.
pub struct S3MetricsPublisher {
    endpoint: Option<String>,
    client: OnceCell<Client>,
}

impl S3MetricsPublisher {
    /// Publisher using the shared AWS configuration, optionally against a
    /// custom endpoint.
    pub fn new(endpoint: Option<String>) -> Self {
        Self {
            endpoint,
            client: OnceCell::new(),
        }
    }

    /// Publisher using an already configured client.
    pub fn with_client(client: Client) -> Self {
        Self {
            endpoint: None,
            client: OnceCell::new_with(Some(client)),
        }
    }

    async fn client(&self) -> &Client {
        self.client
            .get_or_init(|| async {
                let shared = aws_config::defaults(BehaviorVersion::latest()).load().await;
                let mut builder = aws_sdk_s3::config::Builder::from(&shared);
                if let Some(endpoint) = &self.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }
                Client::from_conf(builder.build())
            })
            .await
    }
}

#[async_trait::async_trait]
impl MetricsPublisher for S3MetricsPublisher {
    #[instrument(skip_all, fields(bucket = %bucket, key = %key))]
    async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), RunnerError> {
        let body = tokio::fs::read(local_path).await.map_err(|e| {
            RunnerError::MetricsUpload(format!("cannot read {}: {}", local_path.display(), e))
        })?;

        self.client()
            .await
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(METRICS_CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                warn!(target: "e2e.services.metrics", error = %DisplayErrorContext(&e), "Metrics upload rejected");
                RunnerError::MetricsUpload(format!(
                    "PutObject s3://{}/{} failed: {}",
                    bucket,
                    key,
                    DisplayErrorContext(&e)
                ))
            })?;

        info!(target: "e2e.services.metrics", "Metrics uploaded");
        Ok(())
    }
}

/// Mock metrics publisher module for testing.
pub mod mock {
    use super::*;
    use std::path::PathBuf;
    use std::sync::{Mutex, PoisonError};

    /// One recorded upload.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct Upload {
        pub local_path: PathBuf,
        pub bucket: String,
        pub key: String,
    }

    /// Mock publisher recording uploads.
    pub struct MockMetricsPublisher {
        fail: bool,
        uploads: Mutex<Vec<Upload>>,
    }

    impl MockMetricsPublisher {
        pub fn accepting() -> Self {
            Self {
                fail: false,
                uploads: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                fail: true,
                uploads: Mutex::new(Vec::new()),
            }
        }

        /// Attempted uploads, successful or not.
        pub fn uploads(&self) -> Vec<Upload> {
            self.uploads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait::async_trait]
    impl MetricsPublisher for MockMetricsPublisher {
        async fn upload(&self, local_path: &Path, bucket: &str, key: &str) -> Result<(), RunnerError> {
            self.uploads
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(Upload {
                    local_path: local_path.to_path_buf(),
                    bucket: bucket.to_string(),
                    key: key.to_string(),
                });
            if self.fail {
                return Err(RunnerError::MetricsUpload("mock: access denied".to_string()));
            }
            Ok(())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use aws_sdk_s3::config::{Credentials, Region};
    use wiremock::matchers::{header, header_regex, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn publisher(server: &MockServer) -> S3MetricsPublisher {
        let config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDTEST", "test-secret", None, None, "test"))
            .endpoint_url(server.uri())
            .force_path_style(true)
            .build();
        S3MetricsPublisher::with_client(Client::from_conf(config))
    }

    fn metrics_file(dir: &tempfile::TempDir, contents: &str) -> std::path::PathBuf {
        let file = dir.path().join("run.prom");
        std::fs::write(&file, contents).unwrap();
        file
    }

    #[test]
    fn test_metrics_key_uses_basename() {
        let key = metrics_key(Path::new("/tmp/x/job.abc.metrics.prom")).unwrap();
        assert_eq!(key, "incoming/job.abc.metrics.prom");
        assert!(metrics_key(Path::new("/")).is_err());
    }

    #[tokio::test]
    async fn test_upload_is_signed_put_object() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/e2e-metrics/incoming/run.prom"))
            .and(header_regex("authorization", "^AWS4-HMAC-SHA256 Credential=AKIDTEST/"))
            .and(header("content-type", METRICS_CONTENT_TYPE))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = metrics_file(&dir, "e2e_run_failed 0\n");

        publisher(&server)
            .upload(&file, "e2e-metrics", "incoming/run.prom")
            .await
            .unwrap();

        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests.first().unwrap().body).into_owned();
        assert!(body.contains("e2e_run_failed 0"));
    }

    #[tokio::test]
    async fn test_upload_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .respond_with(ResponseTemplate::new(403).set_body_string(
                "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
                 <Error><Code>AccessDenied</Code><Message>Access Denied</Message></Error>",
            ))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let file = metrics_file(&dir, "x");

        let result = publisher(&server).upload(&file, "b", "incoming/run.prom").await;
        assert!(matches!(result, Err(RunnerError::MetricsUpload(msg)) if msg.contains("s3://b/incoming/run.prom")));
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let server = MockServer::start().await;
        let result = publisher(&server)
            .upload(Path::new("/nonexistent/run.prom"), "b", "incoming/run.prom")
            .await;
        assert!(matches!(result, Err(RunnerError::MetricsUpload(msg)) if msg.contains("cannot read")));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
