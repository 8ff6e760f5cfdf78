//! Access to the cluster under test.
//!
//! The cluster credential is a kubeconfig document held as a secret. It is
//! turned into a `kube::Client` for in-process API calls, or materialised
//! into a private temporary file for the suite subprocess. The file is never
//! written under the report directory.

use crate::errors::RunnerError;
use common::secret::{ExposeSecret, SecretString};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Connect timeout for cluster API requests.
pub const KUBE_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Read timeout for cluster API requests.
pub const KUBE_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Build an API client for the cluster `credential` grants access to.
///
/// # Errors
///
/// Returns `RunnerError::Kube` if the kubeconfig does not parse or names no
/// usable context.
pub async fn client_for(credential: &SecretString) -> Result<Client, RunnerError> {
    let kubeconfig = Kubeconfig::from_yaml(credential.expose_secret())
        .map_err(|e| RunnerError::Kube(format!("invalid kubeconfig: {}", e)))?;

    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| RunnerError::Kube(format!("failed to load kubeconfig: {}", e)))?;
    config.connect_timeout = Some(KUBE_CONNECT_TIMEOUT);
    config.read_timeout = Some(KUBE_READ_TIMEOUT);

    Client::try_from(config).map_err(|e| RunnerError::Kube(format!("failed to create client: {}", e)))
}

/// Whether `error` is the API server reporting a missing object.
pub fn is_not_found(error: &kube::Error) -> bool {
    matches!(error, kube::Error::Api(response) if response.code == 404)
}

/// A kubeconfig written to a private temporary file.
///
/// The file is created with owner-only permissions and deleted on drop.
pub struct KubeconfigFile {
    file: NamedTempFile,
}

impl KubeconfigFile {
    pub fn write(credential: &SecretString) -> Result<Self, RunnerError> {
        let mut file = tempfile::Builder::new()
            .prefix("e2e-kubeconfig-")
            .tempfile()
            .map_err(|e| RunnerError::Command(format!("failed to create kubeconfig file: {}", e)))?;

        file.write_all(credential.expose_secret().as_bytes())
            .and_then(|()| file.flush())
            .map_err(|e| RunnerError::Command(format!("failed to write kubeconfig file: {}", e)))?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

/// Kubeconfig pointing at `server` with a static token.
#[cfg(test)]
pub(crate) fn test_kubeconfig(server: &str) -> SecretString {
    SecretString::from(format!(
        "apiVersion: v1
kind: Config
clusters:
- name: under-test
  cluster:
    server: {server}
users:
- name: runner
  user:
    token: test-token
contexts:
- name: under-test
  context:
    cluster: under-test
    user: runner
current-context: under-test
"
    ))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_file_contents_and_removal() {
        let file = KubeconfigFile::write(&SecretString::from("apiVersion: v1")).unwrap();
        let path = file.path().to_path_buf();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "apiVersion: v1");

        drop(file);
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_kubeconfig_file_is_private() {
        use std::os::unix::fs::PermissionsExt;

        let file = KubeconfigFile::write(&SecretString::from("secret")).unwrap();
        let mode = std::fs::metadata(file.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[tokio::test]
    async fn test_client_from_kubeconfig() {
        let client = client_for(&test_kubeconfig("http://127.0.0.1:6443")).await;
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_garbage_credential_rejected() {
        let result = client_for(&SecretString::from("{not: [yaml")).await;
        assert!(matches!(result, Err(RunnerError::Kube(msg)) if msg.contains("invalid kubeconfig")));
    }

    #[tokio::test]
    async fn test_credential_without_context_rejected() {
        let result = client_for(&SecretString::from("apiVersion: v1\nkind: Config\n")).await;
        assert!(matches!(result, Err(RunnerError::Kube(_))));
    }
}
