//! Secret types for protecting credentials from accidental logging.
//!
//! This module re-exports types from the [`secrecy`] crate. Cluster access
//! credentials (kubeconfig contents), provider API tokens and object-store
//! tokens all pass through the runner as `SecretString`.
//!
//! `SecretString` implements `Debug` with redaction, so any struct deriving
//! `Debug` that holds one is safe to log via `{:?}` or tracing fields. The
//! inner value is zeroized on drop.
//!
//! # Example
//!
//! ```rust
//! use common::secret::SecretString;
//! use secrecy::ExposeSecret;
//!
//! #[derive(Debug)]
//! struct ClusterAccess {
//!     cluster_id: String,
//!     kubeconfig: SecretString,
//! }
//!
//! let access = ClusterAccess {
//!     cluster_id: "1a2b3c".to_string(),
//!     kubeconfig: SecretString::from("apiVersion: v1\nkind: Config"),
//! };
//!
//! // Safe: kubeconfig is redacted
//! println!("{:?}", access);
//!
//! // Reading the value requires an explicit call
//! let raw: &str = access.kubeconfig.expose_secret();
//! ```
//!
//! Expose a secret only at the point it leaves the process: writing the
//! private kubeconfig file, or setting an `Authorization` header.

pub use secrecy::{ExposeSecret, SecretString};

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[test]
    fn test_debug_is_redacted() {
        let secret = SecretString::from("offline-token");
        let debug_str = format!("{secret:?}");

        assert!(debug_str.contains("REDACTED"));
        assert!(!debug_str.contains("offline-token"));
    }

    #[test]
    fn test_expose_secret_returns_inner_value() {
        let secret = SecretString::from("kubeconfig-bytes");
        assert_eq!(secret.expose_secret(), "kubeconfig-bytes");
    }

    #[test]
    fn test_deserialize() {
        #[allow(dead_code)]
        #[derive(Debug, Deserialize)]
        struct Credentials {
            id: String,
            kubeconfig: SecretString,
        }

        let json = r#"{"id": "abc", "kubeconfig": "apiVersion: v1"}"#;
        let creds: Credentials = serde_json::from_str(json).expect("deserialize");

        assert_eq!(creds.kubeconfig.expose_secret(), "apiVersion: v1");

        let debug = format!("{creds:?}");
        assert!(!debug.contains("apiVersion"));
        assert!(debug.contains("REDACTED"));
    }
}
