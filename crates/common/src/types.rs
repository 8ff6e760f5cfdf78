//! Common data types for the e2e runner crates.

use crate::error::{CommonError, Result};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Characters used for generated run suffixes.
const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated run suffix.
pub const GENERATED_SUFFIX_LEN: usize = 3;

/// Maximum accepted length of a run suffix.
pub const MAX_SUFFIX_LEN: usize = 32;

/// Identifier of a cluster known to the provisioning API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(String);

impl ClusterId {
    /// Wrap a provider-issued cluster id, rejecting blank values.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidClusterId` for empty or whitespace-only ids.
    pub fn new(id: impl Into<String>) -> Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(CommonError::InvalidClusterId(
                "cluster id must not be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Borrow the raw id.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Token appended to report file names and workload labels so that
/// concurrent runs never share an artifact path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunSuffix(String);

impl RunSuffix {
    /// Validate a caller-supplied suffix.
    ///
    /// # Errors
    ///
    /// Returns `CommonError::InvalidSuffix` unless the value is 1-32
    /// characters of lowercase ASCII letters, digits or `-`.
    pub fn parse(value: &str) -> Result<Self> {
        let valid = !value.is_empty()
            && value.len() <= MAX_SUFFIX_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');

        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(CommonError::InvalidSuffix(value.to_string()))
        }
    }

    /// Generate a random suffix.
    #[must_use]
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..GENERATED_SUFFIX_LEN)
            .filter_map(|_| SUFFIX_CHARSET.choose(&mut rng).copied())
            .map(char::from)
            .collect();
        Self(suffix)
    }

    /// Borrow the raw suffix.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
