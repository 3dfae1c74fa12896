//! Client configuration
//!
//! A [`ProviderConfig`] is built once, validated when the client is created,
//! and never changes afterwards. It can be embedded in a larger config file:
//!
//! ```json
//! {"binaryPath": "/usr/libexec/ecr-credential-provider", "timeoutSecs": 30, "selection": "most-specific"}
//! ```

use crate::selection::SelectionPolicy;
use crate::{EcpError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Deadline for one plugin invocation unless configured otherwise
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Immutable settings of a credential provider client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    /// Path of the plugin executable
    pub binary_path: PathBuf,

    /// Wall-clock bound from spawn to exit
    #[serde(
        rename = "timeoutSecs",
        with = "duration_secs",
        default = "default_timeout"
    )]
    pub timeout: Duration,

    /// Entry selection when a response carries several
    #[serde(default)]
    pub selection: SelectionPolicy,
}

impl ProviderConfig {
    /// Configuration for the plugin at `binary_path` with default settings
    pub fn new(binary_path: impl Into<PathBuf>) -> Self {
        Self {
            binary_path: binary_path.into(),
            timeout: DEFAULT_TIMEOUT,
            selection: SelectionPolicy::default(),
        }
    }

    /// Set the invocation deadline
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the entry selection policy
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    pub fn binary_path(&self) -> &Path {
        &self.binary_path
    }

    /// Reject values the client cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.binary_path.as_os_str().is_empty() {
            return Err(EcpError::InvalidConfig(
                "credential provider binary path is empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(EcpError::InvalidConfig(
                "credential provider timeout must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
