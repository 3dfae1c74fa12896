//! Error types for the credential provider client

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, EcpError>;

/// Errors returned while fetching credentials from a provider plugin
///
/// Every variant carries enough context (path, exit status, stderr, parse
/// error) to diagnose a failure without re-running the plugin.
#[derive(Debug, Error)]
pub enum EcpError {
    /// The configured plugin binary does not exist
    #[error("credential provider binary {} does not exist", .path.display())]
    NotFound { path: PathBuf },

    /// Inspecting the plugin binary failed for a reason other than absence
    #[error("failed to inspect credential provider binary {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Request could not be encoded or response could not be decoded
    #[error("credential provider protocol error: {message}")]
    Protocol {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    /// The plugin failed to start or exited unsuccessfully
    #[error(
        "credential provider {} failed ({}){}",
        .path.display(),
        describe_exit(.exit_code),
        describe_stderr(.stderr)
    )]
    ExecutionFailed {
        path: PathBuf,
        /// None when the process never started or was terminated by a signal
        exit_code: Option<i32>,
        stderr: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// The plugin did not finish before the deadline and was killed
    #[error(
        "credential provider {} timed out after {:?}{}",
        .path.display(),
        .timeout,
        describe_stderr(.stderr)
    )]
    Timeout {
        path: PathBuf,
        timeout: Duration,
        stderr: String,
    },

    /// The response parsed but yielded no usable credential
    #[error("no credentials from {}: {reason}", .path.display())]
    NoCredentials { path: PathBuf, reason: String },

    /// The image reference is not a fully qualified reference
    #[error("invalid image reference {reference:?}: {reason}")]
    InvalidReference { reference: String, reason: String },

    /// A configuration value is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl EcpError {
    /// Create a protocol error from a serde failure
    pub fn protocol(message: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Protocol {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create an invalid reference error
    pub fn invalid_reference(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Create a no-credentials error for the given plugin path
    pub fn no_credentials(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::NoCredentials {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Captured standard error of the plugin, when the failure carries one
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::ExecutionFailed { stderr, .. } | Self::Timeout { stderr, .. } => Some(stderr),
            _ => None,
        }
    }
}

fn describe_exit(exit_code: &Option<i32>) -> String {
    match exit_code {
        Some(code) => format!("exit status {}", code),
        None => "no exit status".to_string(),
    }
}

fn describe_stderr(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(": {}", trimmed)
    }
}
