//! Credential provider client
//!
//! Fetches registry credentials by running an external plugin that speaks
//! the kubelet credential provider protocol. Each fetch is one linear
//! pipeline with no state carried between calls:
//!
//! 1. check that the plugin binary exists
//! 2. encode a `CredentialProviderRequest` for the image
//! 3. run the plugin with the request on stdin, under the configured deadline
//! 4. decode its stdout as a `CredentialProviderResponse`
//! 5. pick one auth entry according to the selection policy
//!
//! Failures are returned as-is; nothing is retried or cached.

use crate::config::ProviderConfig;
use crate::reference::ImageReference;
use crate::runner::{CommandRunner, ProcessRunner};
use crate::selection::{self, SelectionPolicy};
use crate::types::{CredentialProviderRequest, CredentialProviderResponse, Credentials};
use crate::{EcpError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Anything that can supply registry credentials for an image
///
/// This is the capability a registry resolver consumes; the plugin client is
/// one implementation.
#[async_trait]
pub trait CredentialSource: Send + Sync {
    /// Credentials for `image` on registry `host`
    async fn credentials(&self, image: &ImageReference, host: &str) -> Result<Credentials>;

    /// Source name for diagnostics
    fn name(&self) -> &'static str;
}

/// Client for one external credential provider plugin
pub struct CredentialProviderClient {
    config: ProviderConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl CredentialProviderClient {
    /// Create a client that spawns the configured plugin with `tokio::process`
    pub fn new(config: ProviderConfig) -> Result<Self> {
        Self::with_runner(config, Arc::new(CommandRunner::new()))
    }

    /// Create a client that runs the plugin through `runner`
    pub fn with_runner(config: ProviderConfig, runner: Arc<dyn ProcessRunner>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Fetch one credential pair for `image`
    ///
    /// `host` only feeds diagnostics; the plugin sees the image reference.
    pub async fn fetch_credentials(&self, image: &ImageReference, host: &str) -> Result<Credentials> {
        let path = self.config.binary_path();
        tracing::debug!(host, image = %image, plugin = %path.display(), "getting credentials");

        match tokio::fs::metadata(path).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EcpError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => {
                return Err(EcpError::Io {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        }

        let request = CredentialProviderRequest::new(image.to_string());
        let payload = serde_json::to_vec(&request)
            .map_err(|e| EcpError::protocol("failed to encode credential provider request", e))?;

        let output = self
            .runner
            .run(path, &payload, self.config.timeout)
            .await?;
        if !output.success() {
            return Err(EcpError::ExecutionFailed {
                path: path.to_path_buf(),
                exit_code: output.exit_code,
                stderr: output.stderr_lossy(),
                source: None,
            });
        }

        let response: CredentialProviderResponse = serde_json::from_slice(&output.stdout)
            .map_err(|e| EcpError::protocol("failed to decode credential provider response", e))?;
        if !response.is_expected_version() {
            tracing::warn!(
                kind = %response.kind,
                api_version = %response.api_version,
                plugin = %path.display(),
                "unexpected credential provider response version"
            );
        }

        if response.auth.is_empty() {
            return Err(EcpError::no_credentials(path, "response contained no auth entries"));
        }

        let policy = self.config.selection;
        let (key, entry) = selection::select(&response.auth, image, policy).ok_or_else(|| {
            EcpError::no_credentials(
                path,
                format!("no auth entry matches {}", image.locator()),
            )
        })?;
        tracing::debug!(host, match_key = key, entries = response.auth.len(), %policy, "selected credentials");

        Ok(Credentials::from(entry))
    }

    /// Selection policy in effect for this client
    pub fn selection(&self) -> SelectionPolicy {
        self.config.selection
    }
}

#[async_trait]
impl CredentialSource for CredentialProviderClient {
    async fn credentials(&self, image: &ImageReference, host: &str) -> Result<Credentials> {
        self.fetch_credentials(image, host).await
    }

    fn name(&self) -> &'static str {
        "credential-provider"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ProcessOutput;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Runner that replays a canned result and records what it was given
    struct ScriptedRunner {
        result: Box<dyn Fn() -> Result<ProcessOutput> + Send + Sync>,
        calls: Mutex<Vec<(PathBuf, Vec<u8>, Duration)>>,
    }

    impl ScriptedRunner {
        fn replying(stdout: &str) -> Arc<Self> {
            let stdout = stdout.as_bytes().to_vec();
            Self::with(move || {
                Ok(ProcessOutput {
                    exit_code: Some(0),
                    stdout: stdout.clone(),
                    stderr: Vec::new(),
                })
            })
        }

        fn with(result: impl Fn() -> Result<ProcessOutput> + Send + Sync + 'static) -> Arc<Self> {
            Arc::new(Self {
                result: Box::new(result),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<(PathBuf, Vec<u8>, Duration)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProcessRunner for ScriptedRunner {
        async fn run(&self, program: &Path, stdin: &[u8], timeout: Duration) -> Result<ProcessOutput> {
            self.calls
                .lock()
                .unwrap()
                .push((program.to_path_buf(), stdin.to_vec(), timeout));
            (self.result)()
        }
    }

    fn image(s: &str) -> ImageReference {
        ImageReference::parse(s).unwrap()
    }

    /// Existing file to stand in for the plugin binary
    fn plugin_file() -> tempfile::NamedTempFile {
        tempfile::NamedTempFile::new().expect("create temp file")
    }

    fn client(path: &Path, runner: Arc<ScriptedRunner>) -> CredentialProviderClient {
        CredentialProviderClient::with_runner(ProviderConfig::new(path), runner).unwrap()
    }

    #[tokio::test]
    async fn test_single_entry_returns_credentials() {
        let plugin = plugin_file();
        let runner = ScriptedRunner::replying(
            r#"{"kind":"CredentialProviderResponse","apiVersion":"credentialprovider.kubelet.k8s.io/v1","cacheKeyType":"Image","cacheDuration":"0s","auth":{"u1":{"username":"a","password":"b"}}}"#,
        );
        let client = client(plugin.path(), runner.clone());

        let creds = client
            .fetch_credentials(&image("registry.example.com/app:1"), "registry.example.com")
            .await
            .expect("fetch should succeed");
        assert_eq!(creds.username(), "a");
        assert_eq!(creds.password(), "b");

        let calls = runner.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, plugin.path());
        assert_eq!(calls[0].2, Duration::from_secs(60));
        let sent: CredentialProviderRequest = serde_json::from_slice(&calls[0].1).unwrap();
        assert_eq!(sent, CredentialProviderRequest::new("registry.example.com/app:1"));
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_found_and_never_runs() {
        let temp_dir = tempfile::tempdir().expect("create temp dir");
        let runner = ScriptedRunner::replying("{}");
        let client = client(&temp_dir.path().join("absent"), runner.clone());

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::NotFound { .. }), "got {:?}", err);
        assert!(runner.calls().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_uninspectable_binary_is_io_error() {
        // A path through a regular file fails with ENOTDIR, not ENOENT
        let plugin = plugin_file();
        let runner = ScriptedRunner::replying("{}");
        let client = client(&plugin.path().join("nested"), runner.clone());

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::Io { .. }), "got {:?}", err);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_execution_failed() {
        let plugin = plugin_file();
        let runner = ScriptedRunner::with(|| {
            Ok(ProcessOutput {
                exit_code: Some(2),
                stdout: Vec::new(),
                stderr: b"token expired".to_vec(),
            })
        });
        let client = client(plugin.path(), runner);

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        match err {
            EcpError::ExecutionFailed {
                exit_code, stderr, ..
            } => {
                assert_eq!(exit_code, Some(2));
                assert_eq!(stderr, "token expired");
            }
            other => panic!("expected ExecutionFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_runner_timeout_propagates() {
        let plugin = plugin_file();
        let path = plugin.path().to_path_buf();
        let runner = ScriptedRunner::with(move || {
            Err(EcpError::Timeout {
                path: path.clone(),
                timeout: Duration::from_secs(60),
                stderr: "still thinking".to_string(),
            })
        });
        let client = client(plugin.path(), runner);

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::Timeout { .. }));
        assert_eq!(err.stderr(), Some("still thinking"));
    }

    #[tokio::test]
    async fn test_invalid_json_is_protocol_error() {
        let plugin = plugin_file();
        let client = client(plugin.path(), ScriptedRunner::replying("not json"));

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::Protocol { source: Some(_), .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_protocol_error() {
        let plugin = plugin_file();
        let client = client(plugin.path(), ScriptedRunner::replying(r#"{"auth":"nope"}"#));

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::Protocol { .. }));
    }

    #[tokio::test]
    async fn test_empty_auth_is_no_credentials() {
        let plugin = plugin_file();
        let client = client(plugin.path(), ScriptedRunner::replying(r#"{"auth":{}}"#));

        let err = client
            .fetch_credentials(&image("r.io/app"), "r.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::NoCredentials { .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_most_specific_policy_selects_matching_entry() {
        let plugin = plugin_file();
        let runner = ScriptedRunner::replying(
            r#"{"auth":{
                "r.io":{"username":"registry","password":"p1"},
                "r.io/team/app":{"username":"app","password":"p2"},
                "other.io":{"username":"other","password":"p3"}
            }}"#,
        );
        let config = ProviderConfig::new(plugin.path()).with_selection(SelectionPolicy::MostSpecific);
        let client = CredentialProviderClient::with_runner(config, runner).unwrap();
        assert_eq!(client.selection(), SelectionPolicy::MostSpecific);

        let creds = client
            .fetch_credentials(&image("r.io/team/app:2"), "r.io")
            .await
            .unwrap();
        assert_eq!(creds.username(), "app");

        let err = client
            .fetch_credentials(&image("elsewhere.io/app"), "elsewhere.io")
            .await
            .unwrap_err();
        assert!(matches!(err, EcpError::NoCredentials { .. }));
    }

    #[tokio::test]
    async fn test_sequential_calls_are_independent() {
        let plugin = plugin_file();
        let runner = ScriptedRunner::replying(r#"{"auth":{"u1":{"username":"a","password":"b"}}}"#);
        let client = client(plugin.path(), runner.clone());
        let img = image("r.io/app:1");

        let first = client.fetch_credentials(&img, "r.io").await.unwrap();
        let second = client.fetch_credentials(&img, "r.io").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(runner.calls().len(), 2);
        assert_eq!(runner.calls()[0], runner.calls()[1]);
    }

    #[tokio::test]
    async fn test_usable_as_credential_source() {
        let plugin = plugin_file();
        let runner = ScriptedRunner::replying(r#"{"auth":{"u1":{"username":"a","password":"b"}}}"#);
        let source: Arc<dyn CredentialSource> = Arc::new(client(plugin.path(), runner));

        assert_eq!(source.name(), "credential-provider");
        let creds = source.credentials(&image("r.io/app"), "r.io").await.unwrap();
        assert_eq!(creds, Credentials::new("a", "b"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runner = ScriptedRunner::replying("{}");
        let config = ProviderConfig::new("/plugin").with_timeout(Duration::ZERO);
        assert!(matches!(
            CredentialProviderClient::with_runner(config, runner),
            Err(EcpError::InvalidConfig(_))
        ));
    }
}
