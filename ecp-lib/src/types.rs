//! Wire types for the kubelet credential provider exchange

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// `kind` of every request sent to a plugin
pub const REQUEST_KIND: &str = "CredentialProviderRequest";

/// `kind` a well-behaved plugin puts in its response
pub const RESPONSE_KIND: &str = "CredentialProviderResponse";

/// Protocol version spoken with plugins
pub const API_VERSION: &str = "credentialprovider.kubelet.k8s.io/v1";

/// Request written to the plugin's standard input
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProviderRequest {
    pub kind: String,
    pub api_version: String,
    pub image: String,
}

impl CredentialProviderRequest {
    /// Build a request for the given canonical image reference
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            kind: REQUEST_KIND.to_string(),
            api_version: API_VERSION.to_string(),
            image: image.into(),
        }
    }
}

/// Response read from the plugin's standard output
///
/// Decoding is lenient about absent fields: a missing scalar becomes an empty
/// string and a missing or `null` auth map becomes empty. Values of the wrong
/// JSON type are still rejected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CredentialProviderResponse {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub api_version: String,
    #[serde(default)]
    pub cache_key_type: String,
    #[serde(default)]
    pub cache_duration: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub auth: HashMap<String, AuthConfig>,
}

impl CredentialProviderResponse {
    /// True when kind and apiVersion are what the protocol prescribes
    pub fn is_expected_version(&self) -> bool {
        self.kind == RESPONSE_KIND && self.api_version == API_VERSION
    }
}

/// One username/password pair keyed by a match key in the response
///
/// Zeroed on drop, so discarding a decoded response wipes every entry.
#[derive(Clone, Default, Serialize, Deserialize, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct AuthConfig {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

/// Credential pair handed back to the caller
///
/// The values are zeroed when dropped and the password never appears in
/// `Debug` output. Together with the zeroing of `AuthConfig` and of the
/// captured plugin output, no owned copy of the secret outlives a fetch
/// except this one. Copies left behind by buffer reallocation while reading
/// or decoding are not covered.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl From<&AuthConfig> for Credentials {
    fn from(auth: &AuthConfig) -> Self {
        Self::new(auth.username.clone(), auth.password.clone())
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<HashMap<String, AuthConfig>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<HashMap<String, AuthConfig>>::deserialize(deserializer)?.unwrap_or_default())
}
