//! External Credential Provider - Shared Library
//!
//! Client side of the kubelet credential provider protocol: runs an external
//! plugin with a JSON request on stdin and turns its JSON response into a
//! username/password pair for pulling an image. Used by the `ecp` CLI and by
//! registry resolvers that embed the client directly.

pub mod client;
pub mod config;
pub mod error;
pub mod reference;
pub mod runner;
pub mod selection;
pub mod types;

pub use client::{CredentialProviderClient, CredentialSource};
pub use config::{ProviderConfig, DEFAULT_TIMEOUT};
pub use error::{EcpError, Result};
pub use reference::ImageReference;
pub use runner::{CommandRunner, ProcessOutput, ProcessRunner};
pub use selection::SelectionPolicy;
pub use types::{AuthConfig, CredentialProviderRequest, CredentialProviderResponse, Credentials};
