//! Fully qualified container image references
//!
//! A reference has the shape `host[:port]/path[:tag][@digest]`. The host is
//! always the first path component; there is no implicit default registry.
//! Userinfo before the host (`user@host/...`) is dropped, and `.`/`..` path
//! segments are resolved. A `..` never climbs above the host.
//!
//! Examples:
//! - "docker.io/library/ubuntu:22.04" -> host "docker.io", object "22.04"
//! - "localhost:5000/app@sha256:abcd" -> host "localhost:5000", object "@sha256:abcd"
//! - "ghcr.io/owner/repo" -> host "ghcr.io", no object

use crate::{EcpError, Result};
use std::fmt;
use std::str::FromStr;

/// Parsed image reference
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageReference {
    /// `host/path` with empty, `.` and `..` segments resolved
    locator: String,
    /// Tag and/or digest; a leading `@` marks a digest
    object: String,
}

impl ImageReference {
    /// Parse a fully qualified image reference
    pub fn parse(input: &str) -> Result<Self> {
        if input.is_empty() {
            return Err(EcpError::invalid_reference(input, "reference is empty"));
        }
        if input.contains("://") {
            return Err(EcpError::invalid_reference(input, "scheme is not allowed"));
        }
        if let Some(c) = input
            .chars()
            .find(|c| c.is_whitespace() || c.is_control() || *c == '?' || *c == '#')
        {
            return Err(EcpError::invalid_reference(
                input,
                format!("invalid character {:?}", c),
            ));
        }

        let (authority, rest) = input.split_once('/').unwrap_or((input, ""));
        let host = authority
            .rsplit_once('@')
            .map(|(_, host)| host)
            .unwrap_or(authority);
        validate_host(input, host)?;

        let (path, object) = match rest.find([':', '@']) {
            Some(idx) => {
                let object = &rest[idx..];
                let object = object.strip_prefix(':').unwrap_or(object);
                (&rest[..idx], object)
            }
            None => (rest, ""),
        };

        let mut segments: Vec<&str> = Vec::new();
        for segment in path.split('/') {
            match segment {
                "" | "." => {}
                ".." => {
                    segments.pop();
                }
                _ => segments.push(segment),
            }
        }

        let mut locator = host.to_string();
        for segment in segments {
            locator.push('/');
            locator.push_str(segment);
        }

        Ok(Self {
            locator,
            object: object.to_string(),
        })
    }

    /// Registry host, including the port when present
    pub fn host(&self) -> &str {
        self.locator
            .split_once('/')
            .map(|(host, _)| host)
            .unwrap_or(&self.locator)
    }

    /// Repository path below the host, without tag or digest
    pub fn repository(&self) -> &str {
        self.locator
            .split_once('/')
            .map(|(_, path)| path)
            .unwrap_or("")
    }

    /// `host/repository`
    pub fn locator(&self) -> &str {
        &self.locator
    }

    /// Tag and/or digest as written after the repository
    pub fn object(&self) -> &str {
        &self.object
    }

    /// Tag, if the reference names one
    pub fn tag(&self) -> Option<&str> {
        let tag = match self.object.split_once('@') {
            Some((tag, _)) => tag,
            None => &self.object,
        };
        (!tag.is_empty()).then_some(tag)
    }

    /// Digest, if the reference pins one
    pub fn digest(&self) -> Option<&str> {
        self.object
            .split_once('@')
            .map(|(_, digest)| digest)
            .filter(|d| !d.is_empty())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.object.is_empty() {
            write!(f, "{}", self.locator)
        } else if self.object.starts_with('@') {
            write!(f, "{}{}", self.locator, self.object)
        } else {
            write!(f, "{}:{}", self.locator, self.object)
        }
    }
}

impl FromStr for ImageReference {
    type Err = EcpError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn validate_host(input: &str, host: &str) -> Result<()> {
    if host.is_empty() {
        return Err(EcpError::invalid_reference(input, "hostname is required"));
    }
    if let Some((name, port)) = host.rsplit_once(':') {
        if name.is_empty() {
            return Err(EcpError::invalid_reference(input, "hostname is required"));
        }
        if port.is_empty() || !port.chars().all(|c| c.is_ascii_digit()) {
            return Err(EcpError::invalid_reference(
                input,
                format!("invalid port {:?}", port),
            ));
        }
    }
    Ok(())
}

/// Split `host[:port]` into its parts
pub(crate) fn split_host_port(host: &str) -> (&str, Option<&str>) {
    match host.rsplit_once(':') {
        Some((name, port)) => (name, Some(port)),
        None => (host, None),
    }
}
