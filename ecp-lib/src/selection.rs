//! Choosing one auth entry from a provider response
//!
//! A response may carry several entries keyed by match patterns such as
//! `*.dkr.ecr.us-east-1.amazonaws.com` or `registry.example.com/team`.
//! [`SelectionPolicy::Any`] takes whichever entry the map yields first.
//! [`SelectionPolicy::MostSpecific`] matches keys against the image and
//! picks the most specific match.
//!
//! Wildcards apply within a single host label only: `*.example.com`
//! matches `a.example.com` but not `a.b.example.com`.

use crate::reference::{split_host_port, ImageReference};
use crate::types::AuthConfig;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// How to pick an entry when a response carries more than one
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SelectionPolicy {
    /// First entry in map iteration order; no precedence is defined
    #[default]
    Any,
    /// Most specific match key that applies to the image
    MostSpecific,
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "any"),
            Self::MostSpecific => write!(f, "most-specific"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "any" => Ok(Self::Any),
            "most-specific" => Ok(Self::MostSpecific),
            other => Err(format!(
                "unknown selection policy {:?} (expected \"any\" or \"most-specific\")",
                other
            )),
        }
    }
}

/// Select one entry from `auth` for `image` under `policy`
///
/// Returns the chosen match key with its entry, or None when nothing applies.
pub fn select<'a>(
    auth: &'a HashMap<String, AuthConfig>,
    image: &ImageReference,
    policy: SelectionPolicy,
) -> Option<(&'a str, &'a AuthConfig)> {
    match policy {
        SelectionPolicy::Any => auth.iter().next().map(|(k, v)| (k.as_str(), v)),
        SelectionPolicy::MostSpecific => auth
            .iter()
            .filter_map(|(key, entry)| {
                let pattern = MatchKey::parse(key);
                pattern.matches(image).then_some((pattern, entry))
            })
            .min_by(|(a, _), (b, _)| a.specificity_cmp(b))
            .map(|(pattern, entry)| (pattern.raw, entry)),
    }
}

/// A parsed `host[:port][/path]` match key
#[derive(Debug)]
struct MatchKey<'a> {
    raw: &'a str,
    labels: Vec<&'a str>,
    port: Option<&'a str>,
    path: Vec<&'a str>,
}

impl<'a> MatchKey<'a> {
    fn parse(raw: &'a str) -> Self {
        let without_scheme = raw
            .strip_prefix("https://")
            .or_else(|| raw.strip_prefix("http://"))
            .unwrap_or(raw);
        let (host, path) = without_scheme
            .split_once('/')
            .unwrap_or((without_scheme, ""));
        let (name, port) = split_host_port(host);

        Self {
            raw,
            labels: name.split('.').collect(),
            port,
            path: path.split('/').filter(|s| !s.is_empty()).collect(),
        }
    }

    fn matches(&self, image: &ImageReference) -> bool {
        let (name, port) = split_host_port(image.host());
        if self.port != port {
            return false;
        }

        let image_labels: Vec<&str> = name.split('.').collect();
        if image_labels.len() != self.labels.len() {
            return false;
        }
        let hosts_match = self
            .labels
            .iter()
            .zip(&image_labels)
            .all(|(pattern, label)| glob_match(pattern, label));
        if !hosts_match {
            return false;
        }

        let image_path: Vec<&str> = image
            .repository()
            .split('/')
            .filter(|s| !s.is_empty())
            .collect();
        image_path.starts_with(&self.path)
    }

    fn wildcard_labels(&self) -> usize {
        self.labels.iter().filter(|l| l.contains('*')).count()
    }

    /// Ordering where the most specific key sorts first
    fn specificity_cmp(&self, other: &Self) -> Ordering {
        other
            .path
            .len()
            .cmp(&self.path.len())
            .then_with(|| self.wildcard_labels().cmp(&other.wildcard_labels()))
            .then_with(|| other.raw.len().cmp(&self.raw.len()))
            .then_with(|| self.raw.cmp(other.raw))
    }
}

/// Match `text` against `pattern` where `*` matches any run of characters
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ti));
            pi += 1;
        } else if pi < p.len() && p[pi] == t[ti] {
            pi += 1;
            ti += 1;
        } else if let Some((star_pi, star_ti)) = star {
            pi = star_pi + 1;
            ti = star_ti + 1;
            star = Some((star_pi, star_ti + 1));
        } else {
            return false;
        }
    }

    p[pi..].iter().all(|c| *c == '*')
}
