//! Upload destination parsing

use std::fmt;
use std::str::FromStr;

use runtime_core::{Error, Result};

/// Schemes accepted for destination URIs
const SCHEMES: [&str; 2] = ["store", "s3"];

/// Object store location that a run's files are uploaded under
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Destination {
    container: String,
    key_prefix: String,
}

impl Destination {
    /// Build a destination from its parts
    ///
    /// Surrounding `/` on the prefix are dropped.
    pub fn new(container: impl Into<String>, key_prefix: impl AsRef<str>) -> Result<Self> {
        let container = container.into();
        if container.is_empty() {
            return Err(Error::InvalidDestination {
                uri: container,
                reason: "container name is empty".to_string(),
            });
        }
        Ok(Self {
            container,
            key_prefix: key_prefix.as_ref().trim_matches('/').to_string(),
        })
    }

    /// Parse `store://<container>/<key-prefix...>`
    ///
    /// The authority is the container and the path, minus its leading
    /// separator, is the key prefix. `s3://` is accepted as an alias.
    pub fn parse(uri: &str) -> Result<Self> {
        let invalid = |reason: &str| Error::InvalidDestination {
            uri: uri.to_string(),
            reason: reason.to_string(),
        };

        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| invalid("expected <scheme>://<container>/<key-prefix>"))?;
        if !SCHEMES.contains(&scheme) {
            return Err(invalid("unsupported scheme, expected store:// or s3://"));
        }
        if rest.contains('?') || rest.contains('#') {
            return Err(invalid("query parameters and fragments are not supported"));
        }

        let (authority, path) = rest.split_once('/').unwrap_or((rest, ""));
        if authority.contains('@') {
            return Err(invalid("credentials must not be embedded in the destination"));
        }
        if authority.is_empty() {
            return Err(invalid("container name is empty"));
        }

        let key_prefix = path.trim_matches('/');
        if !key_prefix.is_empty() {
            for segment in key_prefix.split('/') {
                match segment {
                    "" => return Err(invalid("key prefix must not contain empty segments")),
                    ".." => return Err(invalid("key prefix must not contain '..'")),
                    _ => {}
                }
            }
        }

        Self::new(authority, key_prefix)
    }

    /// Container (bucket) name
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Key prefix, without leading or trailing separators; may be empty
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Object key for a `/`-separated path relative to the output directory
    pub fn object_key(&self, relative: &str) -> String {
        if self.key_prefix.is_empty() {
            relative.to_string()
        } else {
            format!("{}/{}", self.key_prefix, relative)
        }
    }
}

impl FromStr for Destination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "store://{}/{}", self.container, self.key_prefix)
    }
}
