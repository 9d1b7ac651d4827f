use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host-to-container port mapping.
///
/// Rendered as `host:container`, or `*:container` when the port is declared
/// but no host port is bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    pub host: Option<u16>,
    pub container: u16,
}

impl PortMapping {
    pub fn mapped(host: u16, container: u16) -> Self {
        Self {
            host: Some(host),
            container,
        }
    }

    pub fn unmapped(container: u16) -> Self {
        Self {
            host: None,
            container,
        }
    }

    pub fn is_mapped(&self) -> bool {
        self.host.is_some()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host {
            Some(host) => write!(f, "{host}:{}", self.container),
            None => write!(f, "*:{}", self.container),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid port mapping: {0:?}")]
pub struct ParsePortError(pub String);

impl FromStr for PortMapping {
    type Err = ParsePortError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParsePortError(s.to_string());
        let port = |p: &str| p.trim().parse::<u16>().map_err(|_| err());

        match s.trim().split_once(':') {
            None => Ok(Self::unmapped(port(s)?)),
            Some(("*", container)) => Ok(Self::unmapped(port(container)?)),
            Some((host, container)) => Ok(Self::mapped(port(host)?, port(container)?)),
        }
    }
}

impl TryFrom<String> for PortMapping {
    type Error = ParsePortError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(value: PortMapping) -> Self {
        value.to_string()
    }
}
